//! Card tokenization flow
//!
//! Phase 1 asks the gateway to link a reusable card token to the payer.
//! Phase 2 runs when the token arrives on the card-link callback: the token
//! is stored and immediately charged for the subscription's tier. The
//! subscription only becomes `active` if that first charge succeeds.
//!
//! [`TokenizationFlow::charge`] is the charge primitive the renewal
//! scheduler reuses. It is idempotent per `tran_id`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::PaymentError;
use crate::gateway_client::GatewayStatus;
use crate::ledger::types::{format_amount, mask_token};
use crate::ledger::{
    Ledger, LedgerError, PaymentMethod, Profile, Subscription, SubscriptionStatus, Tier, TranId,
    Transaction, TransactionKind, TransactionStatus, Transition,
};
use crate::merchant::{Merchant, decode_base64_json, encode_base64_json};
use crate::signing::{CardLinkCallbackFields, LinkCardFields, TokenPurchaseFields, req_time};

/// Opaque context carried through the card-link round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkContext {
    pub subscription_id: Uuid,
    pub profile_id: Uuid,
    pub tier: Tier,
    /// Reference reserved for the first charge, so callback replays reuse it
    pub charge_tran_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkStart {
    pub subscription_id: Uuid,
    pub link_url: Option<String>,
}

/// What the card-link callback did
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    /// Token stored, first charge approved, subscription active
    Activated { subscription_id: Uuid, tran_id: TranId },
    /// Token stored, first charge failed, subscription `payment_failed`
    ChargeFailed { subscription_id: Uuid, tran_id: TranId },
    /// The gateway reported that linking itself failed
    LinkDeclined { subscription_id: Uuid, status: String },
    /// Replay of a callback whose charge already ran
    AlreadyProcessed { subscription_id: Uuid, tran_id: TranId },
}

/// Inputs of one token charge
#[derive(Debug, Clone)]
pub struct TokenCharge {
    pub tran_id: TranId,
    pub kind: TransactionKind,
    pub profile: Profile,
    pub subscription_id: Uuid,
    pub tier: Tier,
    pub amount: Decimal,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeOutcome {
    pub transaction: Transaction,
    /// True when the ledger already held this `tran_id` and no call was made
    pub replayed: bool,
}

impl ChargeOutcome {
    pub fn approved(&self) -> bool {
        self.transaction.status == TransactionStatus::Completed
    }
}

enum Reservation {
    /// Inserted by this call; the gateway has not been asked yet
    Fresh(Transaction),
    /// Some earlier or concurrent call owns this `tran_id`
    Replayed(Transaction),
}

pub struct TokenizationFlow {
    merchant: Merchant,
    ledger: Arc<Ledger>,
    billing: Arc<BillingConfig>,
}

impl TokenizationFlow {
    pub fn new(merchant: Merchant, ledger: Arc<Ledger>, billing: Arc<BillingConfig>) -> Self {
        Self {
            merchant,
            ledger,
            billing,
        }
    }

    pub fn billing(&self) -> &BillingConfig {
        &self.billing
    }

    /// Phase 1: zero-amount link request
    pub async fn start_link(
        &self,
        profile_id: Uuid,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<LinkStart, PaymentError> {
        if self.billing.price_for(tier).is_none() {
            return Err(PaymentError::InvalidRequest(format!(
                "tier {} is not for sale",
                tier
            )));
        }
        let profile = self.profile(profile_id).await?;

        let mut sub = self.ledger.ensure_subscription(profile_id, tier).await?;
        if sub.status == SubscriptionStatus::Created && sub.tier != tier {
            sub.tier = tier;
            self.ledger.store().update_subscription(&sub).await?;
        }

        let context = LinkContext {
            subscription_id: sub.id,
            profile_id,
            tier,
            charge_tran_id: TranId::generate().to_string(),
        };
        let fields = LinkCardFields {
            req_time: req_time(now),
            merchant_id: self.merchant.merchant_id().to_string(),
            return_param: encode_base64_json(&context)?,
            return_url: self.merchant.config().link_return_url.clone(),
            firstname: profile.first_name.clone(),
            email: profile.email.clone(),
        };

        let ack = self
            .merchant
            .gateway()
            .link_card(&self.merchant.sign(fields))
            .await?;
        info!(
            subscription_id = %sub.id,
            profile_id = %profile_id,
            tier = %tier,
            "Card link requested"
        );

        Ok(LinkStart {
            subscription_id: sub.id,
            link_url: ack.link_url,
        })
    }

    /// Phase 2: token delivered; store it and run the first charge
    pub async fn complete_link(
        &self,
        callback: &CardLinkCallbackFields,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<LinkOutcome, PaymentError> {
        if !self.merchant.engine().verify_fields(callback, hash) {
            warn!(
                token = %mask_token(&callback.payment_token),
                "Card-link callback signature mismatch"
            );
            return Err(PaymentError::SignatureMismatch);
        }

        let context: LinkContext = decode_base64_json(&callback.return_param)?;
        let sub = self
            .ledger
            .store()
            .get_subscription(context.subscription_id)
            .await?
            .ok_or_else(|| {
                PaymentError::SubscriptionNotFound(context.subscription_id.to_string())
            })?;
        if sub.profile_id != context.profile_id {
            return Err(PaymentError::InvalidRequest(
                "link context does not match subscription owner".to_string(),
            ));
        }

        let status = GatewayStatus {
            code: callback.status.trim().to_string(),
            message: String::new(),
        };
        if !status.is_success() {
            warn!(
                subscription_id = %sub.id,
                status = %status.code,
                "Card link declined by gateway"
            );
            return Ok(LinkOutcome::LinkDeclined {
                subscription_id: sub.id,
                status: status.code,
            });
        }
        if callback.payment_token.trim().is_empty() {
            return Err(PaymentError::TokenMissing);
        }

        let tran_id = TranId::from(context.charge_tran_id.as_str());
        if let Some(existing) = self.ledger.store().get_transaction(&tran_id).await? {
            return self.replayed_link(sub, existing, now).await;
        }

        let profile = self.profile(sub.profile_id).await?;
        let amount = self.billing.price_for(context.tier).ok_or_else(|| {
            PaymentError::Misconfiguration(format!("no price for tier {}", context.tier))
        })?;
        let (sub, method) = self.store_token(sub, callback).await?;

        let charge = TokenCharge {
            tran_id: tran_id.clone(),
            kind: TransactionKind::TokenCharge,
            profile,
            subscription_id: sub.id,
            tier: context.tier,
            amount,
            method,
        };
        let reserved = match self.reserve(&charge).await? {
            Reservation::Fresh(tx) => tx,
            Reservation::Replayed(existing) => {
                return self.replayed_link(sub, existing, now).await;
            }
        };
        let outcome = self.execute(&charge, reserved, now).await?;
        if outcome.replayed {
            return self.replayed_link(sub, outcome.transaction, now).await;
        }

        if outcome.approved() {
            let sub = self
                .ledger
                .activate_subscription(sub, context.tier, now)
                .await?;
            Ok(LinkOutcome::Activated {
                subscription_id: sub.id,
                tran_id,
            })
        } else {
            let sub = self
                .ledger
                .mark_subscription(sub, SubscriptionStatus::PaymentFailed)
                .await?;
            Ok(LinkOutcome::ChargeFailed {
                subscription_id: sub.id,
                tran_id,
            })
        }
    }

    /// Charge a stored token once per `tran_id`
    ///
    /// The attempt is recorded `pending` before the gateway is called, so a
    /// concurrent or later call with the same `tran_id` never reaches the
    /// gateway. A decline, a timeout and a transport error all settle it as
    /// `failed`; only an approved gateway answer settles it as `completed`.
    pub async fn charge(
        &self,
        charge: TokenCharge,
        now: DateTime<Utc>,
    ) -> Result<ChargeOutcome, PaymentError> {
        match self.reserve(&charge).await? {
            Reservation::Fresh(tx) => self.execute(&charge, tx, now).await,
            Reservation::Replayed(existing) => Ok(ChargeOutcome {
                transaction: existing,
                replayed: true,
            }),
        }
    }

    /// Insert the attempt as `pending`, or hand back the row already there
    async fn reserve(&self, charge: &TokenCharge) -> Result<Reservation, PaymentError> {
        let tx = Transaction::new(
            charge.tran_id.clone(),
            charge.profile.id,
            charge.amount,
            self.billing.currency,
            charge.kind,
            TransactionStatus::Pending,
        )
        .with_subscription(charge.subscription_id)
        .with_tier(charge.tier)
        .with_payment_option(charge.method.method_type.clone());

        match self.ledger.record_pending(tx).await {
            Ok(tx) => Ok(Reservation::Fresh(tx)),
            Err(LedgerError::DuplicateTransaction(_)) => {
                let existing = self.reload(&charge.tran_id).await?;
                info!(
                    tran_id = %existing.tran_id,
                    status = %existing.status,
                    "Token charge already reserved"
                );
                Ok(Reservation::Replayed(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Call the gateway for a reserved attempt and settle it
    async fn execute(
        &self,
        charge: &TokenCharge,
        reserved: Transaction,
        now: DateTime<Utc>,
    ) -> Result<ChargeOutcome, PaymentError> {
        let fields = TokenPurchaseFields {
            req_time: req_time(now),
            merchant_id: self.merchant.merchant_id().to_string(),
            tran_id: charge.tran_id.to_string(),
            amount: format_amount(charge.amount),
            currency: self.billing.currency.to_string(),
            payment_token: charge.method.token.clone(),
            firstname: charge.profile.first_name.clone(),
            lastname: charge.profile.last_name.clone(),
            email: charge.profile.email.clone(),
            return_params: String::new(),
        };
        let signed = self.merchant.sign(fields);

        let (to, source, payload, note) = match self.merchant.gateway().charge_token(&signed).await
        {
            Ok(result) if result.approved => {
                (TransactionStatus::Completed, "charge", result.raw, None)
            }
            Ok(result) => {
                let note = format!(
                    "declined ({}) {}",
                    result.status.code, result.status.message
                );
                (TransactionStatus::Failed, "charge", result.raw, Some(note))
            }
            Err(e) => (
                TransactionStatus::Failed,
                "charge_error",
                serde_json::Value::String(e.to_string()),
                Some(e.to_string()),
            ),
        };

        match self
            .ledger
            .settle(&reserved, to, source, payload, note.as_deref())
            .await?
        {
            Transition::Applied(transaction) => {
                info!(
                    tran_id = %transaction.tran_id,
                    subscription_id = %charge.subscription_id,
                    token = %charge.method.masked_token(),
                    status = %transaction.status,
                    "Token charge settled"
                );
                Ok(ChargeOutcome {
                    transaction,
                    replayed: false,
                })
            }
            Transition::AlreadyFinal(status) => {
                warn!(
                    tran_id = %reserved.tran_id,
                    status = %status,
                    "Token charge settled elsewhere while in flight"
                );
                Ok(ChargeOutcome {
                    transaction: self.reload(&reserved.tran_id).await?,
                    replayed: true,
                })
            }
        }
    }

    /// Bring the subscription in line with a charge that already ran
    ///
    /// Only a subscription not written since the charge settled is touched,
    /// so a stale callback cannot undo a later renewal or re-link.
    async fn replayed_link(
        &self,
        sub: Subscription,
        existing: Transaction,
        now: DateTime<Utc>,
    ) -> Result<LinkOutcome, PaymentError> {
        info!(
            subscription_id = %sub.id,
            tran_id = %existing.tran_id,
            status = %existing.status,
            "Card-link callback replayed"
        );
        match existing.status {
            TransactionStatus::Completed => {
                self.ledger.ensure_activated(&existing, now).await?;
            }
            TransactionStatus::Failed
                if sub.status != SubscriptionStatus::PaymentFailed
                    && sub.updated_at < existing.updated_at =>
            {
                self.ledger
                    .mark_subscription(sub.clone(), SubscriptionStatus::PaymentFailed)
                    .await?;
            }
            _ => {}
        }
        Ok(LinkOutcome::AlreadyProcessed {
            subscription_id: sub.id,
            tran_id: existing.tran_id,
        })
    }

    async fn reload(&self, tran_id: &TranId) -> Result<Transaction, PaymentError> {
        self.ledger
            .store()
            .get_transaction(tran_id)
            .await?
            .ok_or_else(|| PaymentError::TransactionNotFound(tran_id.to_string()))
    }

    async fn profile(&self, profile_id: Uuid) -> Result<Profile, PaymentError> {
        self.ledger
            .store()
            .get_profile(profile_id)
            .await?
            .ok_or_else(|| PaymentError::ProfileNotFound(profile_id.to_string()))
    }

    /// Store the delivered token as the profile's default method
    async fn store_token(
        &self,
        mut sub: Subscription,
        callback: &CardLinkCallbackFields,
    ) -> Result<(Subscription, PaymentMethod), PaymentError> {
        let store = self.ledger.store();
        if let Some(id) = sub.payment_token_id
            && let Some(existing) = store.get_payment_method(id).await?
            && existing.token == callback.payment_token
        {
            return Ok((sub, existing));
        }

        let method_type = if callback.card_type.trim().is_empty() {
            "card".to_string()
        } else {
            callback.card_type.trim().to_lowercase()
        };
        let mut method =
            PaymentMethod::new(sub.profile_id, callback.payment_token.trim(), method_type);
        if !callback.masked_pan.is_empty() {
            method.masked_pan = Some(callback.masked_pan.clone());
        }
        store.insert_payment_method(&method).await?;

        sub.payment_token_id = Some(method.id);
        sub.auto_renew = true;
        store.update_subscription(&sub).await?;
        info!(
            subscription_id = %sub.id,
            token = %method.masked_token(),
            "Card token stored"
        );
        Ok((sub, method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway_client::mock::ChargeBehavior;
    use crate::ledger::PaymentStore;
    use crate::test_support::TestEnv;
    use chrono::{Months, TimeZone};
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 10, 14, 0, 0).unwrap()
    }

    /// Start a link and return the context the gateway will echo back
    async fn linked(env: &TestEnv, profile: &Profile, tier: Tier) -> LinkContext {
        let start = env.tokenization.start_link(profile.id, tier, t0()).await.unwrap();
        assert!(start.link_url.is_some());
        let sent = env.gateway.last_link().unwrap();
        let context: LinkContext = decode_base64_json(&sent.return_param).unwrap();
        assert_eq!(context.subscription_id, start.subscription_id);
        context
    }

    #[tokio::test]
    async fn test_link_then_first_charge_activates() {
        let env = TestEnv::new();
        let profile = env.profile("card@example.com").await;
        let context = linked(&env, &profile, Tier::Pro).await;

        let (callback, hash) = env.link_signal(&context, "0", "tok-visa-4242");
        let outcome = env
            .tokenization
            .complete_link(&callback, &hash, t0())
            .await
            .unwrap();
        assert!(matches!(outcome, LinkOutcome::Activated { .. }));

        let sub = env
            .store
            .get_subscription(context.subscription_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.tier, Tier::Pro);
        assert!(sub.auto_renew);
        assert_eq!(sub.renewal_date, t0().checked_add_months(Months::new(1)));

        let method = env
            .store
            .default_payment_method(profile.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(method.token, "tok-visa-4242");
        assert_eq!(method.method_type, "visa");
        assert_eq!(sub.payment_token_id, Some(method.id));

        let tx = env
            .store
            .get_transaction(&TranId::from(context.charge_tran_id.as_str()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.kind, TransactionKind::TokenCharge);
        assert_eq!(tx.amount, dec!(79.00));
        assert_eq!(env.gateway.charged_tran_ids(), vec![context.charge_tran_id]);
    }

    #[tokio::test]
    async fn test_declined_first_charge_keeps_token() {
        let env = TestEnv::new();
        let profile = env.profile("card@example.com").await;
        env.gateway.set_charge("tok-declined", ChargeBehavior::Decline);
        let context = linked(&env, &profile, Tier::Starter).await;

        let (callback, hash) = env.link_signal(&context, "0", "tok-declined");
        let outcome = env
            .tokenization
            .complete_link(&callback, &hash, t0())
            .await
            .unwrap();
        assert!(matches!(outcome, LinkOutcome::ChargeFailed { .. }));

        let sub = env
            .store
            .get_subscription(context.subscription_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PaymentFailed);
        assert!(sub.payment_token_id.is_some());
        assert!(sub.renewal_date.is_none());

        let txs = env.store.transactions_for_profile(profile.id).await;
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].status, TransactionStatus::Failed);
        assert!(txs[0].note.as_deref().unwrap().starts_with("declined"));
    }

    #[tokio::test]
    async fn test_replayed_callback_charges_once() {
        let env = TestEnv::new();
        let profile = env.profile("card@example.com").await;
        let context = linked(&env, &profile, Tier::Starter).await;
        let (callback, hash) = env.link_signal(&context, "0", "tok-replay");

        env.tokenization
            .complete_link(&callback, &hash, t0())
            .await
            .unwrap();
        let replay = env
            .tokenization
            .complete_link(&callback, &hash, t0())
            .await
            .unwrap();

        assert!(matches!(replay, LinkOutcome::AlreadyProcessed { .. }));
        assert_eq!(env.gateway.charge_count(), 1);
        assert_eq!(env.store.transactions_for_profile(profile.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_tampered_callback_is_rejected() {
        let env = TestEnv::new();
        let profile = env.profile("card@example.com").await;
        let context = linked(&env, &profile, Tier::Starter).await;
        let (mut callback, hash) = env.link_signal(&context, "0", "tok-original");
        callback.payment_token = "tok-attacker".to_string();

        let err = env
            .tokenization
            .complete_link(&callback, &hash, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::SignatureMismatch));
        assert!(env.store.default_payment_method(profile.id).await.unwrap().is_none());
        assert_eq!(env.gateway.charge_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_link_and_missing_token() {
        let env = TestEnv::new();
        let profile = env.profile("card@example.com").await;
        let context = linked(&env, &profile, Tier::Starter).await;

        let (callback, hash) = env.link_signal(&context, "5", "");
        let outcome = env
            .tokenization
            .complete_link(&callback, &hash, t0())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LinkOutcome::LinkDeclined {
                subscription_id: context.subscription_id,
                status: "5".to_string(),
            }
        );

        let (callback, hash) = env.link_signal(&context, "0", "  ");
        let err = env
            .tokenization
            .complete_link(&callback, &hash, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::TokenMissing));
        assert_eq!(env.gateway.charge_count(), 0);
    }

    #[tokio::test]
    async fn test_unsold_tier_cannot_be_linked() {
        let env = TestEnv::new();
        let profile = env.profile("card@example.com").await;
        let err = env
            .tokenization
            .start_link(profile.id, Tier::Free, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidRequest(_)));
        assert_eq!(env.gateway.link_count(), 0);
    }

    #[tokio::test]
    async fn test_charge_is_idempotent_per_tran_id() {
        let env = TestEnv::new();
        let profile = env.profile("card@example.com").await;
        let sub = env
            .active_subscription(&profile, Tier::Starter, t0(), Some("tok-idem"))
            .await;
        let method = env
            .store
            .default_payment_method(profile.id)
            .await
            .unwrap()
            .unwrap();
        let charge = TokenCharge {
            tran_id: TranId::generate(),
            kind: TransactionKind::Renewal,
            profile,
            subscription_id: sub.id,
            tier: Tier::Starter,
            amount: dec!(29.00),
            method,
        };

        let first = env.tokenization.charge(charge.clone(), t0()).await.unwrap();
        assert!(first.approved());
        assert!(!first.replayed);

        let second = env.tokenization.charge(charge, t0()).await.unwrap();
        assert!(second.replayed);
        assert_eq!(second.transaction.tran_id, first.transaction.tran_id);
        assert_eq!(env.gateway.charge_count(), 1);
    }

    #[tokio::test]
    async fn test_charge_timeout_records_failed() {
        let env = TestEnv::new();
        let profile = env.profile("card@example.com").await;
        env.gateway.set_charge("tok-slow", ChargeBehavior::Timeout);
        let sub = env
            .active_subscription(&profile, Tier::Starter, t0(), Some("tok-slow"))
            .await;
        let method = env
            .store
            .default_payment_method(profile.id)
            .await
            .unwrap()
            .unwrap();

        let outcome = env
            .tokenization
            .charge(
                TokenCharge {
                    tran_id: TranId::generate(),
                    kind: TransactionKind::Renewal,
                    profile,
                    subscription_id: sub.id,
                    tier: Tier::Starter,
                    amount: dec!(29.00),
                    method,
                },
                t0(),
            )
            .await
            .unwrap();
        assert!(!outcome.approved());
        assert_eq!(outcome.transaction.status, TransactionStatus::Failed);
        assert!(outcome.transaction.metadata.get("charge_error").is_some());
    }

    #[tokio::test]
    async fn test_concurrent_callbacks_charge_once() {
        let env = TestEnv::new();
        let profile = env.profile("card@example.com").await;
        env.gateway.set_charge_delay(std::time::Duration::from_millis(50));
        let context = linked(&env, &profile, Tier::Starter).await;
        let (callback, hash) = env.link_signal(&context, "0", "tok-race");

        let (a, b) = tokio::join!(
            env.tokenization.complete_link(&callback, &hash, t0()),
            env.tokenization.complete_link(&callback, &hash, t0()),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let activated = outcomes
            .iter()
            .filter(|o| matches!(o, LinkOutcome::Activated { .. }))
            .count();
        let replayed = outcomes
            .iter()
            .filter(|o| matches!(o, LinkOutcome::AlreadyProcessed { .. }))
            .count();
        assert_eq!((activated, replayed), (1, 1));
        assert_eq!(env.gateway.charge_count(), 1);

        let txs = env.store.transactions_for_profile(profile.id).await;
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_failed_charge_settles_the_reserved_row() {
        let env = TestEnv::new();
        let profile = env.profile("card@example.com").await;
        env.gateway.set_charge("tok-hang", ChargeBehavior::Timeout);
        let sub = env
            .active_subscription(&profile, Tier::Starter, t0(), Some("tok-hang"))
            .await;
        let method = env
            .store
            .default_payment_method(profile.id)
            .await
            .unwrap()
            .unwrap();
        let tran_id = TranId::generate();

        let outcome = env
            .tokenization
            .charge(
                TokenCharge {
                    tran_id: tran_id.clone(),
                    kind: TransactionKind::Renewal,
                    profile,
                    subscription_id: sub.id,
                    tier: Tier::Starter,
                    amount: dec!(29.00),
                    method,
                },
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.transaction.status, TransactionStatus::Failed);
        assert_eq!(outcome.transaction.kind, TransactionKind::Renewal);
        assert_eq!(outcome.transaction.subscription_id, Some(sub.id));
        assert_eq!(outcome.transaction.payment_option, "visa");

        // Settling merged into the reserved row rather than replacing it
        let stored = env.store.get_transaction(&tran_id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
        assert_eq!(stored.metadata, outcome.transaction.metadata);
    }

    #[tokio::test]
    async fn test_callback_retry_activates_after_lost_write() {
        let env = TestEnv::new();
        let profile = env.profile("card@example.com").await;
        let context = linked(&env, &profile, Tier::Pro).await;
        let (callback, hash) = env.link_signal(&context, "0", "tok-heal");

        // Token write passes, the activation write after the charge fails
        env.faults.fail_subscription_updates_after(1, 1);
        let err = env
            .tokenization
            .complete_link(&callback, &hash, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Ledger(_)));
        let sub = env
            .store
            .get_subscription(context.subscription_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Created);

        let retry = env
            .tokenization
            .complete_link(&callback, &hash, t0())
            .await
            .unwrap();
        assert!(matches!(retry, LinkOutcome::AlreadyProcessed { .. }));
        assert_eq!(env.gateway.charge_count(), 1);

        let sub = env
            .store
            .get_subscription(context.subscription_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.tier, Tier::Pro);
        assert_eq!(sub.renewal_date, t0().checked_add_months(Months::new(1)));
    }

    #[tokio::test]
    async fn test_replay_does_not_reactivate_a_later_change() {
        let env = TestEnv::new();
        let profile = env.profile("card@example.com").await;
        let context = linked(&env, &profile, Tier::Starter).await;
        let (callback, hash) = env.link_signal(&context, "0", "tok-later");
        env.tokenization
            .complete_link(&callback, &hash, t0())
            .await
            .unwrap();

        let mut sub = env
            .store
            .get_subscription(context.subscription_id)
            .await
            .unwrap()
            .unwrap();
        sub.status = SubscriptionStatus::Cancelled;
        env.store.update_subscription(&sub).await.unwrap();

        let replay = env
            .tokenization
            .complete_link(&callback, &hash, t0())
            .await
            .unwrap();
        assert!(matches!(replay, LinkOutcome::AlreadyProcessed { .. }));
        let sub = env
            .store
            .get_subscription(context.subscription_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
    }
}
