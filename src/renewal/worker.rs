//! Renewal scheduler
//!
//! Charges every due, auto-renewing subscription with its stored token.
//! Items are processed one by one; a failure on one subscription is recorded
//! in the report and the batch moves on.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RenewalConfig;
use crate::error::PaymentError;
use crate::ledger::{
    Ledger, LedgerError, PaymentMethod, Subscription, SubscriptionStatus, TranId,
    TransactionKind, TransactionStatus,
};
use crate::tokenization::{TokenCharge, TokenizationFlow};

#[derive(Error, Debug, Clone)]
pub enum RenewalError {
    #[error("A renewal run is already in progress")]
    AlreadyRunning,

    #[error("Failed to load due subscriptions: {0}")]
    Ledger(#[from] LedgerError),
}

/// Per-subscription result
#[derive(Debug, Clone, PartialEq)]
pub enum RenewalStatus {
    /// Charged; renewal date advanced
    Renewed,
    /// Charge failed or no token; subscription marked `past_due`
    PastDue(String),
    /// Not charged: claimed by another run, no longer eligible, or the
    /// period's charge has not settled yet
    Skipped(String),
    /// Unexpected error; subscription left as it was
    Errored(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenewalItem {
    pub subscription_id: Uuid,
    pub status: RenewalStatus,
    pub tran_id: Option<TranId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenewalReport {
    pub run_at: DateTime<Utc>,
    pub items: Vec<RenewalItem>,
}

impl RenewalReport {
    pub fn renewed(&self) -> usize {
        self.count(|s| matches!(s, RenewalStatus::Renewed))
    }

    pub fn past_due(&self) -> usize {
        self.count(|s| matches!(s, RenewalStatus::PastDue(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, RenewalStatus::Skipped(_)))
    }

    pub fn errored(&self) -> usize {
        self.count(|s| matches!(s, RenewalStatus::Errored(_)))
    }

    pub fn item(&self, subscription_id: Uuid) -> Option<&RenewalItem> {
        self.items
            .iter()
            .find(|i| i.subscription_id == subscription_id)
    }

    fn count(&self, pred: impl Fn(&RenewalStatus) -> bool) -> usize {
        self.items.iter().filter(|i| pred(&i.status)).count()
    }
}

pub struct RenewalScheduler {
    ledger: Arc<Ledger>,
    tokenization: Arc<TokenizationFlow>,
    config: RenewalConfig,
    running: Mutex<()>,
}

impl RenewalScheduler {
    pub fn new(
        ledger: Arc<Ledger>,
        tokenization: Arc<TokenizationFlow>,
        config: RenewalConfig,
    ) -> Self {
        Self {
            ledger,
            tokenization,
            config,
            running: Mutex::new(()),
        }
    }

    pub async fn run_once(&self) -> Result<RenewalReport, RenewalError> {
        self.run_once_at(Utc::now()).await
    }

    /// One batch pass as of `now`
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<RenewalReport, RenewalError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| RenewalError::AlreadyRunning)?;

        let due = self
            .ledger
            .store()
            .due_subscriptions(now, self.config.batch_size)
            .await?;

        if due.is_empty() {
            debug!("No subscriptions due for renewal");
            return Ok(RenewalReport {
                run_at: now,
                items: Vec::new(),
            });
        }
        info!(count = due.len(), "Renewal run started");

        let mut items = Vec::with_capacity(due.len());
        for sub in due {
            let subscription_id = sub.id;
            let item = match self.prepare(sub, now).await {
                Ok(Plan::Finished(item)) => item,
                Ok(Plan::Charge { sub, charge }) => {
                    let tran_id = charge.tran_id.clone();
                    match self.charge(sub, charge, now).await {
                        Ok(item) => item,
                        Err(e) => {
                            // The charge may have gone through: keep the lease
                            error!(
                                subscription_id = %subscription_id,
                                tran_id = %tran_id,
                                error = %e,
                                "Renewal charge not settled, claim kept until the lease expires"
                            );
                            item(
                                subscription_id,
                                RenewalStatus::Errored(e.to_string()),
                                Some(tran_id),
                            )
                        }
                    }
                }
                Err(e) => {
                    error!(
                        subscription_id = %subscription_id,
                        error = %e,
                        "Renewal failed unexpectedly"
                    );
                    self.release(subscription_id).await;
                    item(subscription_id, RenewalStatus::Errored(e.to_string()), None)
                }
            };
            items.push(item);
        }

        let report = RenewalReport { run_at: now, items };
        info!(
            renewed = report.renewed(),
            past_due = report.past_due(),
            skipped = report.skipped(),
            errored = report.errored(),
            "Renewal run finished"
        );
        Ok(report)
    }

    /// Claim the subscription and work out what to charge
    ///
    /// Nothing has reached the gateway yet, so on error the claim can be
    /// released.
    async fn prepare(&self, sub: Subscription, now: DateTime<Utc>) -> Result<Plan, PaymentError> {
        let store = self.ledger.store();
        let lease_until = now + Duration::seconds(self.config.claim_lease_secs as i64);

        // Eligibility is re-checked atomically with taking the lease
        if !store.claim_renewal(sub.id, now, lease_until).await? {
            debug!(subscription_id = %sub.id, "Renewal skipped, not claimable");
            return Ok(Plan::Finished(item(
                sub.id,
                RenewalStatus::Skipped("not eligible or claimed by another run".into()),
                None,
            )));
        }
        let sub = store
            .get_subscription(sub.id)
            .await?
            .ok_or_else(|| PaymentError::SubscriptionNotFound(sub.id.to_string()))?;

        let Some(method) = self.payment_method(&sub).await? else {
            return self
                .past_due(sub, "no payment token on file", None)
                .await
                .map(Plan::Finished);
        };
        let Some(profile) = store.get_profile(sub.profile_id).await? else {
            return self
                .past_due(sub, "profile not found", None)
                .await
                .map(Plan::Finished);
        };
        let Some(amount) = self.tokenization.billing().price_for(sub.tier) else {
            store.release_renewal_claim(sub.id).await?;
            return Ok(Plan::Finished(item(
                sub.id,
                RenewalStatus::Skipped(format!("no price for tier {}", sub.tier)),
                None,
            )));
        };

        let period = sub.renewal_date.unwrap_or(now);
        let charge = TokenCharge {
            tran_id: TranId::for_renewal(sub.id, period),
            kind: TransactionKind::Renewal,
            profile,
            subscription_id: sub.id,
            tier: sub.tier,
            amount,
            method,
        };
        Ok(Plan::Charge { sub, charge })
    }

    /// Charge the period and apply the result to the subscription
    ///
    /// A charge already recorded for this period is applied, not repeated.
    async fn charge(
        &self,
        sub: Subscription,
        charge: TokenCharge,
        now: DateTime<Utc>,
    ) -> Result<RenewalItem, PaymentError> {
        let tran_id = charge.tran_id.clone();
        let outcome = self.tokenization.charge(charge, now).await?;
        if outcome.replayed {
            info!(
                subscription_id = %sub.id,
                tran_id = %tran_id,
                status = %outcome.transaction.status,
                "Renewal charge for this period already recorded"
            );
        }

        match outcome.transaction.status {
            TransactionStatus::Completed => {
                let renewed = self.ledger.advance_renewal(sub, now).await?;
                info!(
                    subscription_id = %renewed.id,
                    tran_id = %tran_id,
                    renewal_date = ?renewed.renewal_date,
                    "Subscription renewed"
                );
                Ok(item(renewed.id, RenewalStatus::Renewed, Some(tran_id)))
            }
            TransactionStatus::Pending => Ok(item(
                sub.id,
                RenewalStatus::Skipped(format!("charge {} has not settled yet", tran_id)),
                Some(tran_id),
            )),
            _ => {
                let reason = outcome
                    .transaction
                    .note
                    .clone()
                    .unwrap_or_else(|| "charge declined".to_string());
                self.past_due(sub, &reason, Some(tran_id)).await
            }
        }
    }

    async fn release(&self, subscription_id: Uuid) {
        if let Err(e) = self
            .ledger
            .store()
            .release_renewal_claim(subscription_id)
            .await
        {
            warn!(
                subscription_id = %subscription_id,
                error = %e,
                "Failed to release renewal claim"
            );
        }
    }

    /// The subscription's linked token, else the profile default
    async fn payment_method(
        &self,
        sub: &Subscription,
    ) -> Result<Option<PaymentMethod>, PaymentError> {
        let store = self.ledger.store();
        if let Some(id) = sub.payment_token_id
            && let Some(method) = store.get_payment_method(id).await?
        {
            return Ok(Some(method));
        }
        Ok(store.default_payment_method(sub.profile_id).await?)
    }

    async fn past_due(
        &self,
        sub: Subscription,
        reason: &str,
        tran_id: Option<TranId>,
    ) -> Result<RenewalItem, PaymentError> {
        warn!(
            subscription_id = %sub.id,
            reason = reason,
            "Renewal failed, subscription past due"
        );
        let sub = self
            .ledger
            .mark_subscription(sub, SubscriptionStatus::PastDue)
            .await?;
        Ok(item(sub.id, RenewalStatus::PastDue(reason.to_string()), tran_id))
    }
}

/// What is left to do once the claim is held
enum Plan {
    Finished(RenewalItem),
    Charge {
        sub: Subscription,
        charge: TokenCharge,
    },
}

fn item(subscription_id: Uuid, status: RenewalStatus, tran_id: Option<TranId>) -> RenewalItem {
    RenewalItem {
        subscription_id,
        status,
        tran_id,
    }
}
