//! Transaction ledger
//!
//! Owns every status change of a payment attempt and the subscription side
//! effects that hang off the first transition into `completed`.

use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::LedgerError;
use super::state::{SubscriptionStatus, TransactionStatus};
use super::store::PaymentStore;
use super::types::{
    Subscription, Tier, TranId, Transaction, lookup_key, merge_metadata, metadata_patch,
};

/// Result of asking the ledger to move a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// This call performed the transition
    Applied(Transaction),
    /// Someone else already settled it; nothing was changed
    AlreadyFinal(TransactionStatus),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn status(&self) -> TransactionStatus {
        match self {
            Transition::Applied(tx) => tx.status,
            Transition::AlreadyFinal(status) => *status,
        }
    }
}

pub struct Ledger {
    store: Arc<dyn PaymentStore>,
    interval_months: u32,
}

impl Ledger {
    pub fn new(store: Arc<dyn PaymentStore>, interval_months: u32) -> Self {
        Self {
            store,
            interval_months: interval_months.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn PaymentStore> {
        &self.store
    }

    /// One billing interval after `from`
    pub fn next_renewal(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, LedgerError> {
        from.checked_add_months(Months::new(self.interval_months))
            .ok_or_else(|| LedgerError::InvalidStateTransition("renewal date overflow".into()))
    }

    /// Insert a freshly acknowledged attempt in `pending`
    pub async fn record_pending(&self, tx: Transaction) -> Result<Transaction, LedgerError> {
        if tx.status != TransactionStatus::Pending {
            return Err(LedgerError::InvalidStateTransition(format!(
                "new purchase must start pending, got {}",
                tx.status
            )));
        }
        self.store.insert_transaction(&tx).await?;
        info!(
            tran_id = %tx.tran_id,
            profile_id = %tx.profile_id,
            amount = %tx.amount,
            currency = %tx.currency,
            "Pending transaction recorded"
        );
        Ok(tx)
    }

    /// Find a transaction by its id, falling back to the normalized lookup key
    pub async fn resolve(&self, raw_tran_id: &str) -> Result<Transaction, LedgerError> {
        let trimmed = raw_tran_id.trim();
        if let Some(tx) = self.store.get_transaction(&TranId::from(trimmed)).await? {
            return Ok(tx);
        }

        let key = lookup_key(trimmed);
        if key.is_empty() {
            return Err(LedgerError::TransactionNotFound(raw_tran_id.to_string()));
        }
        match self.store.find_transaction_by_lookup_key(&key).await? {
            Some(tx) => {
                debug!(tran_id = %tx.tran_id, echoed = %raw_tran_id, "Resolved via lookup key");
                Ok(tx)
            }
            None => Err(LedgerError::TransactionNotFound(raw_tran_id.to_string())),
        }
    }

    /// `pending → completed`, then activate the owning subscription once
    ///
    /// When the transaction was already completed, an activation that did
    /// not go through the first time is applied now.
    pub async fn complete(
        &self,
        tx: &Transaction,
        source: &str,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Transition, LedgerError> {
        let transition = self
            .settle(tx, TransactionStatus::Completed, source, payload, None)
            .await?;

        match &transition {
            Transition::Applied(settled) => {
                info!(tran_id = %tx.tran_id, source = source, "Transaction completed");
                if let Some(tier) = settled.tier {
                    match self.owning_subscription(settled).await? {
                        Some(sub) => {
                            self.activate_subscription(sub, tier, now).await?;
                        }
                        None => warn!(
                            tran_id = %tx.tran_id,
                            profile_id = %tx.profile_id,
                            "Completed tier purchase has no subscription to activate"
                        ),
                    }
                }
            }
            Transition::AlreadyFinal(TransactionStatus::Completed) => {
                if let Some(current) = self.store.get_transaction(&tx.tran_id).await? {
                    self.ensure_activated(&current, now).await?;
                }
            }
            Transition::AlreadyFinal(_) => {}
        }
        Ok(transition)
    }

    /// `pending → failed`; the subscription is left untouched
    pub async fn fail(
        &self,
        tx: &Transaction,
        source: &str,
        payload: serde_json::Value,
        reason: &str,
    ) -> Result<Transition, LedgerError> {
        let transition = self
            .settle(tx, TransactionStatus::Failed, source, payload, Some(reason))
            .await?;
        if transition.is_applied() {
            info!(tran_id = %tx.tran_id, source = source, reason = reason, "Transaction failed");
        }
        Ok(transition)
    }

    /// CAS a pending transaction into `to`, with no subscription side effects
    ///
    /// The payload is stored under `source` next to the earlier payloads.
    pub async fn settle(
        &self,
        tx: &Transaction,
        to: TransactionStatus,
        source: &str,
        payload: serde_json::Value,
        note: Option<&str>,
    ) -> Result<Transition, LedgerError> {
        if !TransactionStatus::Pending.can_transition_to(to) {
            return Err(LedgerError::InvalidStateTransition(format!(
                "pending transaction cannot settle as {}",
                to
            )));
        }
        let applied = self
            .store
            .transition_transaction(
                &tx.tran_id,
                TransactionStatus::Pending,
                to,
                Some(metadata_patch(source, payload.clone())),
                note,
            )
            .await?;

        if !applied {
            return self.already_final(&tx.tran_id).await;
        }

        let mut settled = tx.clone();
        settled.status = to;
        settled.metadata = merge_metadata(&tx.metadata, source, payload);
        if let Some(note) = note {
            settled.note = Some(note.to_string());
        }
        Ok(Transition::Applied(settled))
    }

    /// Keep a pending transaction pending but leave an audit trail
    ///
    /// Returns `false` when the transaction settled in the meantime; the
    /// settled row is left as it is.
    pub async fn note_pending(
        &self,
        tx: &Transaction,
        source: &str,
        payload: serde_json::Value,
        reason: &str,
    ) -> Result<bool, LedgerError> {
        let noted = self
            .store
            .note_transaction(&tx.tran_id, reason, Some(metadata_patch(source, payload)))
            .await?;
        if noted {
            debug!(
                tran_id = %tx.tran_id,
                source = source,
                reason = reason,
                "Transaction still pending"
            );
        } else {
            debug!(tran_id = %tx.tran_id, source = source, "Pending note dropped, already settled");
        }
        Ok(noted)
    }

    /// `completed → refunded`; never reachable from a callback
    pub async fn refund(&self, tran_id: &TranId, reason: &str) -> Result<Transition, LedgerError> {
        let tx = self
            .store
            .get_transaction(tran_id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(tran_id.to_string()))?;

        match tx.status {
            TransactionStatus::Refunded => return Ok(Transition::AlreadyFinal(tx.status)),
            status if !status.can_transition_to(TransactionStatus::Refunded) => {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "cannot refund a {} transaction",
                    status
                )));
            }
            _ => {}
        }

        let applied = self
            .store
            .transition_transaction(
                tran_id,
                TransactionStatus::Completed,
                TransactionStatus::Refunded,
                None,
                Some(reason),
            )
            .await?;
        if !applied {
            return self.already_final(tran_id).await;
        }

        info!(tran_id = %tran_id, reason = reason, "Transaction refunded");
        let mut refunded = tx;
        refunded.status = TransactionStatus::Refunded;
        refunded.note = Some(reason.to_string());
        Ok(Transition::Applied(refunded))
    }

    /// Set tier, mark active and push the renewal date one interval out
    pub async fn activate_subscription(
        &self,
        mut sub: Subscription,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<Subscription, LedgerError> {
        sub.tier = tier;
        sub.status = SubscriptionStatus::Active;
        sub.renewal_date = Some(self.next_renewal(now)?);
        self.store.update_subscription(&sub).await?;
        info!(
            subscription_id = %sub.id,
            tier = %tier,
            renewal_date = ?sub.renewal_date,
            "Subscription activated"
        );
        Ok(sub)
    }

    /// Move a renewed subscription's date forward by one interval
    ///
    /// Counts from the previous renewal date so the billing anniversary is
    /// kept; a date that would still be due restarts from `now`.
    pub async fn advance_renewal(
        &self,
        mut sub: Subscription,
        now: DateTime<Utc>,
    ) -> Result<Subscription, LedgerError> {
        let base = sub.renewal_date.unwrap_or(now);
        let mut next = self.next_renewal(base)?;
        if next <= now {
            next = self.next_renewal(now)?;
        }
        sub.status = SubscriptionStatus::Active;
        sub.renewal_date = Some(next);
        sub.renewal_claimed_until = None;
        self.store.update_subscription(&sub).await?;
        Ok(sub)
    }

    /// Set a subscription's status without touching anything else
    pub async fn mark_subscription(
        &self,
        mut sub: Subscription,
        status: SubscriptionStatus,
    ) -> Result<Subscription, LedgerError> {
        let previous = sub.status;
        sub.status = status;
        sub.renewal_claimed_until = None;
        self.store.update_subscription(&sub).await?;
        info!(
            subscription_id = %sub.id,
            from = %previous,
            to = %status,
            "Subscription status changed"
        );
        Ok(sub)
    }

    /// Activate the subscription a completed payment paid for, if that step
    /// was lost
    ///
    /// A subscription not written since the payment settled never saw the
    /// activation; anything written later (a renewal, a cancel) wins.
    pub async fn ensure_activated(
        &self,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, LedgerError> {
        let Some(tier) = tx.tier else {
            return Ok(None);
        };
        if tx.status != TransactionStatus::Completed {
            return Ok(None);
        }
        let Some(sub) = self.owning_subscription(tx).await? else {
            return Ok(None);
        };
        if sub.updated_at >= tx.updated_at {
            return Ok(None);
        }
        warn!(
            tran_id = %tx.tran_id,
            subscription_id = %sub.id,
            "Re-applying activation for an already completed payment"
        );
        self.activate_subscription(sub, tier, now).await.map(Some)
    }

    /// Latest subscription of a profile, created in `created` when missing
    pub async fn ensure_subscription(
        &self,
        profile_id: Uuid,
        tier: Tier,
    ) -> Result<Subscription, LedgerError> {
        if let Some(sub) = self.store.subscription_for_profile(profile_id).await? {
            return Ok(sub);
        }
        let sub = Subscription::new(profile_id, tier);
        self.store.insert_subscription(&sub).await?;
        info!(
            subscription_id = %sub.id,
            profile_id = %profile_id,
            tier = %tier,
            "Subscription intent created"
        );
        Ok(sub)
    }

    async fn owning_subscription(
        &self,
        tx: &Transaction,
    ) -> Result<Option<Subscription>, LedgerError> {
        if let Some(id) = tx.subscription_id
            && let Some(sub) = self.store.get_subscription(id).await?
        {
            return Ok(Some(sub));
        }
        self.store.subscription_for_profile(tx.profile_id).await
    }

    async fn already_final(&self, tran_id: &TranId) -> Result<Transition, LedgerError> {
        let current = self
            .store
            .get_transaction(tran_id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(tran_id.to_string()))?;
        debug!(tran_id = %tran_id, status = %current.status, "Transition skipped, already settled");
        Ok(Transition::AlreadyFinal(current.status))
    }
}
