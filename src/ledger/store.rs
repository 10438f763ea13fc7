//! Data-access interface
//!
//! Everything the billing core reads or writes goes through [`PaymentStore`].
//! Status-changing writes are compare-and-swap: they return `false` when the
//! row was not in the expected state, and callers treat that as "someone else
//! got there first".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::LedgerError;
use super::state::TransactionStatus;
use super::types::{PaymentMethod, Profile, Subscription, TranId, Transaction};

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Cheap liveness probe of the backing storage
    async fn health_check(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    // === Profiles ===

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, LedgerError>;

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, LedgerError>;

    async fn find_profile_by_session(&self, session: &str)
    -> Result<Option<Profile>, LedgerError>;

    async fn insert_profile(&self, profile: &Profile) -> Result<(), LedgerError>;

    async fn update_profile(&self, profile: &Profile) -> Result<(), LedgerError>;

    // === Subscriptions ===

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, LedgerError>;

    async fn subscription_for_profile(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<Subscription>, LedgerError>;

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), LedgerError>;

    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), LedgerError>;

    /// Subscriptions inside their renewal window, oldest renewal date first
    async fn due_subscriptions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Subscription>, LedgerError>;

    /// Take the renewal lease if the subscription is still eligible
    ///
    /// Re-validates `active`, `auto_renew`, `renewal_date <= now` and that no
    /// unexpired lease is held, in one atomic step.
    async fn claim_renewal(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, LedgerError>;

    async fn release_renewal_claim(&self, id: Uuid) -> Result<(), LedgerError>;

    // === Transactions ===

    /// Insert a new transaction; a duplicate `tran_id` is an error
    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError>;

    async fn get_transaction(&self, tran_id: &TranId) -> Result<Option<Transaction>, LedgerError>;

    async fn find_transaction_by_lookup_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// CAS status update
    ///
    /// `patch` is merged into the stored metadata: its top-level keys
    /// overwrite, every other key already stored is kept.
    async fn transition_transaction(
        &self,
        tran_id: &TranId,
        from: TransactionStatus,
        to: TransactionStatus,
        patch: Option<serde_json::Value>,
        note: Option<&str>,
    ) -> Result<bool, LedgerError>;

    /// Audit note plus metadata patch on a transaction that is still pending
    ///
    /// Returns `false`, changing nothing, once the transaction has settled.
    async fn note_transaction(
        &self,
        tran_id: &TranId,
        note: &str,
        patch: Option<serde_json::Value>,
    ) -> Result<bool, LedgerError>;

    // === Payment methods ===

    /// Insert a method; a default method takes the flag from all others
    async fn insert_payment_method(&self, method: &PaymentMethod) -> Result<(), LedgerError>;

    async fn default_payment_method(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<PaymentMethod>, LedgerError>;

    async fn get_payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>, LedgerError>;
}
