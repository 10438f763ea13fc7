//! In-memory payment store
//!
//! Same compare-and-swap semantics as the PostgreSQL store. Used by tests
//! and by the binary when no database URL is configured.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::LedgerError;
use super::state::TransactionStatus;
use super::store::PaymentStore;
use super::types::{
    PaymentMethod, Profile, Subscription, TranId, Transaction, apply_metadata_patch,
};

#[derive(Default)]
struct Tables {
    profiles: HashMap<Uuid, Profile>,
    subscriptions: HashMap<Uuid, Subscription>,
    transactions: HashMap<String, Transaction>,
    payment_methods: HashMap<Uuid, PaymentMethod>,
}

/// Thread-safe store behind a single `RwLock`, so each CAS is atomic
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All transactions of a profile, oldest first
    pub async fn transactions_for_profile(&self, profile_id: Uuid) -> Vec<Transaction> {
        let tables = self.tables.read().await;
        let mut txs: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|tx| tx.profile_id == profile_id)
            .cloned()
            .collect();
        txs.sort_by_key(|tx| tx.created_at);
        txs
    }

    pub async fn transaction_count(&self) -> usize {
        self.tables.read().await.transactions.len()
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, LedgerError> {
        Ok(self.tables.read().await.profiles.get(&id).cloned())
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, LedgerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_profile_by_session(
        &self,
        session: &str,
    ) -> Result<Option<Profile>, LedgerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .profiles
            .values()
            .find(|p| p.session_token.as_deref() == Some(session))
            .cloned())
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<(), LedgerError> {
        let mut tables = self.tables.write().await;
        tables.profiles.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn update_profile(&self, profile: &Profile) -> Result<(), LedgerError> {
        let mut tables = self.tables.write().await;
        match tables.profiles.get_mut(&profile.id) {
            Some(row) => {
                *row = profile.clone();
                Ok(())
            }
            None => Err(LedgerError::ProfileNotFound(profile.id.to_string())),
        }
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, LedgerError> {
        Ok(self.tables.read().await.subscriptions.get(&id).cloned())
    }

    async fn subscription_for_profile(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<Subscription>, LedgerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .values()
            .filter(|s| s.profile_id == profile_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), LedgerError> {
        let mut tables = self.tables.write().await;
        tables
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), LedgerError> {
        let mut tables = self.tables.write().await;
        match tables.subscriptions.get_mut(&subscription.id) {
            Some(row) => {
                *row = Subscription {
                    updated_at: Utc::now(),
                    ..subscription.clone()
                };
                Ok(())
            }
            None => Err(LedgerError::SubscriptionNotFound(
                subscription.id.to_string(),
            )),
        }
    }

    async fn due_subscriptions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Subscription>, LedgerError> {
        let tables = self.tables.read().await;
        let mut due: Vec<Subscription> = tables
            .subscriptions
            .values()
            .filter(|s| s.is_renewal_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.renewal_date);
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_renewal(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let mut tables = self.tables.write().await;
        match tables.subscriptions.get_mut(&id) {
            Some(sub) if sub.is_claimable(now) => {
                sub.renewal_claimed_until = Some(lease_until);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_renewal_claim(&self, id: Uuid) -> Result<(), LedgerError> {
        let mut tables = self.tables.write().await;
        if let Some(sub) = tables.subscriptions.get_mut(&id) {
            sub.renewal_claimed_until = None;
        }
        Ok(())
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let mut tables = self.tables.write().await;
        if tables.transactions.contains_key(tx.tran_id.as_str()) {
            return Err(LedgerError::DuplicateTransaction(tx.tran_id.to_string()));
        }
        tables
            .transactions
            .insert(tx.tran_id.to_string(), tx.clone());
        Ok(())
    }

    async fn get_transaction(&self, tran_id: &TranId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .tables
            .read()
            .await
            .transactions
            .get(tran_id.as_str())
            .cloned())
    }

    async fn find_transaction_by_lookup_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .values()
            .find(|tx| tx.lookup_key == key)
            .cloned())
    }

    async fn transition_transaction(
        &self,
        tran_id: &TranId,
        from: TransactionStatus,
        to: TransactionStatus,
        patch: Option<serde_json::Value>,
        note: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let mut tables = self.tables.write().await;
        let Some(tx) = tables.transactions.get_mut(tran_id.as_str()) else {
            return Ok(false);
        };
        if tx.status != from {
            return Ok(false);
        }
        tx.status = to;
        if let Some(patch) = patch {
            apply_metadata_patch(&mut tx.metadata, patch);
        }
        if let Some(note) = note {
            tx.note = Some(note.to_string());
        }
        tx.updated_at = Utc::now();
        Ok(true)
    }

    async fn note_transaction(
        &self,
        tran_id: &TranId,
        note: &str,
        patch: Option<serde_json::Value>,
    ) -> Result<bool, LedgerError> {
        let mut tables = self.tables.write().await;
        let tx = tables
            .transactions
            .get_mut(tran_id.as_str())
            .ok_or_else(|| LedgerError::TransactionNotFound(tran_id.to_string()))?;
        if tx.status != TransactionStatus::Pending {
            return Ok(false);
        }
        tx.note = Some(note.to_string());
        if let Some(patch) = patch {
            apply_metadata_patch(&mut tx.metadata, patch);
        }
        tx.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_payment_method(&self, method: &PaymentMethod) -> Result<(), LedgerError> {
        let mut tables = self.tables.write().await;
        if method.is_default {
            for pm in tables.payment_methods.values_mut() {
                if pm.profile_id == method.profile_id {
                    pm.is_default = false;
                }
            }
        }
        tables.payment_methods.insert(method.id, method.clone());
        Ok(())
    }

    async fn default_payment_method(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<PaymentMethod>, LedgerError> {
        let tables = self.tables.read().await;
        Ok(tables
            .payment_methods
            .values()
            .filter(|pm| pm.profile_id == profile_id && pm.is_default)
            .max_by_key(|pm| pm.created_at)
            .cloned())
    }

    async fn get_payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>, LedgerError> {
        Ok(self.tables.read().await.payment_methods.get(&id).cloned())
    }
}
