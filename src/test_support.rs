//! Service wiring shared by the integration test modules

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::checkout::CheckoutInitiator;
use crate::config::{BillingConfig, GatewayConfig, ReconcileConfig, RenewalConfig};
use crate::gateway_client::mock::MockGateway;
use crate::ledger::{
    InMemoryStore, Ledger, LedgerError, PaymentMethod, PaymentStore, Profile, Subscription,
    SubscriptionStatus, Tier, TranId, Transaction, TransactionStatus,
};
use crate::merchant::{Merchant, encode_base64_json};
use crate::reconcile::CallbackReconciler;
use crate::renewal::RenewalScheduler;
use crate::signing::{
    CardLinkCallbackFields, PaymentCallbackFields, SignatureEngine, SignedFields,
};
use crate::tokenization::{LinkContext, TokenizationFlow};

pub const TEST_KEY: &str = "integration-test-key";
pub const TEST_MERCHANT: &str = "ec000002";

pub struct TestEnv {
    pub store: Arc<InMemoryStore>,
    /// Same tables as `store`; the services write through it
    pub faults: Arc<FlakyStore>,
    pub gateway: Arc<MockGateway>,
    pub merchant: Merchant,
    pub ledger: Arc<Ledger>,
    pub billing: Arc<BillingConfig>,
    pub checkout: Arc<CheckoutInitiator>,
    pub tokenization: Arc<TokenizationFlow>,
    pub reconciler: Arc<CallbackReconciler>,
    pub renewals: Arc<RenewalScheduler>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_reconcile(ReconcileConfig::default())
    }

    pub fn with_reconcile(reconcile: ReconcileConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let faults = Arc::new(FlakyStore::new(store.as_ref().clone()));
        let gateway = Arc::new(MockGateway::new(TEST_KEY));
        let merchant = Merchant::new(Arc::new(gateway_config()), gateway.clone()).unwrap();
        let billing = Arc::new(BillingConfig::default());
        let ledger = Arc::new(Ledger::new(faults.clone(), billing.interval_months));

        let checkout = Arc::new(CheckoutInitiator::new(
            merchant.clone(),
            ledger.clone(),
            billing.clone(),
        ));
        let tokenization = Arc::new(TokenizationFlow::new(
            merchant.clone(),
            ledger.clone(),
            billing.clone(),
        ));
        let reconciler = Arc::new(CallbackReconciler::new(
            merchant.clone(),
            ledger.clone(),
            reconcile,
        ));
        let renewals = Arc::new(RenewalScheduler::new(
            ledger.clone(),
            tokenization.clone(),
            RenewalConfig {
                cron_secret: "cron-secret".to_string(),
                ..Default::default()
            },
        ));

        Self {
            store,
            faults,
            gateway,
            merchant,
            ledger,
            billing,
            checkout,
            tokenization,
            reconciler,
            renewals,
        }
    }

    /// Signer holding the same key as the gateway
    pub fn gateway_signer(&self) -> SignatureEngine {
        SignatureEngine::new(TEST_KEY).unwrap()
    }

    pub async fn profile(&self, email: &str) -> Profile {
        let mut profile = Profile::new(email);
        profile.first_name = "Sok".into();
        profile.last_name = "Dara".into();
        self.store.insert_profile(&profile).await.unwrap();
        profile
    }

    /// Payment result as the gateway would push it, correctly signed
    pub fn payment_signal(
        &self,
        tran_id: &str,
        status: &str,
        amount: &str,
    ) -> (PaymentCallbackFields, String) {
        let fields = PaymentCallbackFields {
            tran_id: tran_id.to_string(),
            apv: "123456".to_string(),
            status: status.to_string(),
            amount: amount.to_string(),
            currency: "USD".to_string(),
            return_params: String::new(),
        };
        let hash = self.gateway_signer().sign(&fields.values());
        (fields, hash)
    }

    /// Card-link callback for `context`, correctly signed
    pub fn link_signal(
        &self,
        context: &LinkContext,
        status: &str,
        token: &str,
    ) -> (CardLinkCallbackFields, String) {
        let fields = CardLinkCallbackFields {
            status: status.to_string(),
            payment_token: token.to_string(),
            masked_pan: "4111-XXXX-XXXX-1111".to_string(),
            card_type: "VISA".to_string(),
            return_param: encode_base64_json(context).unwrap(),
        };
        let hash = self.gateway_signer().sign(&fields.values());
        (fields, hash)
    }

    /// Active auto-renewing subscription, with a stored token when given
    pub async fn active_subscription(
        &self,
        profile: &Profile,
        tier: Tier,
        renewal_date: DateTime<Utc>,
        token: Option<&str>,
    ) -> Subscription {
        let mut sub = Subscription::new(profile.id, tier);
        sub.status = SubscriptionStatus::Active;
        sub.auto_renew = true;
        sub.renewal_date = Some(renewal_date);
        if let Some(token) = token {
            let method = PaymentMethod::new(profile.id, token, "visa");
            self.store.insert_payment_method(&method).await.unwrap();
            sub.payment_token_id = Some(method.id);
        }
        self.store.insert_subscription(&sub).await.unwrap();
        sub
    }
}

pub fn gateway_config() -> GatewayConfig {
    serde_yaml::from_str(&format!(
        "base_url: https://gateway.test\n\
         merchant_id: {}\n\
         api_key: {}\n\
         return_url: https://trip.test/callbacks/payment\n\
         link_return_url: https://trip.test/callbacks/card-link\n",
        TEST_MERCHANT, TEST_KEY
    ))
    .unwrap()
}

/// In-memory store that can be told to fail writes
///
/// Used to cut a flow between two of its writes.
pub struct FlakyStore {
    inner: InMemoryStore,
    skip_updates: AtomicUsize,
    failing_updates: AtomicUsize,
    failing_inserts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            skip_updates: AtomicUsize::new(0),
            failing_updates: AtomicUsize::new(0),
            failing_inserts: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` subscription updates
    pub fn fail_subscription_updates(&self, count: usize) {
        self.fail_subscription_updates_after(0, count);
    }

    /// Let `skip` subscription updates through, then fail `count`
    pub fn fail_subscription_updates_after(&self, skip: usize, count: usize) {
        self.skip_updates.store(skip, Ordering::SeqCst);
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` transaction inserts
    pub fn fail_transaction_inserts(&self, count: usize) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    fn take_fault(&self) -> bool {
        let skip = self
            .skip_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if skip.is_ok() {
            return false;
        }
        self.failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PaymentStore for FlakyStore {
    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, LedgerError> {
        self.inner.get_profile(id).await
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, LedgerError> {
        self.inner.find_profile_by_email(email).await
    }

    async fn find_profile_by_session(
        &self,
        session: &str,
    ) -> Result<Option<Profile>, LedgerError> {
        self.inner.find_profile_by_session(session).await
    }

    async fn insert_profile(&self, profile: &Profile) -> Result<(), LedgerError> {
        self.inner.insert_profile(profile).await
    }

    async fn update_profile(&self, profile: &Profile) -> Result<(), LedgerError> {
        self.inner.update_profile(profile).await
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, LedgerError> {
        self.inner.get_subscription(id).await
    }

    async fn subscription_for_profile(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<Subscription>, LedgerError> {
        self.inner.subscription_for_profile(profile_id).await
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), LedgerError> {
        self.inner.insert_subscription(subscription).await
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<(), LedgerError> {
        if self.take_fault() {
            return Err(LedgerError::DatabaseError("connection reset".to_string()));
        }
        self.inner.update_subscription(subscription).await
    }

    async fn due_subscriptions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Subscription>, LedgerError> {
        self.inner.due_subscriptions(now, limit).await
    }

    async fn claim_renewal(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        self.inner.claim_renewal(id, now, lease_until).await
    }

    async fn release_renewal_claim(&self, id: Uuid) -> Result<(), LedgerError> {
        self.inner.release_renewal_claim(id).await
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let failing = self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::DatabaseError("connection reset".to_string()));
        }
        self.inner.insert_transaction(tx).await
    }

    async fn get_transaction(&self, tran_id: &TranId) -> Result<Option<Transaction>, LedgerError> {
        self.inner.get_transaction(tran_id).await
    }

    async fn find_transaction_by_lookup_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.inner.find_transaction_by_lookup_key(key).await
    }

    async fn transition_transaction(
        &self,
        tran_id: &TranId,
        from: TransactionStatus,
        to: TransactionStatus,
        patch: Option<serde_json::Value>,
        note: Option<&str>,
    ) -> Result<bool, LedgerError> {
        self.inner
            .transition_transaction(tran_id, from, to, patch, note)
            .await
    }

    async fn note_transaction(
        &self,
        tran_id: &TranId,
        note: &str,
        patch: Option<serde_json::Value>,
    ) -> Result<bool, LedgerError> {
        self.inner.note_transaction(tran_id, note, patch).await
    }

    async fn insert_payment_method(&self, method: &PaymentMethod) -> Result<(), LedgerError> {
        self.inner.insert_payment_method(method).await
    }

    async fn default_payment_method(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<PaymentMethod>, LedgerError> {
        self.inner.default_payment_method(profile_id).await
    }

    async fn get_payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>, LedgerError> {
        self.inner.get_payment_method(id).await
    }
}
