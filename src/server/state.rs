use std::sync::Arc;

use crate::checkout::CheckoutInitiator;
use crate::config::AppConfig;
use crate::error::PaymentError;
use crate::gateway_client::PaymentGateway;
use crate::identity::IdentityResolver;
use crate::ledger::{Ledger, PaymentStore};
use crate::merchant::Merchant;
use crate::reconcile::CallbackReconciler;
use crate::renewal::RenewalScheduler;
use crate::tokenization::TokenizationFlow;

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub checkout: Arc<CheckoutInitiator>,
    pub tokenization: Arc<TokenizationFlow>,
    pub reconciler: Arc<CallbackReconciler>,
    pub renewals: Arc<RenewalScheduler>,
    pub identity: Arc<IdentityResolver>,
    /// Frontend page the payment redirect lands on
    pub result_page_url: String,
    /// Shared secret of the renewal trigger
    cron_secret: String,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<Ledger>,
        checkout: Arc<CheckoutInitiator>,
        tokenization: Arc<TokenizationFlow>,
        reconciler: Arc<CallbackReconciler>,
        renewals: Arc<RenewalScheduler>,
        identity: Arc<IdentityResolver>,
        result_page_url: String,
        cron_secret: String,
    ) -> Self {
        Self {
            ledger,
            checkout,
            tokenization,
            reconciler,
            renewals,
            identity,
            result_page_url,
            cron_secret,
        }
    }

    /// Wire every service from one validated configuration
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, PaymentError> {
        let merchant = Merchant::new(Arc::new(config.gateway.clone()), gateway)?;
        let billing = Arc::new(config.billing.clone());
        let ledger = Arc::new(Ledger::new(store.clone(), billing.interval_months));

        let checkout = Arc::new(CheckoutInitiator::new(
            merchant.clone(),
            ledger.clone(),
            billing.clone(),
        ));
        let tokenization = Arc::new(TokenizationFlow::new(
            merchant.clone(),
            ledger.clone(),
            billing,
        ));
        let reconciler = Arc::new(CallbackReconciler::new(
            merchant,
            ledger.clone(),
            config.reconcile.clone(),
        ));
        let renewals = Arc::new(RenewalScheduler::new(
            ledger.clone(),
            tokenization.clone(),
            config.renewal.clone(),
        ));
        let identity = Arc::new(IdentityResolver::from_config(&config.identity, store));

        Ok(Self::new(
            ledger,
            checkout,
            tokenization,
            reconciler,
            renewals,
            identity,
            config.server.result_page_url.clone(),
            config.renewal.cron_secret.clone(),
        ))
    }

    /// Constant-time comparison against the configured cron secret
    ///
    /// An unset secret never matches.
    pub fn cron_secret_matches(&self, candidate: &str) -> bool {
        use subtle::ConstantTimeEq;

        if self.cron_secret.is_empty() {
            return false;
        }
        self.cron_secret
            .as_bytes()
            .ct_eq(candidate.as_bytes())
            .into()
    }
}
