use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::types::{Currency, Tier};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub renewal: RenewalConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    /// PostgreSQL ledger; in-memory store when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Page the browser lands on after a payment redirect
    #[serde(default = "default_result_page")]
    pub result_page_url: String,
}

fn default_result_page() -> String {
    "http://localhost:3000/billing/result".to_string()
}

/// Merchant credentials and gateway endpoints
#[derive(Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub merchant_id: String,
    pub api_key: String,
    #[serde(default = "default_purchase_path")]
    pub purchase_path: String,
    #[serde(default = "default_check_path")]
    pub check_path: String,
    #[serde(default = "default_link_card_path")]
    pub link_card_path: String,
    #[serde(default = "default_token_purchase_path")]
    pub token_purchase_path: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub return_url: String,
    #[serde(default)]
    pub cancel_url: String,
    #[serde(default)]
    pub continue_success_url: String,
    #[serde(default)]
    pub link_return_url: String,
    /// Minutes a QR or hosted checkout stays payable
    #[serde(default)]
    pub lifetime_minutes: Option<u32>,
}

fn default_purchase_path() -> String {
    "/api/payment-gateway/v1/payments/purchase".to_string()
}

fn default_check_path() -> String {
    "/api/payment-gateway/v1/payments/check-transaction-2".to_string()
}

fn default_link_card_path() -> String {
    "/api/payment-gateway/v1/cof/initial".to_string()
}

fn default_token_purchase_path() -> String {
    "/api/payment-gateway/v1/payments/purchase-by-token".to_string()
}

fn default_timeout_ms() -> u64 {
    15_000
}

impl GatewayConfig {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("merchant_id", &self.merchant_id)
            .field("api_key", &"<redacted>")
            .field("timeout_ms", &self.timeout_ms)
            .field("return_url", &self.return_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BillingConfig {
    pub interval_months: u32,
    pub currency: Currency,
    pub tiers: BTreeMap<Tier, Decimal>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert(Tier::Starter, Decimal::new(2900, 2));
        tiers.insert(Tier::Pro, Decimal::new(7900, 2));
        tiers.insert(Tier::Business, Decimal::new(19900, 2));
        Self {
            interval_months: 1,
            currency: Currency::Usd,
            tiers,
        }
    }
}

impl BillingConfig {
    /// Price of one billing interval; `None` for tiers that are not sold
    pub fn price_for(&self, tier: Tier) -> Option<Decimal> {
        self.tiers
            .get(&tier)
            .copied()
            .filter(|p| *p > Decimal::ZERO)
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RenewalConfig {
    pub cron_secret: String,
    pub batch_size: usize,
    pub claim_lease_secs: u64,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            cron_secret: String::new(),
            batch_size: 100,
            claim_lease_secs: 300,
        }
    }
}

impl fmt::Debug for RenewalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenewalConfig")
            .field("cron_secret", &"<redacted>")
            .field("batch_size", &self.batch_size)
            .field("claim_lease_secs", &self.claim_lease_secs)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Re-check verified webhooks against the gateway before settling
    pub confirm_webhooks_with_check: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            confirm_webhooks_with_check: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct IdentityConfig {
    pub auto_create_profiles: bool,
}

impl AppConfig {
    /// Read `config/<env>.yaml` and apply environment overrides
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Secrets come from the environment in deployed setups
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TRIPPAY_MERCHANT_ID") {
            self.gateway.merchant_id = v;
        }
        if let Some(v) = lookup("TRIPPAY_API_KEY") {
            self.gateway.api_key = v;
        }
        if let Some(v) = lookup("TRIPPAY_CRON_SECRET") {
            self.renewal.cron_secret = v;
        }
        if let Some(v) = lookup("DATABASE_URL") {
            self.postgres_url = Some(v);
        }
    }

    /// Fail fast instead of sending unsigned or malformed requests later
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.merchant_id.trim().is_empty() {
            return Err(ConfigError::Missing("gateway.merchant_id"));
        }
        if self.gateway.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("gateway.api_key"));
        }
        if self.gateway.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("gateway.base_url"));
        }
        if self.renewal.cron_secret.trim().is_empty() {
            return Err(ConfigError::Missing("renewal.cron_secret"));
        }
        if self.billing.interval_months == 0 {
            return Err(ConfigError::Invalid {
                field: "billing.interval_months",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.gateway.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "gateway.timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
