//! Ledger core types
//!
//! Rows this subsystem reads and writes: profiles, subscriptions,
//! transactions and stored payment tokens.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{SubscriptionStatus, TransactionStatus};

/// Caller-generated transaction reference (ULID)
///
/// Correlates the purchase request with every callback and check for the
/// same payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranId(String);

impl TranId {
    /// Generate a fresh reference
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reference of the renewal charge for one billing period
    ///
    /// Derived from the subscription and the renewal date being paid, so a
    /// retried run settles the same charge instead of creating a second one.
    pub fn for_renewal(subscription_id: Uuid, period: DateTime<Utc>) -> Self {
        Self(format!(
            "{}{}",
            ulid::Ulid(subscription_id.as_u128()),
            period.format("%Y%m%d%H%M%S")
        ))
    }

    /// Secondary lookup key used when an echoed id does not match verbatim
    pub fn lookup_key(&self) -> String {
        lookup_key(&self.0)
    }
}

impl fmt::Display for TranId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TranId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TranId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Canonical form of a tran_id: uppercase, without whitespace or hyphens.
///
/// Gateways and browsers have been seen to lowercase, pad or dash-split the
/// reference on the way back.
pub fn lookup_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect()
}

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Starter,
    Pro,
    Business,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Starter => "starter",
            Tier::Pro => "pro",
            Tier::Business => "business",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "starter" => Ok(Tier::Starter),
            "pro" => Ok(Tier::Pro),
            "business" => Ok(Tier::Business),
            _ => Err(format!("Invalid tier: {}", s)),
        }
    }
}

/// Settlement currency accepted by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Usd,
    Khr,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Khr => "KHR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "KHR" => Ok(Currency::Khr),
            _ => Err(format!("Unsupported currency: {}", s)),
        }
    }
}

/// Format an amount the way the gateway expects it: two decimal places
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// Buyer profile (only the fields billing needs)
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    /// Opaque session token issued by the auth layer
    pub session_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            first_name: String::new(),
            last_name: String::new(),
            phone: String::new(),
            session_token: None,
            created_at: Utc::now(),
        }
    }
}

/// Recurring plan for one profile
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub renewal_date: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub payment_token_id: Option<Uuid>,
    /// Set while a renewal run holds this subscription
    pub renewal_claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// New subscription in `created` (signup or upgrade intent)
    pub fn new(profile_id: Uuid, tier: Tier) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            profile_id,
            tier,
            status: SubscriptionStatus::Created,
            renewal_date: None,
            auto_renew: false,
            payment_token_id: None,
            renewal_claimed_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Active, auto-renewing and inside the renewal window
    pub fn is_renewal_due(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && self.auto_renew
            && self.renewal_date.is_some_and(|d| d <= now)
    }

    /// Eligible and not held by another run
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.is_renewal_due(now) && self.renewal_claimed_until.is_none_or(|until| until <= now)
    }
}

/// Which flow created a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// One-shot checkout (QR, deeplink or hosted page)
    Purchase,
    /// First charge right after a card token is linked
    TokenCharge,
    /// Scheduled recurring charge
    Renewal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::TokenCharge => "token_charge",
            TransactionKind::Renewal => "renewal",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(TransactionKind::Purchase),
            "token_charge" => Ok(TransactionKind::TokenCharge),
            "renewal" => Ok(TransactionKind::Renewal),
            _ => Err(format!("Invalid transaction kind: {}", s)),
        }
    }
}

/// One payment attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub tran_id: TranId,
    /// Canonical form of `tran_id` (secondary lookup)
    pub lookup_key: String,
    pub profile_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub kind: TransactionKind,
    pub payment_option: String,
    pub tier: Option<Tier>,
    /// Raw gateway payloads kept for audit
    pub metadata: serde_json::Value,
    /// Last reconciliation note (why it is still pending, decline reason)
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        tran_id: TranId,
        profile_id: Uuid,
        amount: Decimal,
        currency: Currency,
        kind: TransactionKind,
        status: TransactionStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            lookup_key: tran_id.lookup_key(),
            tran_id,
            profile_id,
            subscription_id: None,
            amount,
            currency,
            status,
            kind,
            payment_option: String::new(),
            tier: None,
            metadata: serde_json::Value::Object(Default::default()),
            note: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_subscription(mut self, subscription_id: Uuid) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_payment_option(mut self, payment_option: impl Into<String>) -> Self {
        self.payment_option = payment_option.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Merge `extra` into `base` under `key`, keeping earlier payloads
pub fn merge_metadata(
    base: &serde_json::Value,
    key: &str,
    extra: serde_json::Value,
) -> serde_json::Value {
    let mut merged = base.clone();
    apply_metadata_patch(&mut merged, metadata_patch(key, extra));
    merged
}

/// `{ key: payload }`, the unit the stores merge into the audit bag
pub fn metadata_patch(key: &str, payload: serde_json::Value) -> serde_json::Value {
    let mut patch = serde_json::Map::new();
    patch.insert(key.to_string(), payload);
    serde_json::Value::Object(patch)
}

/// Top-level keys of `patch` overwrite those of `target`; others are kept
///
/// Same result as PostgreSQL's `jsonb || jsonb` on two objects.
pub fn apply_metadata_patch(target: &mut serde_json::Value, patch: serde_json::Value) {
    let serde_json::Value::Object(patch) = patch else {
        return;
    };
    if !target.is_object() {
        *target = serde_json::Value::Object(serde_json::Map::new());
    }
    if let serde_json::Value::Object(map) = target {
        map.extend(patch);
    }
}

/// Stored card-on-file token
#[derive(Clone, PartialEq)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub token: String,
    pub method_type: String,
    pub masked_pan: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl PaymentMethod {
    pub fn new(profile_id: Uuid, token: impl Into<String>, method_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            profile_id,
            token: token.into(),
            method_type: method_type.into(),
            masked_pan: None,
            is_default: true,
            created_at: Utc::now(),
        }
    }

    /// Token tail safe for logs
    pub fn masked_token(&self) -> String {
        mask_token(&self.token)
    }
}

impl fmt::Debug for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentMethod")
            .field("id", &self.id)
            .field("profile_id", &self.profile_id)
            .field("token", &self.masked_token())
            .field("method_type", &self.method_type)
            .field("masked_pan", &self.masked_pan)
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// `****` + last four characters
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("****{}", tail)
}
