//! Checkout initiator
//!
//! Builds and signs a purchase request, submits it, and records a pending
//! transaction only once the gateway has accepted it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::PaymentError;
use crate::gateway_client::PaymentArtifacts;
use crate::ledger::types::{format_amount, merge_metadata};
use crate::ledger::{
    Currency, Ledger, Tier, TranId, Transaction, TransactionKind, TransactionStatus,
};
use crate::merchant::{Merchant, encode_base64_json};
use crate::signing::{PurchaseFields, req_time};

/// Payment option used when the caller does not pick one (KHQR / deeplink)
pub const DEFAULT_PAYMENT_OPTION: &str = "abapay_khqr";

#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    /// Plan being bought; its price comes from billing config
    pub tier: Option<Tier>,
    /// One-off amount, only used without a tier
    pub amount: Option<Decimal>,
    pub currency: Option<Currency>,
    pub payment_option: Option<String>,
    pub phone: Option<String>,
    /// Caller-supplied context echoed back on callbacks
    pub return_context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutResult {
    pub tran_id: TranId,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub artifacts: PaymentArtifacts,
}

#[derive(Serialize)]
struct Item<'a> {
    name: &'a str,
    quantity: u32,
    price: String,
}

#[derive(Serialize)]
struct ReturnParams<'a> {
    tran_id: &'a str,
    profile_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a serde_json::Value>,
}

pub struct CheckoutInitiator {
    merchant: Merchant,
    ledger: Arc<Ledger>,
    billing: Arc<BillingConfig>,
}

impl CheckoutInitiator {
    pub fn new(merchant: Merchant, ledger: Arc<Ledger>, billing: Arc<BillingConfig>) -> Self {
        Self {
            merchant,
            ledger,
            billing,
        }
    }

    pub async fn initiate(
        &self,
        profile_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutResult, PaymentError> {
        self.initiate_at(profile_id, request, Utc::now()).await
    }

    pub async fn initiate_at(
        &self,
        profile_id: Uuid,
        request: CheckoutRequest,
        now: DateTime<Utc>,
    ) -> Result<CheckoutResult, PaymentError> {
        let (amount, item_name) = self.price(&request)?;
        let currency = self.currency(&request)?;
        let payment_option = request
            .payment_option
            .clone()
            .filter(|o| !o.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PAYMENT_OPTION.to_string());

        let profile = self
            .ledger
            .store()
            .get_profile(profile_id)
            .await?
            .ok_or_else(|| PaymentError::ProfileNotFound(profile_id.to_string()))?;

        // The intent exists before the gateway can hand out a payable QR
        let subscription = match request.tier {
            Some(tier) => Some(self.ledger.ensure_subscription(profile_id, tier).await?),
            None => None,
        };

        let tran_id = TranId::generate();
        let items = encode_base64_json(&[Item {
            name: &item_name,
            quantity: 1,
            price: format_amount(amount),
        }])?;
        let return_params = encode_base64_json(&ReturnParams {
            tran_id: tran_id.as_str(),
            profile_id,
            tier: request.tier,
            context: request.return_context.as_ref(),
        })?;

        let gateway = self.merchant.config();
        let fields = PurchaseFields {
            req_time: req_time(now),
            merchant_id: self.merchant.merchant_id().to_string(),
            tran_id: tran_id.to_string(),
            amount: format_amount(amount),
            items,
            firstname: profile.first_name.clone(),
            lastname: profile.last_name.clone(),
            email: profile.email.clone(),
            phone: request.phone.clone().unwrap_or_else(|| profile.phone.clone()),
            payment_type: "purchase".to_string(),
            payment_option: payment_option.clone(),
            return_url: gateway.return_url.clone(),
            cancel_url: gateway.cancel_url.clone(),
            continue_success_url: gateway.continue_success_url.clone(),
            currency: currency.to_string(),
            return_params,
            lifetime: gateway
                .lifetime_minutes
                .map(|m| m.to_string())
                .unwrap_or_default(),
            ..Default::default()
        };

        let signed = self.merchant.sign(fields);
        let ack = match self.merchant.gateway().purchase(&signed).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(tran_id = %tran_id, error = %e, "Checkout not accepted, nothing recorded");
                return Err(e.into());
            }
        };

        let mut tx = Transaction::new(
            tran_id.clone(),
            profile_id,
            amount,
            currency,
            TransactionKind::Purchase,
            TransactionStatus::Pending,
        )
        .with_payment_option(payment_option)
        .with_metadata(merge_metadata(
            &serde_json::Value::Null,
            "purchase_ack",
            ack.raw.clone(),
        ));

        if let (Some(tier), Some(sub)) = (request.tier, &subscription) {
            tx = tx.with_tier(tier).with_subscription(sub.id);
        }

        if let Err(e) = self.ledger.record_pending(tx).await {
            error!(
                tran_id = %tran_id,
                profile_id = %profile_id,
                amount = %amount,
                currency = %currency,
                ack = ?ack.raw,
                error = %e,
                "Checkout accepted by gateway but not recorded"
            );
            return Err(e.into());
        }
        info!(
            tran_id = %tran_id,
            profile_id = %profile_id,
            amount = %amount,
            currency = %currency,
            "Checkout accepted by gateway"
        );

        Ok(CheckoutResult {
            tran_id,
            amount,
            currency,
            status: TransactionStatus::Pending,
            artifacts: ack.artifacts,
        })
    }

    /// Tier prices are in the billing currency and cannot be re-denominated
    fn currency(&self, request: &CheckoutRequest) -> Result<Currency, PaymentError> {
        match (request.tier, request.currency) {
            (Some(tier), Some(currency)) if currency != self.billing.currency => {
                Err(PaymentError::InvalidRequest(format!(
                    "tier {} is billed in {}, not {}",
                    tier, self.billing.currency, currency
                )))
            }
            (_, currency) => Ok(currency.unwrap_or(self.billing.currency)),
        }
    }

    fn price(&self, request: &CheckoutRequest) -> Result<(Decimal, String), PaymentError> {
        if let Some(tier) = request.tier {
            let price = self.billing.price_for(tier).ok_or_else(|| {
                PaymentError::InvalidRequest(format!("tier {} is not for sale", tier))
            })?;
            return Ok((price, format!("{} plan", tier)));
        }

        match request.amount {
            Some(amount) if amount > Decimal::ZERO && amount.scale() <= 2 => {
                Ok((amount, "Trip booking".to_string()))
            }
            Some(_) => Err(PaymentError::InvalidRequest(
                "amount must be positive with at most two decimals".to_string(),
            )),
            None => Err(PaymentError::InvalidRequest(
                "either tier or amount is required".to_string(),
            )),
        }
    }
}
