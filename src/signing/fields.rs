//! Signed field sets
//!
//! Each struct lists its fields in wire order. The order of
//! [`SignedFields::FIELD_NAMES`] and [`SignedFields::values`] is the contract
//! with the gateway: reordering or dropping an empty field yields a hash the
//! gateway rejects without saying why.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::engine::SignatureEngine;

/// Gateway request timestamp, UTC `YYYYMMDDHHmmss`
pub fn req_time(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

pub trait SignedFields {
    /// Wire names in signing order
    const FIELD_NAMES: &'static [&'static str];

    /// Values in signing order; empty values are kept
    fn values(&self) -> Vec<&str>;

    /// `(name, value)` pairs for a form or JSON body, in signing order
    fn pairs(&self) -> Vec<(&'static str, &str)> {
        Self::FIELD_NAMES.iter().copied().zip(self.values()).collect()
    }
}

/// A field set together with its computed `hash`
#[derive(Debug, Clone, PartialEq)]
pub struct Signed<F> {
    pub fields: F,
    pub hash: String,
}

impl<F: SignedFields> Signed<F> {
    pub fn new(engine: &SignatureEngine, fields: F) -> Self {
        let hash = engine.sign_fields(&fields);
        Self { fields, hash }
    }

    /// Body pairs in signing order, `hash` last
    pub fn form_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = self.fields.pairs();
        pairs.push(("hash", self.hash.as_str()));
        pairs
    }

    pub fn json_body(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .form_pairs()
            .into_iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// Purchase request (QR, deeplink or hosted checkout)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurchaseFields {
    pub req_time: String,
    pub merchant_id: String,
    pub tran_id: String,
    pub amount: String,
    pub items: String,
    pub shipping: String,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub phone: String,
    pub payment_type: String,
    pub payment_option: String,
    pub return_url: String,
    pub cancel_url: String,
    pub continue_success_url: String,
    pub return_deeplink: String,
    pub currency: String,
    pub custom_fields: String,
    pub return_params: String,
    pub payout: String,
    pub lifetime: String,
    pub additional_params: String,
    pub google_pay_token: String,
    pub skip_success_page: String,
}

impl SignedFields for PurchaseFields {
    const FIELD_NAMES: &'static [&'static str] = &[
        "req_time",
        "merchant_id",
        "tran_id",
        "amount",
        "items",
        "shipping",
        "firstname",
        "lastname",
        "email",
        "phone",
        "type",
        "payment_option",
        "return_url",
        "cancel_url",
        "continue_success_url",
        "return_deeplink",
        "currency",
        "custom_fields",
        "return_params",
        "payout",
        "lifetime",
        "additional_params",
        "google_pay_token",
        "skip_success_page",
    ];

    fn values(&self) -> Vec<&str> {
        vec![
            &self.req_time,
            &self.merchant_id,
            &self.tran_id,
            &self.amount,
            &self.items,
            &self.shipping,
            &self.firstname,
            &self.lastname,
            &self.email,
            &self.phone,
            &self.payment_type,
            &self.payment_option,
            &self.return_url,
            &self.cancel_url,
            &self.continue_success_url,
            &self.return_deeplink,
            &self.currency,
            &self.custom_fields,
            &self.return_params,
            &self.payout,
            &self.lifetime,
            &self.additional_params,
            &self.google_pay_token,
            &self.skip_success_page,
        ]
    }
}

/// Check-transaction request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckFields {
    pub req_time: String,
    pub merchant_id: String,
    pub tran_id: String,
}

impl SignedFields for CheckFields {
    const FIELD_NAMES: &'static [&'static str] = &["req_time", "merchant_id", "tran_id"];

    fn values(&self) -> Vec<&str> {
        vec![&self.req_time, &self.merchant_id, &self.tran_id]
    }
}

/// Zero-amount card link request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkCardFields {
    pub req_time: String,
    pub merchant_id: String,
    pub return_param: String,
    pub return_url: String,
    pub firstname: String,
    pub email: String,
}

impl SignedFields for LinkCardFields {
    const FIELD_NAMES: &'static [&'static str] = &[
        "req_time",
        "merchant_id",
        "return_param",
        "return_url",
        "firstname",
        "email",
    ];

    fn values(&self) -> Vec<&str> {
        vec![
            &self.req_time,
            &self.merchant_id,
            &self.return_param,
            &self.return_url,
            &self.firstname,
            &self.email,
        ]
    }
}

/// Charge against a stored card token
#[derive(Clone, Default, PartialEq)]
pub struct TokenPurchaseFields {
    pub req_time: String,
    pub merchant_id: String,
    pub tran_id: String,
    pub amount: String,
    pub currency: String,
    pub payment_token: String,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub return_params: String,
}

impl std::fmt::Debug for TokenPurchaseFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPurchaseFields")
            .field("tran_id", &self.tran_id)
            .field("amount", &self.amount)
            .field("currency", &self.currency)
            .field(
                "payment_token",
                &crate::ledger::types::mask_token(&self.payment_token),
            )
            .finish_non_exhaustive()
    }
}

impl SignedFields for TokenPurchaseFields {
    const FIELD_NAMES: &'static [&'static str] = &[
        "req_time",
        "merchant_id",
        "tran_id",
        "amount",
        "currency",
        "payment_token",
        "firstname",
        "lastname",
        "email",
        "return_params",
    ];

    fn values(&self) -> Vec<&str> {
        vec![
            &self.req_time,
            &self.merchant_id,
            &self.tran_id,
            &self.amount,
            &self.currency,
            &self.payment_token,
            &self.firstname,
            &self.lastname,
            &self.email,
            &self.return_params,
        ]
    }
}

/// Payment result pushed by the gateway (redirect query or webhook body)
///
/// Missing fields deserialize as empty strings so they keep their slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentCallbackFields {
    #[serde(deserialize_with = "string_or_number")]
    pub tran_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub apv: String,
    #[serde(deserialize_with = "string_or_number")]
    pub status: String,
    #[serde(deserialize_with = "string_or_number")]
    pub amount: String,
    #[serde(deserialize_with = "string_or_number")]
    pub currency: String,
    #[serde(deserialize_with = "string_or_number")]
    pub return_params: String,
}

impl SignedFields for PaymentCallbackFields {
    const FIELD_NAMES: &'static [&'static str] = &[
        "tran_id",
        "apv",
        "status",
        "amount",
        "currency",
        "return_params",
    ];

    fn values(&self) -> Vec<&str> {
        vec![
            &self.tran_id,
            &self.apv,
            &self.status,
            &self.amount,
            &self.currency,
            &self.return_params,
        ]
    }
}

/// Card token delivered after a link request
#[derive(Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CardLinkCallbackFields {
    #[serde(deserialize_with = "string_or_number")]
    pub status: String,
    #[serde(deserialize_with = "string_or_number")]
    pub payment_token: String,
    #[serde(deserialize_with = "string_or_number")]
    pub masked_pan: String,
    #[serde(deserialize_with = "string_or_number")]
    pub card_type: String,
    #[serde(deserialize_with = "string_or_number")]
    pub return_param: String,
}

impl std::fmt::Debug for CardLinkCallbackFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardLinkCallbackFields")
            .field("status", &self.status)
            .field(
                "payment_token",
                &crate::ledger::types::mask_token(&self.payment_token),
            )
            .field("masked_pan", &self.masked_pan)
            .field("card_type", &self.card_type)
            .finish_non_exhaustive()
    }
}

impl SignedFields for CardLinkCallbackFields {
    const FIELD_NAMES: &'static [&'static str] = &[
        "status",
        "payment_token",
        "masked_pan",
        "card_type",
        "return_param",
    ];

    fn values(&self) -> Vec<&str> {
        vec![
            &self.status,
            &self.payment_token,
            &self.masked_pan,
            &self.card_type,
            &self.return_param,
        ]
    }
}

/// JSON webhooks send numbers for `status` and `amount`; forms send text.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
        Null,
    }

    // Numbers keep the text the sender signed, e.g. `29.5` stays "29.5"
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
        Raw::Null => String::new(),
    })
}
