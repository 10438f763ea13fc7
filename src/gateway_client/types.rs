//! Gateway response shapes
//!
//! The gateway reports status either as a bare number, a numeric string or a
//! `{code, message}` object. [`RawStatus`] captures all three and
//! [`RawStatus::normalize`] is the only place that looks at the difference.

use serde::{Deserialize, Serialize};

use crate::signing::fields::string_or_number;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawStatus {
    Numeric(i64),
    Text(String),
    Structured {
        #[serde(deserialize_with = "string_or_number")]
        code: String,
        #[serde(default)]
        message: String,
    },
}

impl RawStatus {
    pub fn normalize(&self) -> GatewayStatus {
        match self {
            RawStatus::Numeric(n) => GatewayStatus {
                code: n.to_string(),
                message: String::new(),
            },
            RawStatus::Text(s) => GatewayStatus {
                code: s.trim().to_string(),
                message: String::new(),
            },
            RawStatus::Structured { code, message } => GatewayStatus {
                code: code.trim().to_string(),
                message: message.clone(),
            },
        }
    }
}

/// Normalized envelope status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub code: String,
    pub message: String,
}

impl GatewayStatus {
    pub fn success() -> Self {
        Self {
            code: "00".to_string(),
            message: "Success!".to_string(),
        }
    }

    pub fn numeric_code(&self) -> Option<i64> {
        self.code.parse().ok()
    }

    /// `"00"`, `"0"` and `0` all mean accepted
    pub fn is_success(&self) -> bool {
        self.numeric_code() == Some(0)
    }
}

/// Channel artifacts returned with an accepted purchase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentArtifacts {
    #[serde(default, alias = "qrString", skip_serializing_if = "Option::is_none")]
    pub qr_string: Option<String>,
    #[serde(default, alias = "qrImage", skip_serializing_if = "Option::is_none")]
    pub qr_image: Option<String>,
    #[serde(default, alias = "abapay_deeplink", skip_serializing_if = "Option::is_none")]
    pub deeplink: Option<String>,
    #[serde(default, alias = "checkout_qr_url", skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PurchaseEnvelope {
    pub status: RawStatus,
    #[serde(flatten)]
    pub artifacts: PaymentArtifacts,
}

/// Accepted purchase acknowledgment
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseAck {
    pub status: GatewayStatus,
    pub artifacts: PaymentArtifacts,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct CheckData {
    #[serde(default)]
    pub payment_status_code: Option<i64>,
    #[serde(default)]
    pub payment_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CheckEnvelope {
    pub status: RawStatus,
    #[serde(default)]
    pub data: Option<CheckData>,
}

/// Authoritative payment status from a check-transaction call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Approved,
    Declined(String),
    Pending(String),
}

impl CheckOutcome {
    /// Map a payment status code
    ///
    /// 0 approved, 1 created, 2 pending, 3 declined, 4 refunded, 7 cancelled.
    /// Anything else stays pending.
    pub fn from_payment_code(code: Option<i64>, label: Option<&str>) -> Self {
        match code {
            Some(0) => CheckOutcome::Approved,
            Some(1) | Some(2) => CheckOutcome::Pending(
                label.unwrap_or("payment not completed yet").to_string(),
            ),
            Some(3) => CheckOutcome::Declined(label.unwrap_or("declined").to_string()),
            Some(4) => CheckOutcome::Declined("refunded".to_string()),
            Some(7) => CheckOutcome::Declined("cancelled".to_string()),
            Some(other) => CheckOutcome::Pending(format!("unknown payment status code {}", other)),
            None => CheckOutcome::Pending("no payment status in response".to_string()),
        }
    }
}

/// Parsed check-transaction response
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub outcome: CheckOutcome,
    pub raw: serde_json::Value,
}

impl CheckResult {
    /// `data.payment_status_code` wins; legacy responses carry the payment
    /// status in the envelope itself.
    pub(crate) fn from_envelope(envelope: CheckEnvelope, raw: serde_json::Value) -> Self {
        let data = envelope.data.unwrap_or_default();
        let code = data
            .payment_status_code
            .or_else(|| envelope.status.normalize().numeric_code());
        Self {
            outcome: CheckOutcome::from_payment_code(code, data.payment_status.as_deref()),
            raw,
        }
    }
}

/// Accepted card-link request
#[derive(Debug, Clone, PartialEq)]
pub struct LinkCardAck {
    pub status: GatewayStatus,
    /// Hosted page where the payer enters the card
    pub link_url: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LinkCardEnvelope {
    pub status: RawStatus,
    #[serde(default, alias = "checkout_url", alias = "url")]
    pub link_url: Option<String>,
}

/// Outcome of a token charge that reached the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeResult {
    pub approved: bool,
    pub status: GatewayStatus,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChargeEnvelope {
    pub status: RawStatus,
    #[serde(default)]
    pub data: Option<CheckData>,
}

impl ChargeResult {
    pub(crate) fn from_envelope(envelope: ChargeEnvelope, raw: serde_json::Value) -> Self {
        let status = envelope.status.normalize();
        let payment_code = envelope.data.and_then(|d| d.payment_status_code);
        Self {
            approved: status.is_success() && payment_code.is_none_or(|c| c == 0),
            status,
            raw,
        }
    }
}
