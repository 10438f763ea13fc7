//! API response envelope, error mapping and request/response DTOs

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::gateway_client::PaymentArtifacts;
use crate::ledger::types::format_amount;
use crate::ledger::{Currency, Tier, Transaction};
use crate::renewal::{RenewalReport, RenewalStatus};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: payload on success, absent on error
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    #[schema(example = 0)]
    pub code: i32,
    #[schema(example = "ok")]
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

// ============================================================================
// Error Codes
// ============================================================================

pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const SIGNATURE_MISMATCH: i32 = 1002;

    // Auth errors (2xxx)
    pub const UNAUTHORIZED: i32 = 2001;
    pub const FORBIDDEN: i32 = 2003;

    // Payment errors (3xxx)
    pub const GATEWAY_REJECTED: i32 = 3001;
    pub const TOKEN_MISSING: i32 = 3002;
    pub const RENEWAL_IN_PROGRESS: i32 = 3009;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4004;
    pub const CONFLICT: i32 = 4009;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const GATEWAY_UNAVAILABLE: i32 = 5002;
    pub const GATEWAY_TIMEOUT: i32 = 5004;
}

/// Numeric API code for a payment error
pub fn api_code(err: &PaymentError) -> i32 {
    use error_codes::*;
    match err.http_status() {
        400 if matches!(err, PaymentError::SignatureMismatch) => SIGNATURE_MISMATCH,
        400 => INVALID_PARAMETER,
        401 => UNAUTHORIZED,
        402 if matches!(err, PaymentError::TokenMissing) => TOKEN_MISSING,
        402 => GATEWAY_REJECTED,
        403 => FORBIDDEN,
        404 => NOT_FOUND,
        409 => CONFLICT,
        502 => GATEWAY_UNAVAILABLE,
        504 => GATEWAY_TIMEOUT,
        _ => INTERNAL_ERROR,
    }
}

fn status_of(err: &PaymentError) -> StatusCode {
    StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Error returned by the JSON API handlers
///
/// Client errors carry their reason; server errors are logged and answered
/// with a generic message.
#[derive(Debug)]
pub struct ApiError(pub PaymentError);

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        ApiError(e)
    }
}

impl From<crate::ledger::LedgerError> for ApiError {
    fn from(e: crate::ledger::LedgerError) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        let msg = if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "Request failed");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(ApiResponse::error(api_code(&self.0), msg))).into_response()
    }
}

/// Error returned to gateway callbacks: a code and nothing else
#[derive(Debug)]
pub struct CallbackRejection(pub PaymentError);

impl From<PaymentError> for CallbackRejection {
    fn from(e: PaymentError) -> Self {
        CallbackRejection(e)
    }
}

impl IntoResponse for CallbackRejection {
    fn into_response(self) -> Response {
        tracing::warn!(code = self.0.code(), error = %self.0, "Callback rejected");
        (
            status_of(&self.0),
            Json(ApiResponse::error(api_code(&self.0), "rejected")),
        )
            .into_response()
    }
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Checkout request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutBody {
    /// Plan to buy; its configured price is charged
    #[schema(value_type = Option<String>, example = "starter")]
    pub tier: Option<Tier>,
    /// One-off amount, used only without a tier
    #[schema(value_type = Option<String>, example = "120.50")]
    pub amount: Option<Decimal>,
    #[schema(value_type = Option<String>, example = "USD")]
    pub currency: Option<Currency>,
    #[schema(example = "abapay_khqr")]
    pub payment_option: Option<String>,
    pub phone: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub return_context: Option<serde_json::Value>,
}

/// Card link request body
#[derive(Debug, Deserialize, ToSchema)]
pub struct LinkCardBody {
    #[schema(value_type = String, example = "pro")]
    pub tier: Tier,
}

/// Renewal trigger query
#[derive(Debug, Default, Deserialize)]
pub struct CronQuery {
    pub secret: Option<String>,
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutData {
    #[schema(example = "01JH8ZK3V4R8N2T5Q6W7X9Y0AB")]
    pub tran_id: String,
    #[schema(example = "29.00")]
    pub amount: String,
    #[schema(example = "USD")]
    pub currency: String,
    #[schema(example = "pending")]
    pub status: String,
    /// QR string, QR image, deeplink or hosted checkout URL
    #[schema(value_type = Object)]
    pub artifacts: PaymentArtifacts,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LinkCardData {
    pub subscription_id: Uuid,
    /// Hosted page where the payer enters card details
    pub link_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusData {
    pub tran_id: String,
    #[schema(example = "completed")]
    pub status: String,
    #[schema(example = "29.00")]
    pub amount: String,
    #[schema(example = "USD")]
    pub currency: String,
    #[schema(example = "purchase")]
    pub kind: String,
    #[schema(example = "starter")]
    pub tier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Transaction> for PaymentStatusData {
    fn from(tx: &Transaction) -> Self {
        Self {
            tran_id: tx.tran_id.to_string(),
            status: tx.status.to_string(),
            amount: format_amount(tx.amount),
            currency: tx.currency.to_string(),
            kind: tx.kind.as_str().to_string(),
            tier: tx.tier.map(|t| t.as_str().to_string()),
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

/// Acknowledgement sent back to the gateway
#[derive(Debug, Serialize, ToSchema)]
pub struct CallbackAck {
    pub tran_id: String,
    #[schema(example = "completed")]
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CardLinkAck {
    pub subscription_id: Uuid,
    #[schema(example = "activated")]
    pub outcome: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RenewalItemData {
    pub subscription_id: Uuid,
    #[schema(example = "renewed")]
    pub status: String,
    pub reason: Option<String>,
    pub tran_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RenewalRunData {
    pub run_at: DateTime<Utc>,
    pub renewed: usize,
    pub past_due: usize,
    pub skipped: usize,
    pub errored: usize,
    pub items: Vec<RenewalItemData>,
}

impl From<&RenewalReport> for RenewalRunData {
    fn from(report: &RenewalReport) -> Self {
        let items = report
            .items
            .iter()
            .map(|item| {
                let (status, reason) = match &item.status {
                    RenewalStatus::Renewed => ("renewed", None),
                    RenewalStatus::PastDue(r) => ("past_due", Some(r.clone())),
                    RenewalStatus::Skipped(r) => ("skipped", Some(r.clone())),
                    RenewalStatus::Errored(r) => ("errored", Some(r.clone())),
                };
                RenewalItemData {
                    subscription_id: item.subscription_id,
                    status: status.to_string(),
                    reason,
                    tran_id: item.tran_id.as_ref().map(|t| t.to_string()),
                }
            })
            .collect();
        Self {
            run_at: report.run_at,
            renewed: report.renewed(),
            past_due: report.past_due(),
            skipped: report.skipped(),
            errored: report.errored(),
            items,
        }
    }
}
