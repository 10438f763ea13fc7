//! Public error taxonomy for the billing flows

use thiserror::Error;

use crate::config::ConfigError;
use crate::gateway_client::GatewayError;
use crate::ledger::LedgerError;
use crate::signing::SigningError;

#[derive(Error, Debug, Clone)]
pub enum PaymentError {
    #[error("Signature verification failed")]
    SignatureMismatch,

    #[error("Gateway rejected the request ({code}): {message}")]
    GatewayRejected { code: String, message: String },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("No payment token on file")]
    TokenMissing,

    #[error("Payment configuration error: {0}")]
    Misconfiguration(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("User not authenticated")]
    Unauthorized,

    #[error("Transaction belongs to another profile")]
    Forbidden,

    #[error(transparent)]
    Gateway(GatewayError),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl PaymentError {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::SignatureMismatch => "SIGNATURE_MISMATCH",
            PaymentError::GatewayRejected { .. } => "GATEWAY_REJECTED",
            PaymentError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            PaymentError::ProfileNotFound(_) => "PROFILE_NOT_FOUND",
            PaymentError::SubscriptionNotFound(_) => "SUBSCRIPTION_NOT_FOUND",
            PaymentError::TokenMissing => "TOKEN_MISSING",
            PaymentError::Misconfiguration(_) => "MISCONFIGURATION",
            PaymentError::InvalidRequest(_) => "INVALID_REQUEST",
            PaymentError::Unauthorized => "UNAUTHORIZED",
            PaymentError::Forbidden => "FORBIDDEN",
            PaymentError::Gateway(e) => e.code(),
            PaymentError::Ledger(e) => e.code(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            PaymentError::SignatureMismatch | PaymentError::InvalidRequest(_) => 400,
            PaymentError::Unauthorized => 401,
            PaymentError::GatewayRejected { .. } | PaymentError::TokenMissing => 402,
            PaymentError::Forbidden => 403,
            PaymentError::TransactionNotFound(_)
            | PaymentError::ProfileNotFound(_)
            | PaymentError::SubscriptionNotFound(_) => 404,
            PaymentError::Misconfiguration(_) => 500,
            PaymentError::Gateway(e) => e.http_status(),
            PaymentError::Ledger(e) => e.http_status(),
        }
    }
}

impl From<GatewayError> for PaymentError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Rejected { code, message } => {
                PaymentError::GatewayRejected { code, message }
            }
            other => PaymentError::Gateway(other),
        }
    }
}

impl From<LedgerError> for PaymentError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::TransactionNotFound(id) => PaymentError::TransactionNotFound(id),
            LedgerError::ProfileNotFound(id) => PaymentError::ProfileNotFound(id),
            LedgerError::SubscriptionNotFound(id) => PaymentError::SubscriptionNotFound(id),
            other => PaymentError::Ledger(other),
        }
    }
}

impl From<SigningError> for PaymentError {
    fn from(e: SigningError) -> Self {
        PaymentError::Misconfiguration(e.to_string())
    }
}

impl From<ConfigError> for PaymentError {
    fn from(e: ConfigError) -> Self {
        PaymentError::Misconfiguration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_rejection_maps_to_taxonomy() {
        let e: PaymentError = GatewayError::Rejected {
            code: "5".into(),
            message: "Invalid merchant".into(),
        }
        .into();
        assert_eq!(e.code(), "GATEWAY_REJECTED");
        assert_eq!(e.http_status(), 402);
        assert!(e.to_string().contains("Invalid merchant"));

        let timeout: PaymentError = GatewayError::Timeout.into();
        assert_eq!(timeout.code(), "GATEWAY_TIMEOUT");
        assert_eq!(timeout.http_status(), 504);
    }

    #[test]
    fn test_ledger_not_found_is_lifted() {
        let e: PaymentError = LedgerError::TransactionNotFound("TX".into()).into();
        assert!(matches!(e, PaymentError::TransactionNotFound(_)));
        assert_eq!(e.http_status(), 404);

        let db: PaymentError = LedgerError::DatabaseError("down".into()).into();
        assert_eq!(db.code(), "DATABASE_ERROR");
        assert_eq!(db.http_status(), 500);
    }

    #[test]
    fn test_signing_error_is_misconfiguration() {
        let e: PaymentError = SigningError::MissingKey.into();
        assert_eq!(e.code(), "MISCONFIGURATION");
    }
}
