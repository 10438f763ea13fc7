//! Ledger error types

use thiserror::Error;

/// Errors raised by the payment store and the ledger service
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Payment method not found: {0}")]
    PaymentMethodNotFound(String),

    #[error("Duplicate transaction id: {0}")]
    DuplicateTransaction(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::SubscriptionNotFound(_) => "SUBSCRIPTION_NOT_FOUND",
            LedgerError::ProfileNotFound(_) => "PROFILE_NOT_FOUND",
            LedgerError::PaymentMethodNotFound(_) => "PAYMENT_METHOD_NOT_FOUND",
            LedgerError::DuplicateTransaction(_) => "DUPLICATE_TRANSACTION",
            LedgerError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            LedgerError::CorruptRow(_) => "CORRUPT_ROW",
            LedgerError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::TransactionNotFound(_)
            | LedgerError::SubscriptionNotFound(_)
            | LedgerError::ProfileNotFound(_)
            | LedgerError::PaymentMethodNotFound(_) => 404,
            LedgerError::DuplicateTransaction(_) | LedgerError::InvalidStateTransition(_) => 409,
            LedgerError::CorruptRow(_) | LedgerError::DatabaseError(_) => 500,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                LedgerError::DuplicateTransaction(db.message().to_string())
            }
            _ => LedgerError::DatabaseError(e.to_string()),
        }
    }
}
