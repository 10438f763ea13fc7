//! Transaction ledger
//!
//! State machine and persistence contract for payment attempts.
//!
//! ```text
//! checkout ──► PENDING ──► COMPLETED ──► REFUNDED
//!                 │
//!                 └──────► FAILED
//! ```
//!
//! Token charges are inserted directly as COMPLETED or FAILED.

pub mod db;
pub mod error;
pub mod memory;
pub mod service;
pub mod state;
pub mod store;
pub mod types;

pub use db::PgPaymentStore;
pub use error::LedgerError;
pub use memory::InMemoryStore;
pub use service::{Ledger, Transition};
pub use state::{SubscriptionStatus, TransactionStatus};
pub use store::PaymentStore;
pub use types::{
    Currency, PaymentMethod, Profile, Subscription, Tier, TranId, Transaction, TransactionKind,
};
