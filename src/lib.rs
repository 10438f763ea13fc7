//! trippay - payment gateway integration for the travel marketplace
//!
//! Subscription billing against a hosted card/QR gateway: signed purchase
//! requests, card tokenization, callback reconciliation and scheduled
//! renewals over a single transaction ledger.
//!
//! # Modules
//!
//! - [`signing`] - HMAC-SHA512 request and callback signatures
//! - [`ledger`] - Transaction state machine and persistence
//! - [`gateway_client`] - Outbound gateway calls
//! - [`merchant`] - Merchant credentials bound to a gateway client
//! - [`checkout`] - One-off hosted checkout
//! - [`tokenization`] - Card linking and token charges
//! - [`reconcile`] - Redirect, webhook and check reconciliation
//! - [`renewal`] - Batch renewal of due subscriptions
//! - [`identity`] - Caller profile resolution
//! - [`server`] - HTTP routes

pub mod checkout;
pub mod config;
pub mod error;
pub mod gateway_client;
pub mod identity;
pub mod ledger;
pub mod logging;
pub mod merchant;
pub mod reconcile;
pub mod renewal;
pub mod server;
pub mod signing;
pub mod tokenization;

#[cfg(test)]
mod test_support;

// Convenient re-exports at crate root
pub use checkout::{CheckoutInitiator, CheckoutRequest, CheckoutResult};
pub use config::AppConfig;
pub use error::PaymentError;
pub use gateway_client::{HttpGateway, PaymentGateway};
pub use ledger::{Ledger, PaymentStore, TranId, TransactionStatus};
pub use merchant::Merchant;
pub use reconcile::{CallbackReconciler, ReconcileOutcome};
pub use renewal::{RenewalReport, RenewalScheduler};
pub use signing::SignatureEngine;
pub use tokenization::TokenizationFlow;
