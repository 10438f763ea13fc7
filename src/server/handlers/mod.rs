//! HTTP handlers
//!
//! - `health`: liveness
//! - `checkout`: checkout and card-link initiation (identity resolved)
//! - `payments`: status query and explicit re-check (owner only)
//! - `callbacks`: gateway redirect, webhook and card-link deliveries
//! - `cron`: renewal trigger guarded by a shared secret

pub mod callbacks;
pub mod checkout;
pub mod cron;
pub mod health;
pub mod payments;

pub use callbacks::{card_link_get, card_link_post, payment_return, payment_webhook};
pub use checkout::{create_checkout, link_card};
pub use cron::{run_renewals_get, run_renewals_post};
pub use health::{HealthResponse, health_check};
pub use payments::{check_payment, get_payment};
