//! Recurring billing
//!
//! Triggered by an external scheduler through `/cron/renewals`.

pub mod worker;

pub use worker::{RenewalError, RenewalItem, RenewalReport, RenewalScheduler, RenewalStatus};
