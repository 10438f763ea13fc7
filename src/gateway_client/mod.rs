//! Payment gateway client
//!
//! [`PaymentGateway`] is the seam between the billing flows and the external
//! gateway. [`HttpGateway`] talks to the real thing over reqwest.

pub mod client;
pub mod error;
#[cfg(test)]
pub mod mock;
pub mod types;

pub use client::{HttpGateway, PaymentGateway};
pub use error::GatewayError;
pub use types::{
    ChargeResult, CheckOutcome, CheckResult, GatewayStatus, LinkCardAck, PaymentArtifacts,
    PurchaseAck, RawStatus,
};
