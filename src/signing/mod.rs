//! Gateway signature engine
//!
//! `hash = base64(HMAC-SHA512(api_key, f1 ‖ f2 ‖ … ‖ fn))` over a fixed,
//! ordered field list per message type.

pub mod engine;
pub mod fields;

pub use engine::{SignatureEngine, SigningError};
pub use fields::{
    CardLinkCallbackFields, CheckFields, LinkCardFields, PaymentCallbackFields, PurchaseFields,
    Signed, SignedFields, TokenPurchaseFields, req_time,
};
