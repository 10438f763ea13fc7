//! Callback reconciliation
//!
//! Three channels report payment outcomes and all of them land in the same
//! ledger:
//!
//! | Channel  | Trust                                  |
//! |----------|----------------------------------------|
//! | redirect | advisory, triggers a check             |
//! | webhook  | verified, re-checked by default        |
//! | check    | authoritative                          |

pub mod callback;
pub mod reconciler;

#[cfg(test)]
mod integration_tests;

pub use callback::{parse_body, query_to_value, split_signed};
pub use reconciler::{CallbackReconciler, Channel, ReconcileOutcome, Reconciliation};
