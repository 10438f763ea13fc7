//! Payment status for polling clients

use std::sync::Arc;

use axum::{
    Extension,
    extract::{Path, State},
};
use chrono::Utc;
use uuid::Uuid;

use super::super::middleware::CallerProfile;
use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, PaymentStatusData, ok};
use crate::error::PaymentError;
use crate::ledger::Transaction;

/// Load a transaction owned by the caller
async fn owned_transaction(
    state: &AppState,
    profile_id: Uuid,
    tran_id: &str,
) -> Result<Transaction, ApiError> {
    let tx = state.ledger.resolve(tran_id).await?;
    if tx.profile_id != profile_id {
        tracing::warn!(
            tran_id = %tx.tran_id,
            profile_id = %profile_id,
            "Payment lookup by non-owner"
        );
        return Err(PaymentError::Forbidden.into());
    }
    Ok(tx)
}

/// Current ledger status of a payment
///
/// GET /api/v1/payments/{tran_id}
#[utoipa::path(
    get,
    path = "/api/v1/payments/{tran_id}",
    params(("tran_id" = String, Path, description = "Transaction reference")),
    responses(
        (status = 200, description = "Payment status", body = PaymentStatusData),
        (status = 401, description = "Caller could not be identified"),
        (status = 403, description = "Payment belongs to another profile"),
        (status = 404, description = "Unknown transaction")
    ),
    security(("profile_id" = [])),
    tag = "Billing"
)]
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Extension(CallerProfile(profile_id)): Extension<CallerProfile>,
    Path(tran_id): Path<String>,
) -> ApiResult<PaymentStatusData> {
    let tx = owned_transaction(&state, profile_id, &tran_id).await?;
    ok(PaymentStatusData::from(&tx))
}

/// Ask the gateway for the authoritative status and apply it
///
/// POST /api/v1/payments/{tran_id}/check
#[utoipa::path(
    post,
    path = "/api/v1/payments/{tran_id}/check",
    params(("tran_id" = String, Path, description = "Transaction reference")),
    responses(
        (status = 200, description = "Status after the check", body = PaymentStatusData),
        (status = 401, description = "Caller could not be identified"),
        (status = 403, description = "Payment belongs to another profile"),
        (status = 404, description = "Unknown transaction")
    ),
    security(("profile_id" = [])),
    tag = "Billing"
)]
pub async fn check_payment(
    State(state): State<Arc<AppState>>,
    Extension(CallerProfile(profile_id)): Extension<CallerProfile>,
    Path(tran_id): Path<String>,
) -> ApiResult<PaymentStatusData> {
    let tx = owned_transaction(&state, profile_id, &tran_id).await?;
    state.reconciler.recheck_transaction(&tx, Utc::now()).await?;

    let settled = state
        .ledger
        .store()
        .get_transaction(&tx.tran_id)
        .await?
        .ok_or_else(|| PaymentError::TransactionNotFound(tx.tran_id.to_string()))?;
    ok(PaymentStatusData::from(&settled))
}
