//! Checkout and card-link initiation

use std::sync::Arc;

use axum::{Extension, Json, extract::State};
use chrono::Utc;

use super::super::middleware::CallerProfile;
use super::super::state::AppState;
use super::super::types::{ApiResult, CheckoutBody, CheckoutData, LinkCardBody, LinkCardData, ok};
use crate::checkout::CheckoutRequest;
use crate::ledger::types::format_amount;

/// Start a checkout
///
/// POST /api/v1/checkout
///
/// The gateway must accept the request before anything is recorded; a
/// rejection is returned with the gateway's reason.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutBody,
    responses(
        (status = 200, description = "Checkout accepted, transaction pending", body = CheckoutData),
        (status = 400, description = "Invalid tier or amount"),
        (status = 401, description = "Caller could not be identified"),
        (status = 402, description = "Gateway rejected the request"),
        (status = 502, description = "Gateway unreachable")
    ),
    security(("profile_id" = [])),
    tag = "Billing"
)]
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    Extension(CallerProfile(profile_id)): Extension<CallerProfile>,
    Json(body): Json<CheckoutBody>,
) -> ApiResult<CheckoutData> {
    let result = state
        .checkout
        .initiate(
            profile_id,
            CheckoutRequest {
                tier: body.tier,
                amount: body.amount,
                currency: body.currency,
                payment_option: body.payment_option,
                phone: body.phone,
                return_context: body.return_context,
            },
        )
        .await?;

    ok(CheckoutData {
        tran_id: result.tran_id.to_string(),
        amount: format_amount(result.amount),
        currency: result.currency.to_string(),
        status: result.status.to_string(),
        artifacts: result.artifacts,
    })
}

/// Ask the gateway to link a reusable card for a plan
///
/// POST /api/v1/cards/link
#[utoipa::path(
    post,
    path = "/api/v1/cards/link",
    request_body = LinkCardBody,
    responses(
        (status = 200, description = "Link page issued", body = LinkCardData),
        (status = 400, description = "Tier not for sale"),
        (status = 401, description = "Caller could not be identified"),
        (status = 402, description = "Gateway rejected the request")
    ),
    security(("profile_id" = [])),
    tag = "Billing"
)]
pub async fn link_card(
    State(state): State<Arc<AppState>>,
    Extension(CallerProfile(profile_id)): Extension<CallerProfile>,
    Json(body): Json<LinkCardBody>,
) -> ApiResult<LinkCardData> {
    let start = state
        .tokenization
        .start_link(profile_id, body.tier, Utc::now())
        .await?;

    ok(LinkCardData {
        subscription_id: start.subscription_id,
        link_url: start.link_url,
    })
}
