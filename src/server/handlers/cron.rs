//! Renewal trigger for the external scheduler

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};

use super::super::state::AppState;
use super::super::types::{ApiResponse, CronQuery, RenewalRunData, error_codes};
use crate::renewal::RenewalError;

/// Secret from `?secret=` or `Authorization: Bearer`
fn supplied_secret<'a>(query: &'a CronQuery, headers: &'a HeaderMap) -> Option<&'a str> {
    if let Some(secret) = query.secret.as_deref() {
        return Some(secret);
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

async fn trigger(state: &AppState, query: &CronQuery, headers: &HeaderMap) -> Response {
    let authorized = supplied_secret(query, headers).is_some_and(|s| state.cron_secret_matches(s));
    if !authorized {
        tracing::warn!("Renewal trigger with missing or wrong secret");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error(error_codes::UNAUTHORIZED, "rejected")),
        )
            .into_response();
    }

    match state.renewals.run_once().await {
        Ok(report) => Json(ApiResponse::success(RenewalRunData::from(&report))).into_response(),
        Err(RenewalError::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(ApiResponse::error(
                error_codes::RENEWAL_IN_PROGRESS,
                "renewal run already in progress",
            )),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Renewal run failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(error_codes::INTERNAL_ERROR, "internal error")),
            )
                .into_response()
        }
    }
}

/// Run one renewal batch
///
/// GET /cron/renewals
#[utoipa::path(
    get,
    path = "/cron/renewals",
    params(("secret" = Option<String>, Query, description = "Shared cron secret")),
    responses(
        (status = 200, description = "Per-subscription results", body = RenewalRunData),
        (status = 401, description = "Missing or wrong secret"),
        (status = 409, description = "Another run is in progress")
    ),
    security(("cron_secret" = [])),
    tag = "Cron"
)]
pub async fn run_renewals_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CronQuery>,
) -> Response {
    trigger(&state, &query, &headers).await
}

/// Run one renewal batch
///
/// POST /cron/renewals
#[utoipa::path(
    post,
    path = "/cron/renewals",
    params(("secret" = Option<String>, Query, description = "Shared cron secret")),
    responses(
        (status = 200, description = "Per-subscription results", body = RenewalRunData),
        (status = 401, description = "Missing or wrong secret"),
        (status = 409, description = "Another run is in progress")
    ),
    security(("cron_secret" = [])),
    tag = "Cron"
)]
pub async fn run_renewals_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CronQuery>,
) -> Response {
    trigger(&state, &query, &headers).await
}
