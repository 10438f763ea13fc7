//! Gateway callbacks
//!
//! Every payload is verified by the reconciler or the tokenization flow
//! before any field is trusted. Failures answer with a bare code.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, header},
    response::Redirect,
};
use chrono::Utc;

use super::super::state::AppState;
use super::super::types::{ApiResponse, CallbackAck, CallbackRejection, CardLinkAck};
use crate::error::PaymentError;
use crate::reconcile::{parse_body, query_to_value, split_signed};
use crate::signing::{CardLinkCallbackFields, PaymentCallbackFields};
use crate::tokenization::LinkOutcome;

type CallbackResult<T> = Result<Json<ApiResponse<T>>, CallbackRejection>;

fn body_payload(headers: &HeaderMap, body: &[u8]) -> Result<serde_json::Value, PaymentError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    parse_body(content_type, body)
}

/// `result_page_url` with the outcome appended as query parameters
fn result_page(base: &str, params: &[(&str, &str)]) -> String {
    match serde_urlencoded::to_string(params) {
        Ok(query) if !query.is_empty() => {
            let sep = if base.contains('?') { '&' } else { '?' };
            format!("{}{}{}", base, sep, query)
        }
        _ => base.to_string(),
    }
}

/// Browser returning from the gateway
///
/// GET /callbacks/payment/return
///
/// Always answers 303 to the frontend result page. The status shown there
/// is the ledger's, never the one in the query string.
#[utoipa::path(
    get,
    path = "/callbacks/payment/return",
    responses((status = 303, description = "Redirect to the result page")),
    tag = "Callbacks"
)]
pub async fn payment_return(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Redirect {
    let payload = query_to_value(query);
    let outcome = match split_signed::<PaymentCallbackFields>(&payload) {
        Ok((signal, hash)) => state
            .reconciler
            .on_redirect(&signal, &hash, Utc::now())
            .await
            .map_err(CallbackRejection),
        Err(e) => Err(CallbackRejection(e)),
    };

    let url = match outcome {
        Ok(reconciliation) => result_page(
            &state.result_page_url,
            &[
                ("tran_id", reconciliation.tran_id.as_str()),
                ("status", reconciliation.status().as_str()),
            ],
        ),
        Err(rejection) => {
            tracing::warn!(
                code = rejection.0.code(),
                error = %rejection.0,
                "Payment redirect rejected"
            );
            result_page(&state.result_page_url, &[("status", "error")])
        }
    };
    Redirect::to(&url)
}

/// Server-to-server payment notification
///
/// POST /callbacks/payment/webhook
#[utoipa::path(
    post,
    path = "/callbacks/payment/webhook",
    request_body(content = String, description = "Signed payment result, form-encoded or JSON"),
    responses(
        (status = 200, description = "Applied or already settled", body = CallbackAck),
        (status = 400, description = "Rejected")
    ),
    tag = "Callbacks"
)]
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> CallbackResult<CallbackAck> {
    let payload = body_payload(&headers, &body)?;
    let (signal, hash) = split_signed::<PaymentCallbackFields>(&payload)?;
    let reconciliation = state
        .reconciler
        .on_webhook(&signal, &hash, Utc::now())
        .await?;

    Ok(Json(ApiResponse::success(CallbackAck {
        tran_id: reconciliation.tran_id.to_string(),
        status: reconciliation.status().to_string(),
    })))
}

/// Card token delivery as a query string
///
/// GET /callbacks/card-link
#[utoipa::path(
    get,
    path = "/callbacks/card-link",
    responses(
        (status = 200, description = "Token stored and first charge run", body = CardLinkAck),
        (status = 400, description = "Rejected")
    ),
    tag = "Callbacks"
)]
pub async fn card_link_get(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> CallbackResult<CardLinkAck> {
    complete_card_link(&state, query_to_value(query)).await
}

/// Card token delivery as a form or JSON body
///
/// POST /callbacks/card-link
#[utoipa::path(
    post,
    path = "/callbacks/card-link",
    request_body(content = String, description = "Signed card-link result, form-encoded or JSON"),
    responses(
        (status = 200, description = "Token stored and first charge run", body = CardLinkAck),
        (status = 400, description = "Rejected")
    ),
    tag = "Callbacks"
)]
pub async fn card_link_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> CallbackResult<CardLinkAck> {
    let payload = body_payload(&headers, &body)?;
    complete_card_link(&state, payload).await
}

async fn complete_card_link(
    state: &AppState,
    payload: serde_json::Value,
) -> CallbackResult<CardLinkAck> {
    let (callback, hash) = split_signed::<CardLinkCallbackFields>(&payload)?;
    let outcome = state
        .tokenization
        .complete_link(&callback, &hash, Utc::now())
        .await?;

    let (subscription_id, label) = match outcome {
        LinkOutcome::Activated { subscription_id, .. } => (subscription_id, "activated"),
        LinkOutcome::ChargeFailed { subscription_id, .. } => (subscription_id, "charge_failed"),
        LinkOutcome::LinkDeclined { subscription_id, .. } => (subscription_id, "link_declined"),
        LinkOutcome::AlreadyProcessed { subscription_id, .. } => {
            (subscription_id, "already_processed")
        }
    };
    Ok(Json(ApiResponse::success(CardLinkAck {
        subscription_id,
        outcome: label.to_string(),
    })))
}
