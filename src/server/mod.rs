//! HTTP surface
//!
//! | Prefix        | Audience                     | Guard                   |
//! |---------------|------------------------------|-------------------------|
//! | `/api/v1`     | frontend / mobile clients    | identity resolver       |
//! | `/callbacks`  | payment gateway, browsers    | payload signature       |
//! | `/cron`       | external scheduler           | shared secret           |

pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod state;
pub mod types;


use std::sync::Arc;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ServerConfig;

pub use middleware::CallerProfile;
pub use state::AppState;
pub use types::{ApiError, ApiResponse, CallbackRejection};

/// Assemble every route on top of the shared state
pub fn build_router(state: Arc<AppState>) -> Router {
    // Billing routes act for an identified profile
    let billing_routes = Router::new()
        .route("/api/v1/checkout", post(handlers::create_checkout))
        .route("/api/v1/cards/link", post(handlers::link_card))
        .route("/api/v1/payments/{tran_id}", get(handlers::get_payment))
        .route(
            "/api/v1/payments/{tran_id}/check",
            post(handlers::check_payment),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::identity_middleware,
        ));

    let callback_routes = Router::new()
        .route("/payment/return", get(handlers::payment_return))
        .route("/payment/webhook", post(handlers::payment_webhook))
        .route(
            "/card-link",
            get(handlers::card_link_get).post(handlers::card_link_post),
        );

    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        .merge(billing_routes)
        .nest("/callbacks", callback_routes)
        .route(
            "/cron/renewals",
            get(handlers::run_renewals_get).post(handlers::run_renewals_post),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
}

/// Bind and serve until the process stops
pub async fn run_server(config: &ServerConfig, state: Arc<AppState>) -> std::io::Result<()> {
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(addr = %addr, "Billing gateway listening");
    info!("API Docs: http://{}/docs", addr);

    axum::serve(listener, app).await
}
