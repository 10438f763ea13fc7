//! Caller identification for the billing routes

use std::sync::Arc;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use uuid::Uuid;

use super::state::AppState;
use super::types::ApiError;

/// Billing profile the request acts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerProfile(pub Uuid);

/// Resolve the caller through the identity strategies and inject
/// [`CallerProfile`] into request extensions
pub async fn identity_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let profile_id = state.identity.resolve(request.headers()).await?;
    request.extensions_mut().insert(CallerProfile(profile_id));
    Ok(next.run(request).await)
}
