//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use super::handlers::HealthResponse;
use super::types::{
    CallbackAck, CardLinkAck, CheckoutBody, CheckoutData, LinkCardBody, LinkCardData,
    PaymentStatusData, RenewalItemData, RenewalRunData,
};

/// Caller identity headers and the cron secret
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "profile_id",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "X-Profile-Id",
                    "Billing profile id. Alternatives, in order: Authorization: Bearer <session>, X-User-Email",
                ))),
            );
            components.add_security_scheme(
                "cron_secret",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("Shared renewal secret; `?secret=` is also accepted"))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Trippay Billing API",
        version = "1.0.0",
        description = "Checkout, card-on-file and recurring billing for the travel marketplace.",
        license(name = "MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::server::handlers::health::health_check,
        crate::server::handlers::checkout::create_checkout,
        crate::server::handlers::checkout::link_card,
        crate::server::handlers::payments::get_payment,
        crate::server::handlers::payments::check_payment,
        crate::server::handlers::callbacks::payment_return,
        crate::server::handlers::callbacks::payment_webhook,
        crate::server::handlers::callbacks::card_link_get,
        crate::server::handlers::callbacks::card_link_post,
        crate::server::handlers::cron::run_renewals_get,
        crate::server::handlers::cron::run_renewals_post,
    ),
    components(
        schemas(
            HealthResponse,
            CheckoutBody,
            CheckoutData,
            LinkCardBody,
            LinkCardData,
            PaymentStatusData,
            CallbackAck,
            CardLinkAck,
            RenewalItemData,
            RenewalRunData,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "System", description = "Liveness"),
        (name = "Billing", description = "Checkout, card linking and payment status"),
        (name = "Callbacks", description = "Signed gateway deliveries"),
        (name = "Cron", description = "Scheduled renewal trigger")
    )
)]
pub struct ApiDoc;
