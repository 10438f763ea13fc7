//! Outbound gateway client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::error::GatewayError;
use super::types::{
    ChargeEnvelope, ChargeResult, CheckEnvelope, CheckResult, LinkCardAck, LinkCardEnvelope,
    PurchaseAck, PurchaseEnvelope,
};
use crate::config::GatewayConfig;
use crate::signing::{CheckFields, LinkCardFields, PurchaseFields, Signed, TokenPurchaseFields};

/// Server-to-server calls to the payment gateway
///
/// Requests arrive already signed. A non-success acknowledgment on
/// `purchase` or `link_card` is a [`GatewayError::Rejected`]; a declined
/// token charge is an `Ok` result with `approved = false`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn purchase(&self, req: &Signed<PurchaseFields>) -> Result<PurchaseAck, GatewayError>;

    async fn check_transaction(
        &self,
        req: &Signed<CheckFields>,
    ) -> Result<CheckResult, GatewayError>;

    async fn link_card(&self, req: &Signed<LinkCardFields>) -> Result<LinkCardAck, GatewayError>;

    async fn charge_token(
        &self,
        req: &Signed<TokenPurchaseFields>,
    ) -> Result<ChargeResult, GatewayError>;
}

/// reqwest-backed gateway client
pub struct HttpGateway {
    config: Arc<GatewayConfig>,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(config: Arc<GatewayConfig>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    async fn read_json(
        &self,
        response: reqwest::Response,
    ) -> Result<serde_json::Value, GatewayError> {
        let http_status = response.status();
        let body = response.text().await?;
        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(value) => Ok(value),
            Err(_) if !http_status.is_success() => Err(GatewayError::Http(http_status.as_u16())),
            Err(e) => Err(GatewayError::MalformedResponse(e.to_string())),
        }
    }
}

fn parse<T: DeserializeOwned>(raw: &serde_json::Value) -> Result<T, GatewayError> {
    serde_json::from_value(raw.clone()).map_err(|e| GatewayError::MalformedResponse(e.to_string()))
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn purchase(&self, req: &Signed<PurchaseFields>) -> Result<PurchaseAck, GatewayError> {
        let url = self.config.url(&self.config.purchase_path);
        debug!(tran_id = %req.fields.tran_id, url = %url, "Submitting purchase");

        let response = self
            .client
            .post(&url)
            .form(&req.form_pairs())
            .send()
            .await?;
        let raw = self.read_json(response).await?;
        let envelope: PurchaseEnvelope = parse(&raw)?;
        let status = envelope.status.normalize();

        if !status.is_success() {
            warn!(
                tran_id = %req.fields.tran_id,
                code = %status.code,
                message = %status.message,
                "Purchase rejected by gateway"
            );
            return Err(GatewayError::Rejected {
                code: status.code,
                message: status.message,
            });
        }

        Ok(PurchaseAck {
            status,
            artifacts: envelope.artifacts,
            raw,
        })
    }

    async fn check_transaction(
        &self,
        req: &Signed<CheckFields>,
    ) -> Result<CheckResult, GatewayError> {
        let url = self.config.url(&self.config.check_path);
        let response = self
            .client
            .post(&url)
            .json(&req.json_body())
            .send()
            .await?;
        let raw = self.read_json(response).await?;
        let envelope: CheckEnvelope = parse(&raw)?;
        let result = CheckResult::from_envelope(envelope, raw);
        debug!(tran_id = %req.fields.tran_id, outcome = ?result.outcome, "Check transaction");
        Ok(result)
    }

    async fn link_card(&self, req: &Signed<LinkCardFields>) -> Result<LinkCardAck, GatewayError> {
        let url = self.config.url(&self.config.link_card_path);
        let response = self
            .client
            .post(&url)
            .form(&req.form_pairs())
            .send()
            .await?;
        let raw = self.read_json(response).await?;
        let envelope: LinkCardEnvelope = parse(&raw)?;
        let status = envelope.status.normalize();

        if !status.is_success() {
            warn!(code = %status.code, message = %status.message, "Card link rejected by gateway");
            return Err(GatewayError::Rejected {
                code: status.code,
                message: status.message,
            });
        }

        Ok(LinkCardAck {
            status,
            link_url: envelope.link_url,
            raw,
        })
    }

    async fn charge_token(
        &self,
        req: &Signed<TokenPurchaseFields>,
    ) -> Result<ChargeResult, GatewayError> {
        let url = self.config.url(&self.config.token_purchase_path);
        let response = self
            .client
            .post(&url)
            .json(&req.json_body())
            .send()
            .await?;
        let raw = self.read_json(response).await?;
        let envelope: ChargeEnvelope = parse(&raw)?;
        let result = ChargeResult::from_envelope(envelope, raw);
        debug!(
            tran_id = %req.fields.tran_id,
            approved = result.approved,
            code = %result.status.code,
            "Token charge"
        );
        Ok(result)
    }
}
