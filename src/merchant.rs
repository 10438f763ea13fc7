//! Merchant context
//!
//! Credentials, signer and gateway client shared by every flow that talks to
//! the gateway. Built once from the validated configuration.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::GatewayConfig;
use crate::error::PaymentError;
use crate::gateway_client::{CheckResult, GatewayError, PaymentGateway};
use crate::signing::{CheckFields, SignatureEngine, Signed, SignedFields, req_time};

#[derive(Clone)]
pub struct Merchant {
    config: Arc<GatewayConfig>,
    engine: SignatureEngine,
    gateway: Arc<dyn PaymentGateway>,
}

impl Merchant {
    pub fn new(
        config: Arc<GatewayConfig>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, PaymentError> {
        if config.merchant_id.trim().is_empty() {
            return Err(PaymentError::Misconfiguration(
                "merchant id is not configured".to_string(),
            ));
        }
        let engine = SignatureEngine::new(&config.api_key)?;
        Ok(Self {
            config,
            engine,
            gateway,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn merchant_id(&self) -> &str {
        &self.config.merchant_id
    }

    pub fn engine(&self) -> &SignatureEngine {
        &self.engine
    }

    pub fn gateway(&self) -> &dyn PaymentGateway {
        self.gateway.as_ref()
    }

    pub fn sign<F: SignedFields>(&self, fields: F) -> Signed<F> {
        Signed::new(&self.engine, fields)
    }

    /// Ask the gateway for the authoritative status of `tran_id`
    pub async fn check_transaction(
        &self,
        tran_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckResult, GatewayError> {
        let request = self.sign(CheckFields {
            req_time: req_time(now),
            merchant_id: self.config.merchant_id.clone(),
            tran_id: tran_id.to_string(),
        });
        self.gateway.check_transaction(&request).await
    }
}

/// base64(JSON) as the gateway expects for `items` and return contexts
pub fn encode_base64_json<T: Serialize>(value: &T) -> Result<String, PaymentError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| PaymentError::InvalidRequest(format!("unencodable payload: {}", e)))?;
    Ok(STANDARD.encode(json))
}

pub fn decode_base64_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, PaymentError> {
    let bytes = STANDARD
        .decode(raw.trim())
        .map_err(|_| PaymentError::InvalidRequest("return context is not base64".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|_| PaymentError::InvalidRequest("return context is not valid JSON".to_string()))
}
