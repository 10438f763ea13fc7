//! Scripted gateway for tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::client::PaymentGateway;
use super::error::GatewayError;
use super::types::{
    ChargeResult, CheckOutcome, CheckResult, GatewayStatus, LinkCardAck, PaymentArtifacts,
    PurchaseAck,
};
use crate::signing::{
    CheckFields, LinkCardFields, PurchaseFields, SignatureEngine, Signed, SignedFields,
    TokenPurchaseFields,
};

/// How the mock answers a token charge
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeBehavior {
    Approve,
    Decline,
    Timeout,
}

pub struct MockGateway {
    /// Verifies every incoming hash like the real gateway would
    engine: SignatureEngine,
    purchase_count: AtomicUsize,
    check_count: AtomicUsize,
    link_count: AtomicUsize,
    charge_count: AtomicUsize,
    reject_purchase: Mutex<Option<(String, String)>>,
    fail_transport: Mutex<bool>,
    checks: Mutex<HashMap<String, CheckOutcome>>,
    charges: Mutex<HashMap<String, ChargeBehavior>>,
    charge_delay: Mutex<Option<Duration>>,
    charged_tran_ids: Mutex<Vec<String>>,
    last_purchase: Mutex<Option<PurchaseFields>>,
    last_link: Mutex<Option<LinkCardFields>>,
}

impl MockGateway {
    pub fn new(api_key: &str) -> Self {
        Self {
            engine: SignatureEngine::new(api_key).unwrap(),
            purchase_count: AtomicUsize::new(0),
            check_count: AtomicUsize::new(0),
            link_count: AtomicUsize::new(0),
            charge_count: AtomicUsize::new(0),
            reject_purchase: Mutex::new(None),
            fail_transport: Mutex::new(false),
            checks: Mutex::new(HashMap::new()),
            charges: Mutex::new(HashMap::new()),
            charge_delay: Mutex::new(None),
            charged_tran_ids: Mutex::new(Vec::new()),
            last_purchase: Mutex::new(None),
            last_link: Mutex::new(None),
        }
    }

    pub fn reject_purchases(&self, code: &str, message: &str) {
        *self.reject_purchase.lock().unwrap() = Some((code.to_string(), message.to_string()));
    }

    pub fn set_fail_transport(&self, fail: bool) {
        *self.fail_transport.lock().unwrap() = fail;
    }

    /// Answer for check-transaction on `tran_id` (default: pending)
    pub fn set_check(&self, tran_id: &str, outcome: CheckOutcome) {
        self.checks
            .lock()
            .unwrap()
            .insert(tran_id.to_string(), outcome);
    }

    /// Answer for charges made with `token` (default: approve)
    pub fn set_charge(&self, token: &str, behavior: ChargeBehavior) {
        self.charges
            .lock()
            .unwrap()
            .insert(token.to_string(), behavior);
    }

    /// Hold every token charge for `delay` before answering
    pub fn set_charge_delay(&self, delay: Duration) {
        *self.charge_delay.lock().unwrap() = Some(delay);
    }

    pub fn purchase_count(&self) -> usize {
        self.purchase_count.load(Ordering::SeqCst)
    }

    pub fn check_count(&self) -> usize {
        self.check_count.load(Ordering::SeqCst)
    }

    pub fn link_count(&self) -> usize {
        self.link_count.load(Ordering::SeqCst)
    }

    pub fn charge_count(&self) -> usize {
        self.charge_count.load(Ordering::SeqCst)
    }

    pub fn charged_tran_ids(&self) -> Vec<String> {
        self.charged_tran_ids.lock().unwrap().clone()
    }

    pub fn last_purchase(&self) -> Option<PurchaseFields> {
        self.last_purchase.lock().unwrap().clone()
    }

    pub fn last_link(&self) -> Option<LinkCardFields> {
        self.last_link.lock().unwrap().clone()
    }

    fn check_hash<F: SignedFields>(&self, req: &Signed<F>) -> Result<(), GatewayError> {
        if *self.fail_transport.lock().unwrap() {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }
        if self.engine.verify_fields(&req.fields, &req.hash) {
            Ok(())
        } else {
            Err(GatewayError::Rejected {
                code: "1".to_string(),
                message: "Wrong hash".to_string(),
            })
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn purchase(&self, req: &Signed<PurchaseFields>) -> Result<PurchaseAck, GatewayError> {
        self.purchase_count.fetch_add(1, Ordering::SeqCst);
        self.check_hash(req)?;
        *self.last_purchase.lock().unwrap() = Some(req.fields.clone());

        if let Some((code, message)) = self.reject_purchase.lock().unwrap().clone() {
            return Err(GatewayError::Rejected { code, message });
        }

        Ok(PurchaseAck {
            status: GatewayStatus::success(),
            artifacts: PaymentArtifacts {
                qr_string: Some(format!("0002010102{}", req.fields.tran_id)),
                deeplink: Some(format!("abamobilebank://pay?tran={}", req.fields.tran_id)),
                ..Default::default()
            },
            raw: serde_json::json!({"status": {"code": "00", "message": "Success!"}}),
        })
    }

    async fn check_transaction(
        &self,
        req: &Signed<CheckFields>,
    ) -> Result<CheckResult, GatewayError> {
        self.check_count.fetch_add(1, Ordering::SeqCst);
        self.check_hash(req)?;

        let outcome = self
            .checks
            .lock()
            .unwrap()
            .get(&req.fields.tran_id)
            .cloned()
            .unwrap_or_else(|| CheckOutcome::Pending("payment not completed yet".to_string()));
        let code = match &outcome {
            CheckOutcome::Approved => 0,
            CheckOutcome::Pending(_) => 2,
            CheckOutcome::Declined(_) => 3,
        };
        Ok(CheckResult {
            outcome,
            raw: serde_json::json!({
                "status": {"code": "00", "message": "Success!"},
                "data": {"payment_status_code": code}
            }),
        })
    }

    async fn link_card(&self, req: &Signed<LinkCardFields>) -> Result<LinkCardAck, GatewayError> {
        self.link_count.fetch_add(1, Ordering::SeqCst);
        self.check_hash(req)?;
        *self.last_link.lock().unwrap() = Some(req.fields.clone());
        Ok(LinkCardAck {
            status: GatewayStatus::success(),
            link_url: Some("https://gateway.test/cof/link/abc".to_string()),
            raw: serde_json::json!({"status": {"code": "00"}}),
        })
    }

    async fn charge_token(
        &self,
        req: &Signed<TokenPurchaseFields>,
    ) -> Result<ChargeResult, GatewayError> {
        self.charge_count.fetch_add(1, Ordering::SeqCst);
        self.check_hash(req)?;
        self.charged_tran_ids
            .lock()
            .unwrap()
            .push(req.fields.tran_id.clone());

        let delay = *self.charge_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self
            .charges
            .lock()
            .unwrap()
            .get(&req.fields.payment_token)
            .cloned()
            .unwrap_or(ChargeBehavior::Approve);

        match behavior {
            ChargeBehavior::Approve => Ok(ChargeResult {
                approved: true,
                status: GatewayStatus::success(),
                raw: serde_json::json!({"status": {"code": "00"}}),
            }),
            ChargeBehavior::Decline => Ok(ChargeResult {
                approved: false,
                status: GatewayStatus {
                    code: "3".to_string(),
                    message: "Declined".to_string(),
                },
                raw: serde_json::json!({"status": {"code": "3", "message": "Declined"}}),
            }),
            ChargeBehavior::Timeout => Err(GatewayError::Timeout),
        }
    }
}
