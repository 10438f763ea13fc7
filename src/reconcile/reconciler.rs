//! Callback reconciler
//!
//! Every inbound signal is verified before anything is read from it. The
//! redirect channel is advisory: it only triggers an authoritative check.
//! Webhooks are re-checked too unless configured to be trusted directly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::ReconcileConfig;
use crate::error::PaymentError;
use crate::gateway_client::CheckOutcome;
use crate::ledger::types::format_amount;
use crate::ledger::{Ledger, TranId, Transaction, TransactionStatus, Transition};
use crate::merchant::Merchant;
use crate::signing::PaymentCallbackFields;

/// Where a status signal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Redirect,
    Webhook,
    Check,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Redirect => "redirect",
            Channel::Webhook => "webhook",
            Channel::Check => "check",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// This signal moved the transaction to `completed`
    Completed,
    /// This signal moved the transaction to `failed`
    Failed(String),
    /// Still `pending`; the reason is stored as an audit note
    StillPending(String),
    /// Already settled earlier; nothing changed
    AlreadyFinal(TransactionStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub tran_id: TranId,
    pub outcome: ReconcileOutcome,
}

impl Reconciliation {
    /// Status the ledger holds after this signal
    pub fn status(&self) -> TransactionStatus {
        match &self.outcome {
            ReconcileOutcome::Completed => TransactionStatus::Completed,
            ReconcileOutcome::Failed(_) => TransactionStatus::Failed,
            ReconcileOutcome::StillPending(_) => TransactionStatus::Pending,
            ReconcileOutcome::AlreadyFinal(status) => *status,
        }
    }
}

pub struct CallbackReconciler {
    merchant: Merchant,
    ledger: Arc<Ledger>,
    config: ReconcileConfig,
}

impl CallbackReconciler {
    pub fn new(merchant: Merchant, ledger: Arc<Ledger>, config: ReconcileConfig) -> Self {
        Self {
            merchant,
            ledger,
            config,
        }
    }

    /// Browser redirect: verify, then trust only the check result
    pub async fn on_redirect(
        &self,
        signal: &PaymentCallbackFields,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation, PaymentError> {
        self.verify(signal, hash, Channel::Redirect)?;
        let tx = self.ledger.resolve(&signal.tran_id).await?;
        if tx.status.is_terminal() {
            return self.already_final(&tx, now).await;
        }
        self.apply_check(&tx, Channel::Redirect, Some(signal), now)
            .await
    }

    /// Server-to-server push
    pub async fn on_webhook(
        &self,
        signal: &PaymentCallbackFields,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation, PaymentError> {
        self.verify(signal, hash, Channel::Webhook)?;
        let tx = self.ledger.resolve(&signal.tran_id).await?;
        if tx.status.is_terminal() {
            return self.already_final(&tx, now).await;
        }

        if self.config.confirm_webhooks_with_check {
            return self
                .apply_check(&tx, Channel::Webhook, Some(signal), now)
                .await;
        }

        let payload = serde_json::json!({ "signal": signal });
        if let Some(reason) = direct_mismatch(signal, &tx) {
            warn!(tran_id = %tx.tran_id, reason = %reason, "Webhook not applied");
            let outcome = self
                .still_pending(&tx, Channel::Webhook, payload, reason)
                .await?;
            return Ok(Reconciliation {
                tran_id: tx.tran_id,
                outcome,
            });
        }

        let outcome = CheckOutcome::from_payment_code(signal.status.trim().parse().ok(), None);
        self.apply_outcome(&tx, outcome, Channel::Webhook, payload, now)
            .await
    }

    /// Explicit re-check, e.g. from a polling client or an operator
    pub async fn recheck(
        &self,
        raw_tran_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation, PaymentError> {
        let tx = self.ledger.resolve(raw_tran_id).await?;
        self.recheck_transaction(&tx, now).await
    }

    pub async fn recheck_transaction(
        &self,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation, PaymentError> {
        if tx.status.is_terminal() {
            return self.already_final(tx, now).await;
        }
        self.apply_check(tx, Channel::Check, None, now).await
    }

    fn verify(
        &self,
        signal: &PaymentCallbackFields,
        hash: &str,
        channel: Channel,
    ) -> Result<(), PaymentError> {
        if self.merchant.engine().verify_fields(signal, hash) {
            return Ok(());
        }
        warn!(
            tran_id = %signal.tran_id,
            channel = channel.as_str(),
            "Callback signature mismatch, ignored"
        );
        Err(PaymentError::SignatureMismatch)
    }

    /// Settled before this signal arrived; finish a lost activation if any
    async fn already_final(
        &self,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation, PaymentError> {
        if tx.status == TransactionStatus::Completed {
            self.ledger.ensure_activated(tx, now).await?;
        }
        Ok(Reconciliation {
            tran_id: tx.tran_id.clone(),
            outcome: ReconcileOutcome::AlreadyFinal(tx.status),
        })
    }

    /// Note `reason` on a pending row, or report the status it settled in
    async fn still_pending(
        &self,
        tx: &Transaction,
        channel: Channel,
        payload: serde_json::Value,
        reason: String,
    ) -> Result<ReconcileOutcome, PaymentError> {
        if self
            .ledger
            .note_pending(tx, channel.as_str(), payload, &reason)
            .await?
        {
            return Ok(ReconcileOutcome::StillPending(reason));
        }
        let current = self.ledger.resolve(tx.tran_id.as_str()).await?;
        Ok(ReconcileOutcome::AlreadyFinal(current.status))
    }

    async fn apply_check(
        &self,
        tx: &Transaction,
        channel: Channel,
        signal: Option<&PaymentCallbackFields>,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation, PaymentError> {
        match self
            .merchant
            .check_transaction(tx.tran_id.as_str(), now)
            .await
        {
            Ok(result) => {
                let payload = serde_json::json!({ "signal": signal, "check": result.raw });
                self.apply_outcome(tx, result.outcome, channel, payload, now)
                    .await
            }
            Err(e) => {
                warn!(
                    tran_id = %tx.tran_id,
                    channel = channel.as_str(),
                    error = %e,
                    "Status check failed"
                );
                let reason = format!("check-transaction failed: {}", e);
                let payload = serde_json::json!({ "signal": signal, "check_error": e.to_string() });
                let outcome = self.still_pending(tx, channel, payload, reason).await?;
                Ok(Reconciliation {
                    tran_id: tx.tran_id.clone(),
                    outcome,
                })
            }
        }
    }

    async fn apply_outcome(
        &self,
        tx: &Transaction,
        outcome: CheckOutcome,
        channel: Channel,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<Reconciliation, PaymentError> {
        let source = channel.as_str();
        let outcome = match outcome {
            CheckOutcome::Approved => match self.ledger.complete(tx, source, payload, now).await? {
                Transition::Applied(_) => ReconcileOutcome::Completed,
                Transition::AlreadyFinal(status) => ReconcileOutcome::AlreadyFinal(status),
            },
            CheckOutcome::Declined(reason) => {
                match self.ledger.fail(tx, source, payload, &reason).await? {
                    Transition::Applied(_) => ReconcileOutcome::Failed(reason),
                    Transition::AlreadyFinal(status) => ReconcileOutcome::AlreadyFinal(status),
                }
            }
            CheckOutcome::Pending(reason) => {
                self.still_pending(tx, channel, payload, reason).await?
            }
        };

        info!(
            tran_id = %tx.tran_id,
            channel = source,
            outcome = ?outcome,
            "Callback reconciled"
        );
        Ok(Reconciliation {
            tran_id: tx.tran_id.clone(),
            outcome,
        })
    }
}

/// Why a directly trusted webhook cannot be applied to `tx`
fn direct_mismatch(signal: &PaymentCallbackFields, tx: &Transaction) -> Option<String> {
    let amount = signal.amount.trim();
    if !amount.is_empty() && amount.parse::<Decimal>().ok() != Some(tx.amount) {
        return Some(format!(
            "webhook amount {} does not match {}",
            amount,
            format_amount(tx.amount)
        ));
    }
    let currency = signal.currency.trim();
    if !currency.is_empty() && !currency.eq_ignore_ascii_case(tx.currency.as_str()) {
        return Some(format!(
            "webhook currency {} does not match {}",
            currency, tx.currency
        ));
    }
    None
}
