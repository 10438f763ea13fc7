//! End-to-end reconciliation over the in-memory ledger and scripted gateway

use chrono::{DateTime, Months, TimeZone, Utc};
use rust_decimal_macros::dec;

use super::{ReconcileOutcome, Reconciliation};
use crate::checkout::CheckoutRequest;
use crate::config::ReconcileConfig;
use crate::error::PaymentError;
use crate::gateway_client::CheckOutcome;
use crate::ledger::{PaymentStore, Profile, SubscriptionStatus, Tier, TranId, TransactionStatus};
use crate::signing::SignedFields;
use crate::test_support::TestEnv;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 9, 30, 0).unwrap()
}

async fn starter_checkout(env: &TestEnv, profile: &Profile) -> TranId {
    env.checkout
        .initiate_at(
            profile.id,
            CheckoutRequest {
                tier: Some(Tier::Starter),
                ..Default::default()
            },
            t0(),
        )
        .await
        .unwrap()
        .tran_id
}

async fn status_of(env: &TestEnv, tran_id: &TranId) -> TransactionStatus {
    env.store
        .get_transaction(tran_id)
        .await
        .unwrap()
        .unwrap()
        .status
}

#[tokio::test]
async fn test_redirect_with_approved_check_activates_subscription() {
    let env = TestEnv::new();
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;
    env.gateway.set_check(tran_id.as_str(), CheckOutcome::Approved);

    let (signal, hash) = env.payment_signal(tran_id.as_str(), "0", "29.00");
    let result = env.reconciler.on_redirect(&signal, &hash, t0()).await.unwrap();

    assert_eq!(result.outcome, ReconcileOutcome::Completed);
    assert_eq!(status_of(&env, &tran_id).await, TransactionStatus::Completed);

    let sub = env
        .store
        .subscription_for_profile(profile.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.tier, Tier::Starter);
    assert_eq!(sub.renewal_date, t0().checked_add_months(Months::new(1)));

    let tx = env.store.get_transaction(&tran_id).await.unwrap().unwrap();
    assert_eq!(tx.amount, dec!(29.00));
    assert!(tx.metadata.get("redirect").is_some());
    assert!(tx.metadata.get("purchase_ack").is_some());
}

#[tokio::test]
async fn test_redirect_status_is_not_trusted_over_check() {
    let env = TestEnv::new();
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;
    env.gateway
        .set_check(tran_id.as_str(), CheckOutcome::Declined("declined".into()));

    // Browser says success, the check says declined
    let (signal, hash) = env.payment_signal(tran_id.as_str(), "0", "29.00");
    let result = env.reconciler.on_redirect(&signal, &hash, t0()).await.unwrap();

    assert!(matches!(result.outcome, ReconcileOutcome::Failed(_)));
    assert_eq!(status_of(&env, &tran_id).await, TransactionStatus::Failed);
    let sub = env
        .store
        .subscription_for_profile(profile.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Created);
}

#[tokio::test]
async fn test_pending_check_leaves_transaction_pending() {
    let env = TestEnv::new();
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;

    let (signal, hash) = env.payment_signal(tran_id.as_str(), "0", "29.00");
    let result = env.reconciler.on_webhook(&signal, &hash, t0()).await.unwrap();

    assert!(matches!(result.outcome, ReconcileOutcome::StillPending(_)));
    let tx = env.store.get_transaction(&tran_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert!(tx.note.is_some());
}

#[tokio::test]
async fn test_bad_signature_changes_nothing() {
    let env = TestEnv::new();
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;
    env.gateway.set_check(tran_id.as_str(), CheckOutcome::Approved);

    let (mut signal, hash) = env.payment_signal(tran_id.as_str(), "0", "29.00");
    signal.amount = "0.01".to_string();

    let err = env.reconciler.on_webhook(&signal, &hash, t0()).await.unwrap_err();
    assert!(matches!(err, PaymentError::SignatureMismatch));

    let err = env
        .reconciler
        .on_redirect(&signal, "bm90LWEtcmVhbC1oYXNo", t0())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::SignatureMismatch));

    assert_eq!(env.gateway.check_count(), 0);
    let tx = env.store.get_transaction(&tran_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert!(tx.metadata.get("webhook").is_none());
}

#[tokio::test]
async fn test_duplicate_webhook_upgrades_once() {
    let env = TestEnv::new();
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;
    env.gateway.set_check(tran_id.as_str(), CheckOutcome::Approved);
    let (signal, hash) = env.payment_signal(tran_id.as_str(), "0", "29.00");

    let first = env.reconciler.on_webhook(&signal, &hash, t0()).await.unwrap();
    assert_eq!(first.outcome, ReconcileOutcome::Completed);
    let renewal = env
        .store
        .subscription_for_profile(profile.id)
        .await
        .unwrap()
        .unwrap()
        .renewal_date;

    let later = t0() + chrono::Duration::days(3);
    let second = env.reconciler.on_webhook(&signal, &hash, later).await.unwrap();
    assert_eq!(
        second.outcome,
        ReconcileOutcome::AlreadyFinal(TransactionStatus::Completed)
    );
    assert_eq!(env.gateway.check_count(), 1);

    // The renewal date is not pushed out a second time
    let sub = env
        .store
        .subscription_for_profile(profile.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.renewal_date, renewal);
}

#[tokio::test]
async fn test_concurrent_webhooks_complete_once() {
    let env = TestEnv::new();
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;
    env.gateway.set_check(tran_id.as_str(), CheckOutcome::Approved);
    let (signal, hash) = env.payment_signal(tran_id.as_str(), "0", "29.00");

    let (a, b) = tokio::join!(
        env.reconciler.on_webhook(&signal, &hash, t0()),
        env.reconciler.on_webhook(&signal, &hash, t0()),
    );
    let outcomes: Vec<Reconciliation> = vec![a.unwrap(), b.unwrap()];
    let completed = outcomes
        .iter()
        .filter(|r| r.outcome == ReconcileOutcome::Completed)
        .count();
    assert_eq!(completed, 1);
    assert!(
        outcomes
            .iter()
            .all(|r| r.status() == TransactionStatus::Completed)
    );
}

#[tokio::test]
async fn test_conflicting_replay_cannot_flip_terminal_state() {
    let env = TestEnv::with_reconcile(ReconcileConfig {
        confirm_webhooks_with_check: false,
    });
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;

    let (ok, ok_hash) = env.payment_signal(tran_id.as_str(), "0", "29.00");
    let first = env.reconciler.on_webhook(&ok, &ok_hash, t0()).await.unwrap();
    assert_eq!(first.outcome, ReconcileOutcome::Completed);

    let (declined, declined_hash) = env.payment_signal(tran_id.as_str(), "3", "29.00");
    let replay = env
        .reconciler
        .on_webhook(&declined, &declined_hash, t0())
        .await
        .unwrap();
    assert_eq!(
        replay.outcome,
        ReconcileOutcome::AlreadyFinal(TransactionStatus::Completed)
    );
    assert_eq!(status_of(&env, &tran_id).await, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_direct_webhook_settles_without_check() {
    let env = TestEnv::with_reconcile(ReconcileConfig {
        confirm_webhooks_with_check: false,
    });
    let profile = env.profile("traveler@example.com").await;
    let paid = starter_checkout(&env, &profile).await;
    let declined = starter_checkout(&env, &profile).await;

    let (signal, hash) = env.payment_signal(paid.as_str(), "0", "29.00");
    let result = env.reconciler.on_webhook(&signal, &hash, t0()).await.unwrap();
    assert_eq!(result.outcome, ReconcileOutcome::Completed);

    let (signal, hash) = env.payment_signal(declined.as_str(), "3", "29.00");
    let result = env.reconciler.on_webhook(&signal, &hash, t0()).await.unwrap();
    assert!(matches!(result.outcome, ReconcileOutcome::Failed(_)));

    assert_eq!(env.gateway.check_count(), 0);
}

#[tokio::test]
async fn test_direct_webhook_amount_mismatch_stays_pending() {
    let env = TestEnv::with_reconcile(ReconcileConfig {
        confirm_webhooks_with_check: false,
    });
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;

    let (signal, hash) = env.payment_signal(tran_id.as_str(), "0", "1.00");
    let result = env.reconciler.on_webhook(&signal, &hash, t0()).await.unwrap();

    assert!(matches!(result.outcome, ReconcileOutcome::StillPending(ref r) if r.contains("1.00")));
    let tx = env.store.get_transaction(&tran_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert!(tx.note.unwrap().contains("does not match"));
}

#[tokio::test]
async fn test_echoed_id_resolved_by_lookup_key() {
    let env = TestEnv::new();
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;
    env.gateway.set_check(tran_id.as_str(), CheckOutcome::Approved);

    let raw = tran_id.as_str();
    let mangled = format!(" {}-{} ", raw[..10].to_lowercase(), &raw[10..]);
    let (signal, hash) = env.payment_signal(&mangled, "0", "29.00");
    let result = env.reconciler.on_webhook(&signal, &hash, t0()).await.unwrap();

    assert_eq!(result.tran_id, tran_id);
    assert_eq!(result.outcome, ReconcileOutcome::Completed);
}

#[tokio::test]
async fn test_unknown_transaction_is_not_found() {
    let env = TestEnv::new();
    let (signal, hash) = env.payment_signal("01JUNKNOWNTRANSACTION00000", "0", "29.00");
    let err = env.reconciler.on_webhook(&signal, &hash, t0()).await.unwrap_err();
    assert!(matches!(err, PaymentError::TransactionNotFound(_)));

    let err = env.reconciler.recheck("nope", t0()).await.unwrap_err();
    assert!(matches!(err, PaymentError::TransactionNotFound(_)));
}

#[tokio::test]
async fn test_check_failure_keeps_pending_with_note() {
    let env = TestEnv::new();
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;
    env.gateway.set_fail_transport(true);

    let result = env.reconciler.recheck(tran_id.as_str(), t0()).await.unwrap();

    assert!(matches!(
        result.outcome,
        ReconcileOutcome::StillPending(ref r) if r.starts_with("check-transaction failed")
    ));
    let tx = env.store.get_transaction(&tran_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert!(tx.metadata.get("check").is_some());
}

#[tokio::test]
async fn test_recheck_of_settled_transaction_skips_gateway() {
    let env = TestEnv::new();
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;
    env.gateway.set_check(tran_id.as_str(), CheckOutcome::Approved);

    let first = env.reconciler.recheck(tran_id.as_str(), t0()).await.unwrap();
    assert_eq!(first.outcome, ReconcileOutcome::Completed);

    let second = env.reconciler.recheck(tran_id.as_str(), t0()).await.unwrap();
    assert_eq!(second.status(), TransactionStatus::Completed);
    assert_eq!(env.gateway.check_count(), 1);
}

#[tokio::test]
async fn test_direct_webhook_currency_mismatch_stays_pending() {
    let env = TestEnv::with_reconcile(ReconcileConfig {
        confirm_webhooks_with_check: false,
    });
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;

    let (mut signal, _) = env.payment_signal(tran_id.as_str(), "0", "29.00");
    signal.currency = "KHR".to_string();
    let hash = env.gateway_signer().sign(&signal.values());
    let result = env.reconciler.on_webhook(&signal, &hash, t0()).await.unwrap();

    assert!(matches!(result.outcome, ReconcileOutcome::StillPending(ref r) if r.contains("KHR")));
    assert_eq!(status_of(&env, &tran_id).await, TransactionStatus::Pending);

    // Case differences alone are not a mismatch
    let (mut signal, _) = env.payment_signal(tran_id.as_str(), "0", "29.00");
    signal.currency = "usd".to_string();
    let hash = env.gateway_signer().sign(&signal.values());
    let result = env.reconciler.on_webhook(&signal, &hash, t0()).await.unwrap();
    assert_eq!(result.outcome, ReconcileOutcome::Completed);
}

#[tokio::test]
async fn test_pending_note_from_stale_read_reports_settled_status() {
    let env = TestEnv::new();
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;
    let stale = env.store.get_transaction(&tran_id).await.unwrap().unwrap();

    env.gateway.set_check(tran_id.as_str(), CheckOutcome::Approved);
    let first = env.reconciler.recheck(tran_id.as_str(), t0()).await.unwrap();
    assert_eq!(first.outcome, ReconcileOutcome::Completed);

    // A check that started before the completion answers "pending"
    env.gateway.set_check(
        tran_id.as_str(),
        CheckOutcome::Pending("payment not completed yet".into()),
    );
    let late = env.reconciler.recheck_transaction(&stale, t0()).await.unwrap();
    assert_eq!(
        late.outcome,
        ReconcileOutcome::AlreadyFinal(TransactionStatus::Completed)
    );

    let tx = env.store.get_transaction(&tran_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert!(tx.note.is_none());
    assert!(tx.metadata.get("purchase_ack").is_some());
    assert!(tx.metadata.get("check").is_some());
}

#[tokio::test]
async fn test_webhook_retry_finishes_interrupted_activation() {
    let env = TestEnv::with_reconcile(ReconcileConfig {
        confirm_webhooks_with_check: false,
    });
    let profile = env.profile("traveler@example.com").await;
    let tran_id = starter_checkout(&env, &profile).await;
    let (signal, hash) = env.payment_signal(tran_id.as_str(), "0", "29.00");

    env.faults.fail_subscription_updates(1);
    let err = env.reconciler.on_webhook(&signal, &hash, t0()).await.unwrap_err();
    assert!(matches!(err, PaymentError::Ledger(_)));
    assert_eq!(status_of(&env, &tran_id).await, TransactionStatus::Completed);
    let sub = env
        .store
        .subscription_for_profile(profile.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Created);

    let retry = env.reconciler.on_webhook(&signal, &hash, t0()).await.unwrap();
    assert_eq!(
        retry.outcome,
        ReconcileOutcome::AlreadyFinal(TransactionStatus::Completed)
    );
    let sub = env
        .store
        .subscription_for_profile(profile.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.renewal_date, t0().checked_add_months(Months::new(1)));

    // A third delivery leaves the healed subscription alone
    let again = env
        .reconciler
        .on_webhook(&signal, &hash, t0() + chrono::Duration::days(2))
        .await
        .unwrap();
    assert_eq!(again.status(), TransactionStatus::Completed);
    let after = env
        .store
        .subscription_for_profile(profile.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.renewal_date, sub.renewal_date);
}
