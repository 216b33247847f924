use std::sync::Arc;

use vastnet_shared::ReferralPolicy;

use crate::error::LedgerError;
use crate::services::notification_service::testing::RecordingNotifier;
use crate::state::AppState;
use crate::state::testing::{test_state, test_state_full};

async fn race_purchases(state: &AppState, tg_id: i64, attempts: usize) -> (usize, usize) {
    let mut handles = Vec::new();
    for _ in 0..attempts {
        let state = state.clone();
        handles.push(tokio::spawn(async move { state.subscriptions.purchase_plan(tg_id, 0).await }));
    }

    let (mut ok, mut insufficient) = (0, 0);
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(LedgerError::InsufficientFunds { .. }) => insufficient += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    (ok, insufficient)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_purchases_never_overspend() {
    let state = test_state().await;
    state.users.create_user(1, None, None).await.unwrap();
    state.admin.admin_set_balance(1, 150).await.unwrap();

    let (ok, insufficient) = race_purchases(&state, 1, 10).await;

    assert_eq!((ok, insufficient), (2, 8));
    assert_eq!(state.users.get_user(1).await.unwrap().balance, 0);
    assert_eq!(state.subscriptions.get_user_subscriptions(1).await.unwrap().len(), 2);
    assert!(state.admin.audit_ledger().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn storage_guard_holds_without_shared_locks() {
    let state = test_state().await;
    state.users.create_user(1, None, None).await.unwrap();
    state.admin.admin_set_balance(1, 225).await.unwrap();

    // a second service stack over the same database has its own lock registry
    let other = AppState::new(state.pool.clone(), state.config.clone(), state.notifier.clone());

    let (a, b) = tokio::join!(race_purchases(&state, 1, 5), race_purchases(&other, 1, 5));

    assert_eq!(a.0 + b.0, 3);
    assert_eq!(state.users.get_user(1).await.unwrap().balance, 0);
    assert!(state.admin.audit_ledger().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn purchases_and_settlements_interleave_consistently() {
    let policy = ReferralPolicy::from_json(r#"{ "multiplier_first": 0.5, "multiplier_common": 0.1 }"#).unwrap();
    let state = test_state_full(policy, Arc::new(RecordingNotifier::default())).await;
    state.users.create_user(10, None, None).await.unwrap();
    state.users.create_user(1, None, Some(10)).await.unwrap();
    state.admin.admin_set_balance(1, 75).await.unwrap();

    let mut settlements = Vec::new();
    for i in 0..6 {
        let state = state.state.clone();
        settlements.push(tokio::spawn(async move {
            // every charge is delivered twice
            let id = format!("ch_{}", i);
            let a = state.payments.settle_payment(1, 100, "RUB", &id).await.unwrap();
            let b = state.payments.settle_payment(1, 100, "RUB", &id).await.unwrap();
            (a.duplicate as usize) + (b.duplicate as usize)
        }));
    }
    let (purchased, _) = race_purchases(&state, 1, 8).await;

    let mut duplicates = 0;
    for handle in settlements {
        duplicates += handle.await.unwrap();
    }
    assert_eq!(duplicates, 6);

    let balance = state.users.get_user(1).await.unwrap().balance;
    assert_eq!(balance, 75 + 6 * 100 - 75 * purchased as i64);
    assert!(balance >= 0);

    // one first-payment bonus, five common ones
    assert_eq!(state.users.get_user(10).await.unwrap().balance, 50 + 5 * 10);
    assert!(state.admin.audit_ledger().await.unwrap().is_empty());
}
