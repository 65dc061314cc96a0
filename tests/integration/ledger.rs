//! Balance and withdrawal behavior over SQLite and the live HTTP API.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use loyalty::accrual::AccrualClient;
use loyalty::api::{self, ApiState};
use loyalty::engine::orders::submit_order;
use loyalty::engine::{balance, Reconciler, ReconcilerSettings, WithdrawalAdmission};
use loyalty::storage::{SqliteStore, WithdrawalStore};
use loyalty::types::{LoyaltyError, OrderStatus};

use crate::fake_oracle::{client_config, FakeOracle, Reply};

/// A user whose single order the oracle credits with `amount`.
async fn credited_user(amount: rust_decimal::Decimal) -> (Arc<SqliteStore>, Uuid) {
    let (oracle, base_url) = FakeOracle::start().await;
    let store = Arc::new(SqliteStore::connect("sqlite::memory:", 1).await.unwrap());
    let user = Uuid::new_v4();
    submit_order(store.as_ref(), user, "79927398713").await.unwrap();
    oracle.set("79927398713", Reply::Status(OrderStatus::Processed, Some(amount)));

    let client = Arc::new(AccrualClient::new(&client_config(base_url)).unwrap());
    let reconciler = Reconciler::new(
        client,
        store.clone(),
        ReconcilerSettings {
            scan_interval: Duration::from_millis(50),
            cycle_timeout: Duration::from_secs(3),
        },
    );
    let (_tx, rx) = watch::channel(false);
    let report = reconciler.run_cycle(&rx).await.unwrap();
    assert_eq!(report.updated, 1);
    (store, user)
}

#[tokio::test]
async fn test_concurrent_withdrawals_never_overspend() {
    let (store, user) = credited_user(dec!(25)).await;
    let admission = Arc::new(WithdrawalAdmission::new(store.clone(), store.clone()));

    let targets = ["12345678903", "2377225624", "4561261212345467", "18"];
    let tasks: Vec<_> = targets
        .into_iter()
        .map(|target| {
            let admission = admission.clone();
            tokio::spawn(async move { admission.withdraw(user, target, dec!(15)).await })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(LoyaltyError::InsufficientFunds { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(admitted, 1);

    let balance = balance::load(store.as_ref(), store.as_ref(), user).await.unwrap();
    assert_eq!(balance.current, dec!(10));
    assert_eq!(balance.withdrawn, dec!(15));
    assert_eq!(store.find_withdrawals_for_user(user).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_withdrawal_identifier_cannot_be_reused() {
    let (store, alice) = credited_user(dec!(100)).await;
    let admission = WithdrawalAdmission::new(store.clone(), store.clone());

    tokio_test::assert_ok!(admission.withdraw(alice, "12345678903", dec!(30)).await);
    let err = admission.withdraw(alice, "12345678903", dec!(30)).await.unwrap_err();
    assert!(matches!(err, LoyaltyError::Conflict(_)));

    let balance = balance::load(store.as_ref(), store.as_ref(), alice).await.unwrap();
    assert_eq!(balance.current, dec!(70));
}

#[tokio::test]
async fn test_http_api_end_to_end() {
    let (store, user) = credited_user(dec!(500)).await;
    let state = Arc::new(ApiState::new(store.clone(), store));
    let router = api::build_router(state, Duration::from_secs(5));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    let base = format!("http://{addr}");
    let http = reqwest::Client::new();
    let user_header = user.to_string();

    let resp = http
        .post(format!("{base}/api/user/orders"))
        .header("X-User-Id", &user_header)
        .body("12345678903")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

    let orders: serde_json::Value = http
        .get(format!("{base}/api/user/orders"))
        .header("X-User-Id", &user_header)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let orders = orders.as_array().unwrap();
    assert_eq!(orders.len(), 2);
    let processed = orders.iter().find(|o| o["number"] == "79927398713").unwrap();
    assert_eq!(processed["status"], "PROCESSED");
    assert_eq!(processed["accrual"].as_f64(), Some(500.0));
    let fresh = orders.iter().find(|o| o["number"] == "12345678903").unwrap();
    assert_eq!(fresh["status"], "NEW");
    assert!(fresh.get("accrual").is_none());

    let resp = http
        .post(format!("{base}/api/user/balance/withdraw"))
        .header("X-User-Id", &user_header)
        .json(&serde_json::json!({ "order": "2377225624", "sum": 751 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::PAYMENT_REQUIRED);

    let resp = http
        .post(format!("{base}/api/user/balance/withdraw"))
        .header("X-User-Id", &user_header)
        .json(&serde_json::json!({ "order": "2377225624", "sum": 125.5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let balance: serde_json::Value = http
        .get(format!("{base}/api/user/balance"))
        .header("X-User-Id", &user_header)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(balance["current"].as_f64(), Some(374.5));
    assert_eq!(balance["withdrawn"].as_f64(), Some(125.5));

    let resp = http.get(format!("{base}/api/user/balance")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
}
