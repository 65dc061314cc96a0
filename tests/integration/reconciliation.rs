//! Reconciliation against a live HTTP oracle and a SQLite store.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use loyalty::accrual::AccrualClient;
use loyalty::engine::orders::submit_order;
use loyalty::engine::{balance, Reconciler, ReconcilerSettings};
use loyalty::storage::{OrderStore, SqliteStore};
use loyalty::types::OrderStatus;

use crate::fake_oracle::{client_config, FakeOracle, Reply};

fn settings() -> ReconcilerSettings {
    ReconcilerSettings {
        scan_interval: Duration::from_millis(20),
        cycle_timeout: Duration::from_secs(3),
    }
}

async fn setup() -> (FakeOracle, Arc<SqliteStore>, Reconciler) {
    let (oracle, base_url) = FakeOracle::start().await;
    let store = Arc::new(SqliteStore::connect("sqlite::memory:", 1).await.unwrap());
    let client = Arc::new(AccrualClient::new(&client_config(base_url)).unwrap());
    let reconciler = Reconciler::new(client, store.clone(), settings());
    (oracle, store, reconciler)
}

async fn status_of(store: &SqliteStore, id: &str) -> (OrderStatus, Decimal) {
    let order = store.find_order_by_id(id).await.unwrap();
    (order.status, order.accrual)
}

#[tokio::test]
async fn test_cycle_applies_oracle_answers() {
    let (oracle, store, reconciler) = setup().await;
    let user = Uuid::new_v4();
    for id in ["79927398713", "12345678903", "2377225624", "4561261212345467"] {
        submit_order(store.as_ref(), user, id).await.unwrap();
    }
    oracle.set("79927398713", Reply::Status(OrderStatus::Processed, Some(dec!(729.98))));
    oracle.set("12345678903", Reply::Status(OrderStatus::Processing, None));
    oracle.set("2377225624", Reply::Status(OrderStatus::Invalid, None));
    oracle.set("4561261212345467", Reply::NotRegistered);

    let (_tx, rx) = watch::channel(false);
    let report = reconciler.run_cycle(&rx).await.unwrap();

    assert_eq!(report.pending, 4);
    assert_eq!(report.updated, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.deferred, 0);

    assert_eq!(
        status_of(&store, "79927398713").await,
        (OrderStatus::Processed, dec!(729.98))
    );
    assert_eq!(
        status_of(&store, "12345678903").await,
        (OrderStatus::Processing, Decimal::ZERO)
    );
    assert_eq!(status_of(&store, "2377225624").await.0, OrderStatus::Invalid);
    assert_eq!(status_of(&store, "4561261212345467").await.0, OrderStatus::New);

    let balance = balance::load(store.as_ref(), store.as_ref(), user).await.unwrap();
    assert_eq!(balance.current, dec!(729.98));
}

#[tokio::test]
async fn test_terminal_orders_are_not_polled_again() {
    let (oracle, store, reconciler) = setup().await;
    let user = Uuid::new_v4();
    submit_order(store.as_ref(), user, "79927398713").await.unwrap();
    submit_order(store.as_ref(), user, "2377225624").await.unwrap();
    oracle.set("79927398713", Reply::Status(OrderStatus::Processed, Some(dec!(50))));
    oracle.set("2377225624", Reply::Status(OrderStatus::Invalid, None));

    let (_tx, rx) = watch::channel(false);
    reconciler.run_cycle(&rx).await.unwrap();

    // A later contradicting answer must never reach the terminal rows.
    oracle.set("79927398713", Reply::Status(OrderStatus::Processing, None));
    let report = reconciler.run_cycle(&rx).await.unwrap();

    assert_eq!(report.pending, 0);
    assert_eq!(oracle.hits("79927398713"), 1);
    assert_eq!(oracle.hits("2377225624"), 1);
    assert_eq!(
        status_of(&store, "79927398713").await,
        (OrderStatus::Processed, dec!(50))
    );
}

#[tokio::test]
async fn test_oracle_failures_leave_orders_pending() {
    let (oracle, store, reconciler) = setup().await;
    let user = Uuid::new_v4();
    for id in ["79927398713", "12345678903", "2377225624"] {
        submit_order(store.as_ref(), user, id).await.unwrap();
    }
    oracle.set("79927398713", Reply::RateLimited);
    oracle.set("12345678903", Reply::ServerError);
    oracle.set("2377225624", Reply::WrongOrder("4561261212345467"));

    let (_tx, rx) = watch::channel(false);
    let report = reconciler.run_cycle(&rx).await.unwrap();

    assert_eq!(report.failed, 3);
    assert_eq!(report.updated, 0);
    for id in ["79927398713", "12345678903", "2377225624"] {
        assert_eq!(status_of(&store, id).await, (OrderStatus::New, Decimal::ZERO), "{id}");
    }
    assert_eq!(store.find_orders_pending_scan().await.unwrap().len(), 3);

    // Recovery on the next cycle.
    oracle.set("79927398713", Reply::Status(OrderStatus::Processed, Some(dec!(10))));
    let report = reconciler.run_cycle(&rx).await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(
        status_of(&store, "79927398713").await,
        (OrderStatus::Processed, dec!(10))
    );
}

#[tokio::test]
async fn test_spawned_loop_converges_and_stops() {
    let (oracle, store, reconciler) = setup().await;
    let user = Uuid::new_v4();
    submit_order(store.as_ref(), user, "79927398713").await.unwrap();
    oracle.set("79927398713", Reply::Status(OrderStatus::Processed, Some(dec!(100))));

    let handle = Arc::new(reconciler).spawn();

    let converged = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if status_of(&store, "79927398713").await.0 == OrderStatus::Processed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(converged.is_ok(), "order never reached PROCESSED");

    assert!(handle.shutdown(Duration::from_secs(2)).await);
    assert_eq!(oracle.hits("79927398713"), 1);
}
