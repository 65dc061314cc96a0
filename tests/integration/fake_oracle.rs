//! Scripted accrual oracle for integration testing.
//!
//! Serves `GET /api/orders/:id` from a per-order script on an ephemeral
//! local port and counts the hits each order receives.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use loyalty::config::AccrualConfig;
use loyalty::types::OrderStatus;

/// How the oracle answers for one order.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(OrderStatus, Option<Decimal>),
    /// 200 with an answer naming a different order.
    WrongOrder(&'static str),
    NotRegistered,
    RateLimited,
    ServerError,
}

#[derive(Default)]
struct Script {
    replies: HashMap<String, Reply>,
    hits: HashMap<String, u32>,
}

#[derive(Clone, Default)]
pub struct FakeOracle {
    script: Arc<Mutex<Script>>,
}

impl FakeOracle {
    /// Bind to `127.0.0.1:0` and return the oracle plus its base URL.
    pub async fn start() -> (Self, String) {
        let oracle = Self::default();
        let router = Router::new()
            .route("/api/orders/:id", get(answer))
            .with_state(oracle.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (oracle, format!("http://{addr}"))
    }

    pub fn set(&self, order: &str, reply: Reply) {
        self.script.lock().unwrap().replies.insert(order.to_string(), reply);
    }

    pub fn hits(&self, order: &str) -> u32 {
        self.script.lock().unwrap().hits.get(order).copied().unwrap_or(0)
    }
}

/// Client settings tuned for fast tests.
pub fn client_config(base_url: String) -> AccrualConfig {
    AccrualConfig {
        base_url,
        max_attempts: 1,
        backoff_ms: 5,
        max_backoff_ms: 20,
        request_timeout_ms: 1_000,
        ..AccrualConfig::default()
    }
}

async fn answer(State(oracle): State<FakeOracle>, Path(id): Path<String>) -> Response {
    let reply = {
        let mut script = oracle.script.lock().unwrap();
        *script.hits.entry(id.clone()).or_default() += 1;
        script.replies.get(&id).cloned().unwrap_or(Reply::NotRegistered)
    };

    match reply {
        Reply::Status(status, accrual) => {
            let mut body = json!({ "order": id, "status": status });
            if let Some(accrual) = accrual {
                body["accrual"] = json!(accrual);
            }
            Json(body).into_response()
        }
        Reply::WrongOrder(other) => {
            Json(json!({ "order": other, "status": "PROCESSED", "accrual": 1 })).into_response()
        }
        Reply::NotRegistered => StatusCode::NO_CONTENT.into_response(),
        Reply::RateLimited => {
            (StatusCode::TOO_MANY_REQUESTS, [("Retry-After", "0")], "slow down").into_response()
        }
        Reply::ServerError => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
