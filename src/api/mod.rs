//! HTTP API: Axum server for order submission, balance and withdrawals.
//!
//! Every `/api/user/*` route requires an `X-User-Id` header; requests
//! without a valid one get 401.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use routes::{ApiState, AppState};

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route(
            "/api/user/orders",
            post(routes::submit_order).get(routes::list_orders),
        )
        .route("/api/user/balance", get(routes::get_balance))
        .route("/api/user/balance/withdraw", post(routes::withdraw))
        .route("/api/user/withdrawals", get(routes::list_withdrawals))
        .route("/health", get(routes::health))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve `router` until `shutdown` resolves.
pub async fn serve<F>(router: Router, addr: &str, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP address {addr}"))?;
    let local = listener.local_addr().context("Failed to read bound address")?;
    info!(address = %local, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")?;

    info!("HTTP server stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
