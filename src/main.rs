//! Loyalty: purchase-loyalty backend.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens storage, starts the accrual reconciler and serves the HTTP API
//! until Ctrl+C, then drains the reconciler within its grace period.

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{info, warn};

use loyalty::accrual::AccrualClient;
use loyalty::api::{self, ApiState};
use loyalty::config;
use loyalty::engine::Reconciler;
use loyalty::storage::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // config.toml is optional; flags override it, environment overrides flags
    let args = config::CliArgs::parse();
    let cfg = config::AppConfig::resolve(&args)?;

    init_logging();

    info!(
        run_address = %cfg.server.run_address,
        accrual = %cfg.accrual.base_url,
        scan_interval_ms = cfg.accrual.scan_interval_ms,
        "Loyalty service starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = Arc::new(
        SqliteStore::connect(cfg.database.uri.expose_secret(), cfg.database.max_connections)
            .await
            .context("Failed to open database")?,
    );

    let oracle = Arc::new(AccrualClient::new(&cfg.accrual)?);
    info!(base_url = oracle.base_url(), "Accrual client ready");

    let reconciler = Arc::new(Reconciler::new(
        oracle,
        store.clone(),
        cfg.accrual.reconciler_settings(),
    ));
    let handle = reconciler.spawn();

    // -- Serve until Ctrl+C ----------------------------------------------

    let state = Arc::new(ApiState::new(store.clone(), store));
    let router = api::build_router(state, cfg.server.request_timeout());

    let served = api::serve(router, &cfg.server.run_address, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    })
    .await;

    // -- Drain ------------------------------------------------------------

    if !handle.shutdown(cfg.accrual.shutdown_grace()).await {
        warn!("Reconciler aborted after grace period");
    }
    info!("Loyalty service shut down");

    served
}

/// Initialise the tracing subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("loyalty=info,tower_http=info"));

    let json_logging = std::env::var("LOYALTY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
