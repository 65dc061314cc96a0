//! HTTP client for the accrual oracle.
//!
//! Endpoint: `GET {base_url}/api/orders/{order}`.
//! - 200: JSON `{"order", "status", "accrual"?}`
//! - 204: order not registered with the oracle yet
//! - 429: rate limited, optional `Retry-After` (seconds)
//!
//! 429 is retried according to the `RetryPolicy`; every other failure is
//! returned at once and left to the next reconciliation cycle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use super::{AccrualAnswer, AccrualError, AccrualOracle, RetryPolicy};
use crate::config::AccrualConfig;

/// Longest body excerpt carried in a decode error.
const BODY_EXCERPT_LEN: usize = 200;

pub struct AccrualClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl AccrualClient {
    pub fn new(cfg: &AccrualConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(cfg.request_timeout())
            .user_agent(concat!("loyalty/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for the accrual oracle")?;

        Ok(Self {
            http,
            base_url: normalize_base_url(&cfg.base_url),
            retry: cfg.retry_policy(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn order_url(&self, order_id: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, urlencoding::encode(order_id))
    }

    fn parse(body: &str) -> Result<AccrualAnswer, AccrualError> {
        let answer: AccrualAnswer = serde_json::from_str(body).map_err(|e| {
            let excerpt: String = body.chars().take(BODY_EXCERPT_LEN).collect();
            AccrualError::Decode(format!("{e}; body: {excerpt:?}"))
        })?;
        answer.validate()?;
        Ok(answer)
    }
}

/// Accept `host:port` as well as a full URL; drop trailing slashes.
fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn transport_error(e: reqwest::Error) -> AccrualError {
    if e.is_timeout() {
        AccrualError::Timeout
    } else {
        AccrualError::Transport(e)
    }
}

#[async_trait]
impl AccrualOracle for AccrualClient {
    async fn fetch(&self, order_id: &str) -> Result<AccrualAnswer, AccrualError> {
        let url = self.order_url(order_id);
        let mut attempt = 1;

        loop {
            debug!(url = %url, attempt, "Polling accrual oracle");
            let resp = self.http.get(&url).send().await.map_err(transport_error)?;
            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let hint = retry_after(&resp);
                if attempt >= self.retry.max_attempts {
                    return Err(AccrualError::RateLimited { retry_after: hint });
                }
                attempt += 1;
                let delay = self.retry.delay_for(attempt, hint);
                warn!(
                    order_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Oracle rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if status == StatusCode::NO_CONTENT {
                return Err(AccrualError::NotRegistered);
            }

            if !status.is_success() {
                return Err(AccrualError::Status(status.as_u16()));
            }

            let body = resp.text().await.map_err(transport_error)?;
            return Self::parse(&body);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
