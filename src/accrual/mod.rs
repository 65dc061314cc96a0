//! Accrual oracle integration.
//!
//! Defines the `AccrualOracle` trait (a pure per-order query against the
//! external scoring service), its answer and error types, and the bounded
//! retry policy applied to rate-limit responses.

pub mod client;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use crate::types::OrderStatus;

pub use client::AccrualClient;

/// Parsed oracle answer for one order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccrualAnswer {
    /// Order identifier the oracle answered for.
    pub order: String,
    pub status: OrderStatus,
    /// Present only once the oracle has computed the reward.
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

impl AccrualAnswer {
    /// Accrual to store: the oracle's amount for PROCESSED answers, zero otherwise.
    pub fn effective_accrual(&self) -> Decimal {
        match self.status {
            OrderStatus::Processed => self.accrual.unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        }
    }

    /// Reject answers the oracle protocol cannot produce. `NEW` is a
    /// local-only status and accrual is never negative.
    pub fn validate(&self) -> Result<(), AccrualError> {
        if self.status == OrderStatus::New {
            return Err(AccrualError::Decode(format!(
                "order {}: status NEW is not an oracle status",
                self.order
            )));
        }
        if let Some(accrual) = self.accrual {
            if accrual < Decimal::ZERO {
                return Err(AccrualError::Decode(format!(
                    "order {}: negative accrual {accrual}",
                    self.order
                )));
            }
        }
        Ok(())
    }
}

/// Oracle failures. All but `Decode` are transient and resolved by the
/// next scheduled poll.
#[derive(Debug, thiserror::Error)]
pub enum AccrualError {
    #[error("Oracle rate limit hit (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The oracle does not know the order yet (HTTP 204).
    #[error("Order not registered with the oracle")]
    NotRegistered,

    #[error("Oracle returned HTTP {0}")]
    Status(u16),

    #[error("Malformed oracle answer: {0}")]
    Decode(String),

    #[error("Oracle request timed out")]
    Timeout,

    #[error("Oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AccrualError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, AccrualError::Decode(_))
    }
}

/// Bounded, delayed retry on HTTP 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per order per cycle, including the first.
    pub max_attempts: u32,
    /// Base delay; doubled on each further attempt.
    pub backoff: Duration,
    /// Upper bound for any single delay, including a server `Retry-After`.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt number `attempt` (1-based, so attempt 2 is the
    /// first retry). A server hint takes precedence; both are capped.
    pub fn delay_for(&self, attempt: u32, server_hint: Option<Duration>) -> Duration {
        let exp = attempt.saturating_sub(2).min(16);
        let computed = self.backoff.saturating_mul(1u32 << exp);
        server_hint.unwrap_or(computed).min(self.max_backoff)
    }
}

/// Read-only query interface to the accrual oracle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccrualOracle: Send + Sync {
    async fn fetch(&self, order_id: &str) -> Result<AccrualAnswer, AccrualError>;
}
