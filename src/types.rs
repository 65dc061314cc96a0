//! Shared types for the loyalty backend.
//!
//! Orders, withdrawals and the derived balance, plus the request-path
//! error type. Storage and oracle modules depend on these; nothing here
//! depends on them except the `Persistence` error variant.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::storage::StorageError;

/// Opaque, already-authenticated user identity.
pub type UserId = Uuid;

// ---------------------------------------------------------------------------
// Order status
// ---------------------------------------------------------------------------

/// Accrual status of an order.
///
/// `New` is assigned locally on submission; the other four come from the
/// accrual oracle. `Invalid` and `Processed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    /// Statuses the reconciler still polls the oracle for.
    pub const PENDING: [OrderStatus; 3] =
        [OrderStatus::New, OrderStatus::Registered, OrderStatus::Processing];

    /// No further oracle-driven transition is expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Registered => "REGISTERED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "REGISTERED" => Ok(OrderStatus::Registered),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(format!("Unknown order status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// A purchase order submitted for accrual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Luhn-valid numeric identifier, unique across all users.
    pub id: String,
    pub user_id: UserId,
    pub status: OrderStatus,
    /// Points earned. Only meaningful once `status` is `Processed`.
    pub accrual: Decimal,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    /// Accrual that counts towards the balance.
    pub fn credited(&self) -> Decimal {
        if self.status == OrderStatus::Processed {
            self.accrual
        } else {
            Decimal::ZERO
        }
    }

    /// Helper to build a test order with sensible defaults.
    #[cfg(test)]
    pub fn sample(id: &str, user_id: UserId, status: OrderStatus, accrual: Decimal) -> Self {
        Order {
            id: id.to_string(),
            user_id,
            status,
            accrual,
            uploaded_at: Utc::now(),
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order {} [{}] accrual={}", self.id, self.status, self.accrual)
    }
}

// ---------------------------------------------------------------------------
// Withdrawal
// ---------------------------------------------------------------------------

/// A redemption of points against a (Luhn-valid) order number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// User-supplied identifier; each may be withdrawn at most once.
    pub id: String,
    pub user_id: UserId,
    pub sum: Decimal,
    /// Assigned by the store at persistence time.
    pub processed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Balance
// ---------------------------------------------------------------------------

/// Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Spendable points: processed accruals minus all withdrawals.
    pub current: Decimal,
    /// Total ever withdrawn.
    pub withdrawn: Decimal,
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "current={} withdrawn={}", self.current, self.withdrawn)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced on the request path and by the order merger.
#[derive(Debug, thiserror::Error)]
pub enum LoyaltyError {
    /// Bad identifier or empty input. User-visible, not retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duplicate order or withdrawal identifier.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Decimal, available: Decimal },

    /// Oracle answer identifies a different order than the one requested.
    #[error("Integrity fault: expected order {expected}, oracle answered for {received}")]
    Integrity { expected: String, received: String },

    /// Oracle answer outside the protocol (local-only status, negative accrual).
    #[error("Oracle answer rejected: {0}")]
    RejectedAnswer(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
