//! Persistence layer.
//!
//! Defines the order and withdrawal store interfaces consumed by the
//! engine, with a SQLite implementation for production and an in-memory
//! one for tests. Every call is an async future: callers bound it with
//! `tokio::time::timeout` and cancel it by dropping it.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{Order, OrderStatus, UserId, Withdrawal};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Store failures. `NotFound` is reported distinctly from I/O failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Record not found")]
    NotFound,

    /// A uniqueness constraint rejected the write.
    #[error("Record already exists: {0}")]
    Conflict(String),

    /// A stored row could not be decoded into a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable keyed storage for orders.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a NEW order with zero accrual. Fails with `Conflict` if the
    /// identifier already exists for any user.
    async fn create_order(&self, id: &str, user_id: UserId) -> Result<Order, StorageError>;

    async fn find_order_by_id(&self, id: &str) -> Result<Order, StorageError>;

    /// All orders of a user, oldest first.
    async fn find_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StorageError>;

    /// Orders in a non-terminal status, oldest first.
    async fn find_orders_pending_scan(&self) -> Result<Vec<Order>, StorageError>;

    /// Overwrite status and accrual of a non-terminal order. Returns
    /// `NotFound` if no such non-terminal order exists.
    async fn update_order(
        &self,
        id: &str,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<(), StorageError>;
}

/// Durable keyed storage for withdrawals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// Persist a withdrawal; `processed_at` is assigned here. Fails with
    /// `Conflict` if the identifier was already withdrawn.
    async fn create_withdrawal(
        &self,
        id: &str,
        user_id: UserId,
        sum: Decimal,
    ) -> Result<Withdrawal, StorageError>;

    async fn find_withdrawal_by_id(&self, id: &str) -> Result<Withdrawal, StorageError>;

    /// All withdrawals of a user, oldest first.
    async fn find_withdrawals_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Withdrawal>, StorageError>;
}
