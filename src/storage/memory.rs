//! In-memory store for tests and local experiments.
//!
//! Same semantics as the SQLite store: identifiers are unique keys,
//! terminal orders are never updated, listings are oldest first.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{OrderStore, StorageError, WithdrawalStore};
use crate::types::{Order, OrderStatus, UserId, Withdrawal};

#[derive(Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<String, Order>>,
    withdrawals: RwLock<HashMap<String, Withdrawal>>,
    order_updates: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an order as-is, bypassing the NEW-only creation path.
    pub async fn seed_order(&self, order: Order) {
        self.orders.write().await.insert(order.id.clone(), order);
    }

    /// Number of successful `update_order` calls so far.
    pub fn order_updates(&self) -> usize {
        self.order_updates.load(Ordering::SeqCst)
    }

    pub async fn withdrawal_count(&self) -> usize {
        self.withdrawals.read().await.len()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order(&self, id: &str, user_id: UserId) -> Result<Order, StorageError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(id) {
            return Err(StorageError::Conflict(format!("order {id}")));
        }
        let order = Order {
            id: id.to_string(),
            user_id,
            status: OrderStatus::New,
            accrual: Decimal::ZERO,
            uploaded_at: Utc::now(),
        };
        orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn find_order_by_id(&self, id: &str) -> Result<Order, StorageError> {
        self.orders
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn find_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, StorageError> {
        let mut found: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|o| o.uploaded_at);
        Ok(found)
    }

    async fn find_orders_pending_scan(&self) -> Result<Vec<Order>, StorageError> {
        let mut found: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect();
        found.sort_by_key(|o| o.uploaded_at);
        Ok(found)
    }

    async fn update_order(
        &self,
        id: &str,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<(), StorageError> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(id) {
            Some(order) if !order.status.is_terminal() => {
                order.status = status;
                order.accrual = accrual;
                self.order_updates.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(StorageError::NotFound),
        }
    }
}

#[async_trait]
impl WithdrawalStore for MemoryStore {
    async fn create_withdrawal(
        &self,
        id: &str,
        user_id: UserId,
        sum: Decimal,
    ) -> Result<Withdrawal, StorageError> {
        let mut withdrawals = self.withdrawals.write().await;
        if withdrawals.contains_key(id) {
            return Err(StorageError::Conflict(format!("withdrawal {id}")));
        }
        let withdrawal = Withdrawal {
            id: id.to_string(),
            user_id,
            sum,
            processed_at: Utc::now(),
        };
        withdrawals.insert(withdrawal.id.clone(), withdrawal.clone());
        Ok(withdrawal)
    }

    async fn find_withdrawal_by_id(&self, id: &str) -> Result<Withdrawal, StorageError> {
        self.withdrawals
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn find_withdrawals_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Withdrawal>, StorageError> {
        let mut found: Vec<Withdrawal> = self
            .withdrawals
            .read()
            .await
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|w| w.processed_at);
        Ok(found)
    }
}
