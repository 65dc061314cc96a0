//! Withdrawal admission.
//!
//! Validates a withdrawal and commits it against the user's current
//! balance. The balance read and the insert run under a per-user async
//! lock, so two concurrent requests from one user cannot both spend the
//! same points. Identifier reuse is rejected by the store's uniqueness
//! constraint, not by a prior lookup.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::balance;
use crate::luhn;
use crate::storage::{OrderStore, StorageError, WithdrawalStore};
use crate::types::{LoyaltyError, UserId, Withdrawal};

// ---------------------------------------------------------------------------
// Per-user locks
// ---------------------------------------------------------------------------

/// One async mutex per user, created on demand and dropped once idle.
#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    async fn acquire(&self, user_id: UserId) -> UserGuard<'_> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(user_id).or_default().clone()
        };
        UserGuard {
            locks: self,
            user_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct UserGuard<'a> {
    locks: &'a UserLocks,
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Clones are only taken under the map lock, so a count of 1 means idle.
        if map.get(&self.user_id).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(&self.user_id);
        }
    }
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

pub struct WithdrawalAdmission {
    orders: Arc<dyn OrderStore>,
    withdrawals: Arc<dyn WithdrawalStore>,
    locks: UserLocks,
}

impl WithdrawalAdmission {
    pub fn new(orders: Arc<dyn OrderStore>, withdrawals: Arc<dyn WithdrawalStore>) -> Self {
        Self {
            orders,
            withdrawals,
            locks: UserLocks::default(),
        }
    }

    /// Withdraw `sum` points from `user_id` against identifier `target_id`.
    pub async fn withdraw(
        &self,
        user_id: UserId,
        target_id: &str,
        sum: Decimal,
    ) -> Result<Withdrawal, LoyaltyError> {
        let target_id = target_id.trim();
        luhn::check(target_id)?;
        if sum <= Decimal::ZERO {
            return Err(LoyaltyError::Validation(format!(
                "withdrawal sum must be positive, got {sum}"
            )));
        }

        let _guard = self.locks.acquire(user_id).await;

        let available =
            balance::load(self.orders.as_ref(), self.withdrawals.as_ref(), user_id).await?;
        if sum > available.current {
            debug!(%user_id, %sum, available = %available.current, "Withdrawal refused");
            return Err(LoyaltyError::InsufficientFunds {
                requested: sum,
                available: available.current,
            });
        }

        match self.withdrawals.create_withdrawal(target_id, user_id, sum).await {
            Ok(withdrawal) => {
                info!(
                    %user_id,
                    order = %withdrawal.id,
                    sum = %withdrawal.sum,
                    remaining = %(available.current - sum),
                    "Withdrawal admitted"
                );
                Ok(withdrawal)
            }
            Err(StorageError::Conflict(_)) => {
                warn!(%user_id, order = target_id, "Withdrawal identifier already used");
                Err(LoyaltyError::Conflict(format!(
                    "order {target_id} already used for a withdrawal"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Users with a lock entry right now (held or awaited).
    pub fn active_users(&self) -> usize {
        self.locks.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
