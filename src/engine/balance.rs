//! Balance calculator.
//!
//! The balance is derived on every call from a fresh read of the user's
//! orders and withdrawals; it is never cached or persisted.

use rust_decimal::Decimal;

use crate::storage::{OrderStore, StorageError, WithdrawalStore};
use crate::types::{Balance, Order, UserId, Withdrawal};

/// Processed accruals minus all withdrawals.
pub fn compute(orders: &[Order], withdrawals: &[Withdrawal]) -> Balance {
    let accrued: Decimal = orders.iter().map(Order::credited).sum();
    let withdrawn: Decimal = withdrawals.iter().map(|w| w.sum).sum();
    Balance {
        current: accrued - withdrawn,
        withdrawn,
    }
}

/// Read the user's records and compute their balance.
pub async fn load(
    orders: &dyn OrderStore,
    withdrawals: &dyn WithdrawalStore,
    user_id: UserId,
) -> Result<Balance, StorageError> {
    let (orders, withdrawals) = tokio::try_join!(
        orders.find_orders_for_user(user_id),
        withdrawals.find_withdrawals_for_user(user_id),
    )?;
    Ok(compute(&orders, &withdrawals))
}
