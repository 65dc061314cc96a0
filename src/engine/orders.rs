//! Order submission and per-user listings.

use tracing::{debug, info};

use crate::luhn;
use crate::storage::{OrderStore, StorageError, WithdrawalStore};
use crate::types::{LoyaltyError, Order, UserId, Withdrawal};

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Newly stored with status NEW.
    Accepted(Order),
    /// The same user already submitted this number.
    AlreadyUploaded(Order),
}

/// Submit a purchase order number for accrual.
///
/// Uniqueness is enforced by the store's insert; only after a conflict is
/// the existing row read to tell the owner's resubmission apart from a
/// number claimed by someone else.
pub async fn submit_order(
    store: &dyn OrderStore,
    user_id: UserId,
    number: &str,
) -> Result<SubmitOutcome, LoyaltyError> {
    let number = number.trim();
    luhn::check(number)?;

    match store.create_order(number, user_id).await {
        Ok(order) => {
            info!(order_id = %order.id, %user_id, "Order accepted");
            Ok(SubmitOutcome::Accepted(order))
        }
        Err(StorageError::Conflict(_)) => {
            let existing = store.find_order_by_id(number).await?;
            if existing.user_id == user_id {
                debug!(order_id = number, %user_id, "Order already uploaded by this user");
                Ok(SubmitOutcome::AlreadyUploaded(existing))
            } else {
                Err(LoyaltyError::Conflict(format!(
                    "order {number} was uploaded by another user"
                )))
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// The user's orders, oldest first.
pub async fn list_orders(store: &dyn OrderStore, user_id: UserId) -> Result<Vec<Order>, LoyaltyError> {
    Ok(store.find_orders_for_user(user_id).await?)
}

/// The user's withdrawals, oldest first.
pub async fn list_withdrawals(
    store: &dyn WithdrawalStore,
    user_id: UserId,
) -> Result<Vec<Withdrawal>, LoyaltyError> {
    Ok(store.find_withdrawals_for_user(user_id).await?)
}
