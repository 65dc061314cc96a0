//! Order state merger.
//!
//! Applies an oracle answer to a stored order. Safe to call repeatedly
//! with the same answer: a write happens only when status or accrual
//! actually change, and terminal orders are never rewritten.

use tracing::{debug, info, warn};

use crate::accrual::AccrualAnswer;
use crate::storage::OrderStore;
use crate::types::{LoyaltyError, Order, OrderStatus};

/// What a merge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Status and/or accrual were written.
    Updated { from: OrderStatus, to: OrderStatus },
    /// The answer matched the stored values; nothing written.
    Unchanged,
    /// The order is already terminal and the answer differs; nothing written.
    TerminalKept,
}

/// Decide the merge without touching storage.
pub fn plan(current: &Order, answer: &AccrualAnswer) -> Result<MergeOutcome, LoyaltyError> {
    if answer.order != current.id {
        return Err(LoyaltyError::Integrity {
            expected: current.id.clone(),
            received: answer.order.clone(),
        });
    }
    answer
        .validate()
        .map_err(|e| LoyaltyError::RejectedAnswer(e.to_string()))?;

    if answer.status == current.status && answer.effective_accrual() == current.accrual {
        return Ok(MergeOutcome::Unchanged);
    }

    if current.status.is_terminal() {
        return Ok(MergeOutcome::TerminalKept);
    }

    Ok(MergeOutcome::Updated {
        from: current.status,
        to: answer.status,
    })
}

/// Merge `answer` into `order`, persisting through `store` when needed.
///
/// On a successful write `order` is updated in place, so feeding the same
/// answer again is a no-op.
pub async fn merge(
    store: &dyn OrderStore,
    order: &mut Order,
    answer: &AccrualAnswer,
) -> Result<MergeOutcome, LoyaltyError> {
    let outcome = plan(order, answer)?;

    match outcome {
        MergeOutcome::Unchanged => {
            debug!(order_id = %order.id, status = %order.status, "Oracle answer unchanged");
        }
        MergeOutcome::TerminalKept => {
            warn!(
                order_id = %order.id,
                stored = %order.status,
                answered = %answer.status,
                "Oracle answer would regress a terminal order; ignored"
            );
        }
        MergeOutcome::Updated { from, to } => {
            let accrual = answer.effective_accrual();
            store.update_order(&order.id, to, accrual).await?;
            order.status = to;
            order.accrual = accrual;
            info!(
                order_id = %order.id,
                from = %from,
                to = %to,
                accrual = %accrual,
                "Order updated from oracle"
            );
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MockOrderStore, StorageError};
    use mockall::predicate::eq;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn answer(order: &str, status: OrderStatus, accrual: Option<Decimal>) -> AccrualAnswer {
        AccrualAnswer {
            order: order.to_string(),
            status,
            accrual,
        }
    }

    #[test]
    fn test_plan_id_mismatch_is_integrity_fault() {
        let order = Order::sample("79927398713", Uuid::new_v4(), OrderStatus::New, Decimal::ZERO);
        let err = plan(&order, &answer("12345678903", OrderStatus::Processed, Some(dec!(5))))
            .unwrap_err();
        assert!(matches!(err, LoyaltyError::Integrity { .. }));
    }

    #[test]
    fn test_plan_unchanged_answer() {
        let order =
            Order::sample("79927398713", Uuid::new_v4(), OrderStatus::Processing, Decimal::ZERO);
        let outcome = plan(&order, &answer("79927398713", OrderStatus::Processing, None)).unwrap();
        assert_eq!(outcome, MergeOutcome::Unchanged);
    }

    #[test]
    fn test_plan_terminal_order_not_regressed() {
        let order =
            Order::sample("79927398713", Uuid::new_v4(), OrderStatus::Processed, dec!(10));
        let outcome = plan(&order, &answer("79927398713", OrderStatus::Processing, None)).unwrap();
        assert_eq!(outcome, MergeOutcome::TerminalKept);

        let confirm =
            plan(&order, &answer("79927398713", OrderStatus::Processed, Some(dec!(10)))).unwrap();
        assert_eq!(confirm, MergeOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_same_answer_twice_writes_once() {
        let mut store = MockOrderStore::new();
        store
            .expect_update_order()
            .with(eq("79927398713"), eq(OrderStatus::Processed), eq(dec!(500)))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut order =
            Order::sample("79927398713", Uuid::new_v4(), OrderStatus::Registered, Decimal::ZERO);
        let ans = answer("79927398713", OrderStatus::Processed, Some(dec!(500)));

        let first = merge(&store, &mut order, &ans).await.unwrap();
        let second = merge(&store, &mut order, &ans).await.unwrap();

        assert!(matches!(first, MergeOutcome::Updated { .. }));
        assert_eq!(second, MergeOutcome::Unchanged);
        assert_eq!(order.status, OrderStatus::Processed);
        assert_eq!(order.accrual, dec!(500));
    }

    #[tokio::test]
    async fn test_integrity_fault_makes_no_write() {
        let mut store = MockOrderStore::new();
        store.expect_update_order().never();

        let mut order =
            Order::sample("79927398713", Uuid::new_v4(), OrderStatus::New, Decimal::ZERO);
        let result = merge(
            &store,
            &mut order,
            &answer("2377225624", OrderStatus::Processed, Some(dec!(1))),
        )
        .await;

        assert!(matches!(result, Err(LoyaltyError::Integrity { .. })));
        assert_eq!(order.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn test_out_of_protocol_answers_make_no_write() {
        let mut store = MockOrderStore::new();
        store.expect_update_order().never();

        let mut order =
            Order::sample("79927398713", Uuid::new_v4(), OrderStatus::Processing, Decimal::ZERO);
        for bad in [
            answer("79927398713", OrderStatus::Processed, Some(dec!(-100))),
            answer("79927398713", OrderStatus::New, None),
        ] {
            let result = merge(&store, &mut order, &bad).await;
            assert!(matches!(result, Err(LoyaltyError::RejectedAnswer(_))), "{bad:?}");
        }
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.accrual, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_order_untouched() {
        let mut store = MockOrderStore::new();
        store
            .expect_update_order()
            .times(1)
            .returning(|_, _, _| Err(StorageError::NotFound));

        let mut order =
            Order::sample("79927398713", Uuid::new_v4(), OrderStatus::New, Decimal::ZERO);
        let result = merge(
            &store,
            &mut order,
            &answer("79927398713", OrderStatus::Invalid, None),
        )
        .await;

        assert!(matches!(result, Err(LoyaltyError::Persistence(StorageError::NotFound))));
        assert_eq!(order.status, OrderStatus::New);
    }
}
