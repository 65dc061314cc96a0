//! Core engine: accrual reconciliation and the balance ledger.
//!
//! The reconciler drives oracle polling and merging in the background;
//! order submission, balance and withdrawal admission serve the request
//! path against the same stores.

pub mod balance;
pub mod merger;
pub mod orders;
pub mod reconciler;
pub mod withdrawals;

pub use reconciler::{Reconciler, ReconcilerHandle, ReconcilerSettings};
pub use withdrawals::WithdrawalAdmission;
