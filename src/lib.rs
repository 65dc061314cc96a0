//! Loyalty: purchase-loyalty backend.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod luhn;
pub mod accrual;
pub mod engine;
pub mod storage;
pub mod api;
