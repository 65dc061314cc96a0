//! End-to-end tests against a real SQLite store and a scripted oracle.

mod fake_oracle;
mod ledger;
mod reconciliation;
