//! Reconciliation scheduler.
//!
//! Polls the accrual oracle for every pending order on a fixed interval
//! and merges the answers into storage. Each cycle has its own deadline;
//! orders not reached before it are left for the next tick. Cancellation
//! is observed between orders, never inside one order's
//! fetch → merge → persist sequence. The deadline does bound the write:
//! an update abandoned at the deadline is a single statement, so the order
//! is either updated or still pending, and a pending one is re-polled.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::merger::{self, MergeOutcome};
use crate::accrual::AccrualOracle;
use crate::storage::{OrderStore, StorageError};
use crate::types::LoyaltyError;

// ---------------------------------------------------------------------------
// Settings and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerSettings {
    pub scan_interval: Duration,
    /// Budget for one whole cycle, independent of `scan_interval`.
    pub cycle_timeout: Duration,
}

/// Summary of one reconciliation cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    /// Orders fetched for this cycle.
    pub pending: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Oracle, integrity or store failures; the order stays pending.
    pub failed: usize,
    /// Orders left for the next tick (deadline or cancellation).
    pub deferred: usize,
    pub started_at: DateTime<Utc>,
}

impl CycleReport {
    fn new(cycle: u64, pending: usize) -> Self {
        Self {
            cycle,
            pending,
            updated: 0,
            unchanged: 0,
            failed: 0,
            deferred: 0,
            started_at: Utc::now(),
        }
    }
}

/// Reasons a whole cycle is abandoned before any order is polled.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Failed to load pending orders: {0}")]
    Store(#[from] StorageError),

    #[error("Cycle deadline passed while loading pending orders")]
    Deadline,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler {
    oracle: Arc<dyn AccrualOracle>,
    orders: Arc<dyn OrderStore>,
    settings: ReconcilerSettings,
    cycles: AtomicU64,
}

impl Reconciler {
    pub fn new(
        oracle: Arc<dyn AccrualOracle>,
        orders: Arc<dyn OrderStore>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            oracle,
            orders,
            settings,
            cycles: AtomicU64::new(0),
        }
    }

    /// Run one scan cycle.
    pub async fn run_cycle(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleReport, CycleError> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Instant::now() + self.settings.cycle_timeout;

        let pending = tokio::time::timeout_at(deadline, self.orders.find_orders_pending_scan())
            .await
            .map_err(|_| CycleError::Deadline)??;

        let total = pending.len();
        let mut report = CycleReport::new(cycle, total);

        for (idx, mut order) in pending.into_iter().enumerate() {
            if *shutdown.borrow() {
                report.deferred = total - idx;
                debug!(cycle, deferred = report.deferred, "Cancellation observed, stopping cycle");
                break;
            }
            if Instant::now() >= deadline {
                report.deferred = total - idx;
                warn!(cycle, deferred = report.deferred, "Cycle deadline reached");
                break;
            }

            let answer = match tokio::time::timeout_at(deadline, self.oracle.fetch(&order.id)).await
            {
                Ok(Ok(answer)) => answer,
                Ok(Err(e)) => {
                    warn!(
                        cycle,
                        order_id = %order.id,
                        transient = e.is_transient(),
                        error = %e,
                        "Oracle poll failed"
                    );
                    report.failed += 1;
                    continue;
                }
                Err(_) => {
                    report.deferred = total - idx;
                    warn!(
                        cycle,
                        order_id = %order.id,
                        deferred = report.deferred,
                        "Cycle deadline reached during oracle poll"
                    );
                    break;
                }
            };

            let merged = tokio::time::timeout_at(
                deadline,
                merger::merge(self.orders.as_ref(), &mut order, &answer),
            )
            .await;
            let Ok(merged) = merged else {
                report.deferred = total - idx;
                warn!(
                    cycle,
                    order_id = %order.id,
                    deferred = report.deferred,
                    "Cycle deadline reached while persisting oracle answer"
                );
                break;
            };

            match merged {
                Ok(MergeOutcome::Updated { .. }) => report.updated += 1,
                Ok(MergeOutcome::Unchanged | MergeOutcome::TerminalKept) => report.unchanged += 1,
                Err(e @ (LoyaltyError::Integrity { .. } | LoyaltyError::RejectedAnswer(_))) => {
                    error!(cycle, order_id = %order.id, error = %e, "Oracle answer skipped");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(cycle, order_id = %order.id, error = %e, "Failed to persist oracle answer");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Tick until `shutdown` turns true (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.settings.scan_interval.as_millis() as u64,
            cycle_timeout_ms = self.settings.cycle_timeout.as_millis() as u64,
            "Reconciler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    match self.run_cycle(&shutdown).await {
                        Ok(report) => log_cycle_report(&report),
                        Err(e) => error!(error = %e, "Reconciliation cycle aborted, retrying next tick"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(cycles = self.cycles.load(Ordering::Relaxed), "Reconciler stopped");
    }

    /// Spawn the loop on the runtime. The returned handle owns the
    /// cancellation signal.
    pub fn spawn(self: Arc<Self>) -> ReconcilerHandle {
        let (cancel, shutdown) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(shutdown).await });
        ReconcilerHandle { cancel, task }
    }
}

/// Log a cycle summary; quiet cycles only at debug.
fn log_cycle_report(report: &CycleReport) {
    if report.pending == 0 {
        debug!(cycle = report.cycle, "No pending orders");
        return;
    }
    info!(
        cycle = report.cycle,
        pending = report.pending,
        updated = report.updated,
        unchanged = report.unchanged,
        failed = report.failed,
        deferred = report.deferred,
        elapsed_ms = (Utc::now() - report.started_at).num_milliseconds(),
        "Reconciliation cycle complete"
    );
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

pub struct ReconcilerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signal the loop to stop starting new cycles.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Cancel and wait up to `grace` for an in-flight cycle to finish.
    /// Returns false if the task had to be aborted.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.cancel();
        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "Reconciler did not stop in time, aborting");
                task.abort();
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
