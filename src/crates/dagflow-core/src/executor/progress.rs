//! Progress reporting for runs
//!
//! The executor counts node calls: `total` rises by `k` every time `k`
//! invocations are about to launch, `completed` rises as batches finish.
//! A [`ProgressVisitor`] installed through
//! [`ExecuteOptions`](crate::ExecuteOptions) is notified after every change
//! with the updated pair. The counter is plain bookkeeping; it dictates no
//! output format.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Observer of the run's completed/total call counters.
pub trait ProgressVisitor: Send + Sync {
    /// Called after every counter change with the updated pair.
    fn on_progress(&self, completed: u64, total: u64);
}

/// Visitor that logs progress through `tracing` at info level.
#[derive(Debug, Default)]
pub struct TracingProgress;

impl ProgressVisitor for TracingProgress {
    fn on_progress(&self, completed: u64, total: u64) {
        tracing::info!(completed, total, "execution progress");
    }
}

pub(crate) struct ProgressCounter {
    completed: AtomicU64,
    total: AtomicU64,
    visitor: Option<Arc<dyn ProgressVisitor>>,
}

impl ProgressCounter {
    pub(crate) fn new(visitor: Option<Arc<dyn ProgressVisitor>>) -> Self {
        ProgressCounter {
            completed: AtomicU64::new(0),
            total: AtomicU64::new(0),
            visitor,
        }
    }

    pub(crate) fn scheduled(&self, calls: usize) {
        self.total.fetch_add(calls as u64, Ordering::Relaxed);
        self.notify();
    }

    pub(crate) fn completed(&self, calls: usize) {
        self.completed.fetch_add(calls as u64, Ordering::Relaxed);
        self.notify();
    }

    fn notify(&self) {
        if let Some(visitor) = &self.visitor {
            visitor.on_progress(
                self.completed.load(Ordering::Relaxed),
                self.total.load(Ordering::Relaxed),
            );
        }
    }
}
