//! Tracing setup and dispatcher counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process (`RUST_LOG`, default `info`).
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Snapshot of what one dispatcher has done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchCounts {
    pub launched: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Failures that reached at least one handler.
    pub observed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DispatchCounters {
    launched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    observed: AtomicU64,
}

impl DispatchCounters {
    pub(crate) fn launched(&self) {
        self.launched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn observed(&self) {
        self.observed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DispatchCounts {
        DispatchCounts {
            launched: self.launched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            observed: self.observed.load(Ordering::Relaxed),
        }
    }
}
