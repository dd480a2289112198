//! Process-wide counters.
//!
//! Counters are bumped silently at the call site; [`Metrics::flush`] emits
//! them as one `info!` line at the end of a CLI command.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    artifacts_built: AtomicU64,
    artifacts_deferred: AtomicU64,
    artifacts_failed: AtomicU64,
    artifacts_skipped: AtomicU64,
    tables_cloned: AtomicU64,
    namespaces_dropped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            artifacts_built: AtomicU64::new(0),
            artifacts_deferred: AtomicU64::new(0),
            artifacts_failed: AtomicU64::new(0),
            artifacts_skipped: AtomicU64::new(0),
            tables_cloned: AtomicU64::new(0),
            namespaces_dropped: AtomicU64::new(0),
        }
    }

    pub fn inc_built(&self) {
        self.artifacts_built.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deferred(&self) {
        self.artifacts_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.artifacts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.artifacts_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tables_cloned(&self, n: u64) {
        self.tables_cloned.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "tables_cloned", n = n, "counter incremented");
    }

    pub fn inc_namespaces_dropped(&self) {
        self.namespaces_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all current values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            artifacts_built = self.artifacts_built(),
            artifacts_deferred = self.artifacts_deferred(),
            artifacts_failed = self.artifacts_failed(),
            artifacts_skipped = self.artifacts_skipped(),
            tables_cloned = self.tables_cloned(),
            namespaces_dropped = self.namespaces_dropped(),
        );
    }

    pub fn artifacts_built(&self) -> u64 {
        self.artifacts_built.load(Ordering::Relaxed)
    }

    pub fn artifacts_deferred(&self) -> u64 {
        self.artifacts_deferred.load(Ordering::Relaxed)
    }

    pub fn artifacts_failed(&self) -> u64 {
        self.artifacts_failed.load(Ordering::Relaxed)
    }

    pub fn artifacts_skipped(&self) -> u64 {
        self.artifacts_skipped.load(Ordering::Relaxed)
    }

    pub fn tables_cloned(&self) -> u64 {
        self.tables_cloned.load(Ordering::Relaxed)
    }

    pub fn namespaces_dropped(&self) -> u64 {
        self.namespaces_dropped.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (tests).
    pub fn reset(&self) {
        for counter in [
            &self.artifacts_built,
            &self.artifacts_deferred,
            &self.artifacts_failed,
            &self.artifacts_skipped,
            &self.tables_cloned,
            &self.namespaces_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
