//! Global atomic counters for codegate observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    verifications: AtomicU64,
    corrections: AtomicU64,
    escalations: AtomicU64,
    stage_timeouts: AtomicU64,
    stage_crashes: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            verifications: AtomicU64::new(0),
            corrections: AtomicU64::new(0),
            escalations: AtomicU64::new(0),
            stage_timeouts: AtomicU64::new(0),
            stage_crashes: AtomicU64::new(0),
        }
    }

    pub fn inc_verifications(&self) {
        self.verifications.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "verifications", "counter incremented");
    }

    pub fn inc_corrections(&self) {
        self.corrections.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "corrections", "counter incremented");
    }

    pub fn inc_escalations(&self) {
        self.escalations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "escalations", "counter incremented");
    }

    pub fn inc_stage_timeouts(&self) {
        self.stage_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stage_timeouts", "counter incremented");
    }

    pub fn inc_stage_crashes(&self) {
        self.stage_crashes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stage_crashes", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            verifications = self.verifications(),
            corrections = self.corrections(),
            escalations = self.escalations(),
            stage_timeouts = self.stage_timeouts(),
            stage_crashes = self.stage_crashes(),
        );
    }

    pub fn verifications(&self) -> u64 {
        self.verifications.load(Ordering::Relaxed)
    }

    pub fn corrections(&self) -> u64 {
        self.corrections.load(Ordering::Relaxed)
    }

    pub fn escalations(&self) -> u64 {
        self.escalations.load(Ordering::Relaxed)
    }

    pub fn stage_timeouts(&self) -> u64 {
        self.stage_timeouts.load(Ordering::Relaxed)
    }

    pub fn stage_crashes(&self) -> u64 {
        self.stage_crashes.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.verifications.store(0, Ordering::Relaxed);
        self.corrections.store(0, Ordering::Relaxed);
        self.escalations.store(0, Ordering::Relaxed);
        self.stage_timeouts.store(0, Ordering::Relaxed);
        self.stage_crashes.store(0, Ordering::Relaxed);
    }
}
