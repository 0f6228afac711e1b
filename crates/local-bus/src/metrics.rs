//! Dispatch counters.
//!
//! Lock-free counters updated on every publish; read them through
//! [`DispatchMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::outcome::DispatchResult;

/// Thread-safe dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Publish calls that reached dispatch (validation passed).
    pub events_published: AtomicU64,
    /// Publishes that found no subscribers.
    pub no_subscribers: AtomicU64,
    /// Publishes rejected or cancelled before any handler ran.
    pub publishes_rejected: AtomicU64,
    pub handlers_invoked: AtomicU64,
    pub handlers_failed: AtomicU64,
    pub handlers_timed_out: AtomicU64,
    pub handlers_cancelled: AtomicU64,
    /// Cumulative dispatch time in nanoseconds.
    pub dispatch_time_ns: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rejected(&self) {
        self.publishes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one finished dispatch.
    pub fn record_dispatch(&self, result: &DispatchResult, elapsed: Duration) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        self.dispatch_time_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);

        if result.outcomes.is_empty() {
            self.no_subscribers.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let (mut started, mut failed, mut timed_out, mut cancelled) = (0u64, 0u64, 0u64, 0u64);
        for outcome in &result.outcomes {
            use crate::error::HandlerFailureKind as Kind;
            match outcome.failure().map(|f| f.kind()) {
                None => started += 1,
                Some(Kind::Execution) => {
                    started += 1;
                    failed += 1;
                }
                Some(Kind::Timeout) => {
                    started += 1;
                    timed_out += 1;
                }
                Some(Kind::Cancelled) => cancelled += 1,
            }
        }
        self.handlers_invoked.fetch_add(started, Ordering::Relaxed);
        self.handlers_failed.fetch_add(failed, Ordering::Relaxed);
        self.handlers_timed_out.fetch_add(timed_out, Ordering::Relaxed);
        self.handlers_cancelled.fetch_add(cancelled, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let published = self.events_published.load(Ordering::Relaxed);
        let total_ns = self.dispatch_time_ns.load(Ordering::Relaxed);
        MetricsSnapshot {
            events_published: published,
            no_subscribers: self.no_subscribers.load(Ordering::Relaxed),
            publishes_rejected: self.publishes_rejected.load(Ordering::Relaxed),
            handlers_invoked: self.handlers_invoked.load(Ordering::Relaxed),
            handlers_failed: self.handlers_failed.load(Ordering::Relaxed),
            handlers_timed_out: self.handlers_timed_out.load(Ordering::Relaxed),
            handlers_cancelled: self.handlers_cancelled.load(Ordering::Relaxed),
            avg_dispatch_ns: if published > 0 { total_ns / published } else { 0 },
        }
    }
}

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub no_subscribers: u64,
    pub publishes_rejected: u64,
    pub handlers_invoked: u64,
    pub handlers_failed: u64,
    pub handlers_timed_out: u64,
    pub handlers_cancelled: u64,
    pub avg_dispatch_ns: u64,
}
