//! Routing telemetry for observability and tests.
//!
//! Lock-free atomic counters shared by the reader pool, the context cache,
//! the orchestrator and the online adapter.
//!
//! ```text
//! ReaderPool ─────┐
//! ContextCache ───┼──► RoutingMetrics ──► MetricsSnapshot ──► logs, CLI
//! Orchestrator ───┘    (atomic counters)  (point-in-time copy)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters for the routing core.
#[derive(Debug, Default)]
pub struct RoutingMetrics {
    leases_acquired: AtomicU64,
    lease_timeouts: AtomicU64,
    readers_opened: AtomicU64,
    readers_closed: AtomicU64,
    reader_open_failures: AtomicU64,

    contexts_built: AtomicU64,
    contexts_live: AtomicU64,
    contexts_peak: AtomicU64,
    contexts_evicted: AtomicU64,
    contexts_rebuilt: AtomicU64,
    contexts_reused: AtomicU64,
    checkout_timeouts: AtomicU64,

    routes_completed: AtomicU64,
    routes_incomplete: AtomicU64,
    online_requests: AtomicU64,
    online_failures: AtomicU64,
}

impl RoutingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lease_acquired(&self) {
        self.leases_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lease_timed_out(&self) {
        self.lease_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reader_opened(&self) {
        self.readers_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn readers_closed(&self, count: usize) {
        self.readers_closed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn reader_open_failed(&self) {
        self.reader_open_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a newly built context and updates the live peak.
    pub fn context_built(&self) {
        self.contexts_built.fetch_add(1, Ordering::Relaxed);
        let live = self.contexts_live.fetch_add(1, Ordering::SeqCst) + 1;
        self.contexts_peak.fetch_max(live, Ordering::SeqCst);
    }

    pub fn context_evicted(&self) {
        self.contexts_evicted.fetch_add(1, Ordering::Relaxed);
        // Saturating: never wrap below zero if eviction races a failed build.
        let _ = self
            .contexts_live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1)));
    }

    pub fn context_rebuilt(&self) {
        self.contexts_rebuilt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn context_reused(&self) {
        self.contexts_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn checkout_timed_out(&self) {
        self.checkout_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn route_finished(&self, complete: bool) {
        if complete {
            self.routes_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.routes_incomplete.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn online_request(&self, succeeded: bool) {
        self.online_requests.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.online_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Highest number of contexts that existed at the same time.
    pub fn contexts_peak(&self) -> u64 {
        self.contexts_peak.load(Ordering::SeqCst)
    }

    pub fn online_requests(&self) -> u64 {
        self.online_requests.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            leases_acquired: self.leases_acquired.load(Ordering::Relaxed),
            lease_timeouts: self.lease_timeouts.load(Ordering::Relaxed),
            readers_opened: self.readers_opened.load(Ordering::Relaxed),
            readers_closed: self.readers_closed.load(Ordering::Relaxed),
            reader_open_failures: self.reader_open_failures.load(Ordering::Relaxed),
            contexts_built: self.contexts_built.load(Ordering::Relaxed),
            contexts_live: self.contexts_live.load(Ordering::SeqCst),
            contexts_peak: self.contexts_peak.load(Ordering::SeqCst),
            contexts_evicted: self.contexts_evicted.load(Ordering::Relaxed),
            contexts_rebuilt: self.contexts_rebuilt.load(Ordering::Relaxed),
            contexts_reused: self.contexts_reused.load(Ordering::Relaxed),
            checkout_timeouts: self.checkout_timeouts.load(Ordering::Relaxed),
            routes_completed: self.routes_completed.load(Ordering::Relaxed),
            routes_incomplete: self.routes_incomplete.load(Ordering::Relaxed),
            online_requests: self.online_requests.load(Ordering::Relaxed),
            online_failures: self.online_failures.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`RoutingMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub leases_acquired: u64,
    pub lease_timeouts: u64,
    pub readers_opened: u64,
    pub readers_closed: u64,
    pub reader_open_failures: u64,
    pub contexts_built: u64,
    pub contexts_live: u64,
    pub contexts_peak: u64,
    pub contexts_evicted: u64,
    pub contexts_rebuilt: u64,
    pub contexts_reused: u64,
    pub checkout_timeouts: u64,
    pub routes_completed: u64,
    pub routes_incomplete: u64,
    pub online_requests: u64,
    pub online_failures: u64,
}

impl MetricsSnapshot {
    /// Reader instances currently open (pooled and dedicated).
    pub fn readers_open(&self) -> u64 {
        self.readers_opened.saturating_sub(self.readers_closed)
    }
}
