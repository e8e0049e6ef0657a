//! Cooperative cancellation and phase timing for one request.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Progress handle shared between the caller and the engine.
///
/// Engines poll [`is_cancelled`](Self::is_cancelled) inside their search
/// loops and return [`EngineError::Cancelled`](super::EngineError::Cancelled)
/// once it flips.
#[derive(Debug)]
pub struct RouteProgress {
    token: CancellationToken,
    started: Instant,
    phases: Mutex<BTreeMap<String, Duration>>,
    visited: AtomicU64,
}

impl Default for RouteProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteProgress {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Progress tied to an existing token, e.g. a child of a server shutdown token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            started: Instant::now(),
            phases: Mutex::new(BTreeMap::new()),
            visited: AtomicU64::new(0),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Time since the request started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Adds `duration` to the named phase.
    pub fn record_phase(&self, name: &str, duration: Duration) {
        *self.phases.lock().entry(name.to_string()).or_default() += duration;
    }

    /// Runs `f` and records its wall-clock time under `name`.
    pub fn timed<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record_phase(name, start.elapsed());
        out
    }

    pub fn phases(&self) -> BTreeMap<String, Duration> {
        self.phases.lock().clone()
    }

    /// Engines report explored graph segments here.
    pub fn add_visited(&self, count: u64) {
        self.visited.fetch_add(count, Ordering::Relaxed);
    }

    pub fn visited(&self) -> u64 {
        self.visited.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_through_child_token() {
        let parent = CancellationToken::new();
        let progress = RouteProgress::with_token(parent.child_token());
        assert!(!progress.is_cancelled());
        parent.cancel();
        assert!(progress.is_cancelled());
    }

    #[test]
    fn test_phases_accumulate() {
        let progress = RouteProgress::new();
        progress.record_phase("search", Duration::from_millis(5));
        progress.record_phase("search", Duration::from_millis(7));
        let value = progress.timed("prepare", || 42);

        assert_eq!(value, 42);
        let phases = progress.phases();
        assert_eq!(phases["search"], Duration::from_millis(12));
        assert!(phases.contains_key("prepare"));
    }
}
