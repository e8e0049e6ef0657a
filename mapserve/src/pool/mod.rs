//! Bounded pool of map file readers.
//!
//! Every map file owns a small set of reader instances. A caller leases one
//! instance exclusively for the duration of a read or route operation.
//!
//! ```text
//! acquire(handle)
//!   ├── free instance?          → mark Busy, lease it
//!   ├── below per-file cap?     → reserve Busy slot, open outside the lock
//!   └── otherwise               → wait on the handle's condvar, re-checking
//!                                 at least every poll interval, until timeout
//!
//! ReaderLease::drop
//!   └── Busy → Free, notify one waiter (retired handle: close instead)
//!
//! sweep_idle (every 15 min)
//!   └── close every Free instance
//! ```
//!
//! Opening an instance (memory map + header parse) and closing it are the only
//! I/O the pool performs, and neither happens while a handle lock is held.

mod handle;
mod lease;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::map_file::{MapFileError, MapReader, ReaderOpener};
use crate::telemetry::RoutingMetrics;

pub use handle::{MapFileHandle, SlotState};
pub use lease::ReaderLease;

use handle::ReaderSlot;

/// Default cap on open reader instances per map file.
pub const DEFAULT_MAX_READERS_PER_FILE: usize = 15;

/// Configuration for the reader pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum open reader instances per file (default: 15).
    pub max_readers_per_file: usize,
    /// How long `acquire` waits for a free instance (default: 1s).
    pub acquire_timeout: Duration,
    /// Longest interval between availability checks while waiting (default: 10ms).
    pub poll_interval: Duration,
    /// Interval of the idle sweep (default: 15 min).
    pub idle_sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_readers_per_file: DEFAULT_MAX_READERS_PER_FILE,
            acquire_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
            idle_sweep_interval: Duration::from_secs(15 * 60),
        }
    }
}

impl PoolConfig {
    pub fn with_max_readers_per_file(mut self, max: usize) -> Self {
        self.max_readers_per_file = max.max(1);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_idle_sweep_interval(mut self, interval: Duration) -> Self {
        self.idle_sweep_interval = interval;
        self
    }
}

/// Reasons a reader could not be leased.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every instance stayed busy for the whole wait.
    #[error("timed out after {waited:?} waiting for a reader of {path}")]
    Timeout { path: PathBuf, waited: Duration },

    /// A new instance could not be opened.
    #[error("cannot open a reader for {path}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: MapFileError,
    },

    /// The file was replaced; callers must resolve the new handle.
    #[error("{path} has been replaced")]
    Retired { path: PathBuf },
}

/// Reader pool shared by every request.
pub struct ReaderPool {
    config: PoolConfig,
    opener: Arc<dyn ReaderOpener>,
    metrics: Arc<RoutingMetrics>,
}

impl ReaderPool {
    pub fn new(
        config: PoolConfig,
        opener: Arc<dyn ReaderOpener>,
        metrics: Arc<RoutingMetrics>,
    ) -> Self {
        Self {
            config,
            opener,
            metrics,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Leases a reader with the configured timeout.
    pub fn acquire(&self, handle: &Arc<MapFileHandle>) -> Result<ReaderLease, PoolError> {
        self.acquire_timeout(handle, self.config.acquire_timeout)
    }

    /// Leases a reader, waiting at most `timeout` for a free instance.
    ///
    /// Returns within `timeout + poll_interval`, plus the time of one open
    /// if this call is the one opening a new instance.
    pub fn acquire_timeout(
        &self,
        handle: &Arc<MapFileHandle>,
        timeout: Duration,
    ) -> Result<ReaderLease, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut slots = handle.slots.lock();

        loop {
            if handle.is_retired() {
                return Err(PoolError::Retired {
                    path: handle.path().to_path_buf(),
                });
            }

            let free = slots
                .iter_mut()
                .find(|s| s.state == SlotState::Free)
                .and_then(|slot| {
                    let reader = slot.reader.clone()?;
                    slot.state = SlotState::Busy;
                    Some((slot.id, reader))
                });
            if let Some((id, reader)) = free {
                drop(slots);
                return Ok(self.lease(handle, id, reader));
            }

            if slots.len() < self.config.max_readers_per_file {
                let id = handle.next_slot_id();
                slots.push(ReaderSlot {
                    id,
                    state: SlotState::Busy,
                    reader: None,
                });
                drop(slots);
                return self.open_into_slot(handle, id);
            }

            let now = Instant::now();
            if now >= deadline {
                drop(slots);
                self.metrics.lease_timed_out();
                debug!(path = %handle.path().display(), waited = ?timeout, "Reader lease timed out");
                return Err(PoolError::Timeout {
                    path: handle.path().to_path_buf(),
                    waited: timeout,
                });
            }
            let slice = (deadline - now).min(self.config.poll_interval);
            handle.available.wait_for(&mut slots, slice);
        }
    }

    fn open_into_slot(&self, handle: &Arc<MapFileHandle>, id: u64) -> Result<ReaderLease, PoolError> {
        match self.opener.open(handle.path()) {
            Ok(reader) => {
                self.metrics.reader_opened();
                {
                    let mut slots = handle.slots.lock();
                    if let Some(slot) = slots.iter_mut().find(|s| s.id == id) {
                        slot.reader = Some(Arc::clone(&reader));
                    }
                }
                debug!(path = %handle.path().display(), slot = id, "Opened map reader");
                Ok(self.lease(handle, id, reader))
            }
            Err(e) => {
                handle.abandon_slot(id);
                self.metrics.reader_open_failed();
                warn!(path = %handle.path().display(), error = %e, "Failed to open map reader");
                Err(PoolError::Unavailable {
                    path: handle.path().to_path_buf(),
                    source: e,
                })
            }
        }
    }

    fn lease(&self, handle: &Arc<MapFileHandle>, id: u64, reader: Arc<dyn MapReader>) -> ReaderLease {
        handle.touch();
        self.metrics.lease_acquired();
        ReaderLease::new(Arc::clone(handle), id, reader, Arc::clone(&self.metrics))
    }

    /// Opens a reader owned by the caller, outside the per-file cap.
    ///
    /// Used by cached routing contexts, which keep their reader for their
    /// whole lifetime.
    pub fn open_dedicated(&self, handle: &MapFileHandle) -> Result<Arc<dyn MapReader>, PoolError> {
        match self.opener.open(handle.path()) {
            Ok(reader) => {
                self.metrics.reader_opened();
                Ok(reader)
            }
            Err(e) => {
                self.metrics.reader_open_failed();
                warn!(path = %handle.path().display(), error = %e, "Failed to open dedicated map reader");
                Err(PoolError::Unavailable {
                    path: handle.path().to_path_buf(),
                    source: e,
                })
            }
        }
    }

    /// Records that a dedicated reader was dropped by its owner.
    pub fn dedicated_closed(&self) {
        self.metrics.readers_closed(1);
    }

    /// Closes every free instance of the given files.
    ///
    /// Returns the number of instances closed.
    pub fn sweep_idle<'a, I>(&self, handles: I) -> usize
    where
        I: IntoIterator<Item = &'a Arc<MapFileHandle>>,
    {
        let closed: usize = handles.into_iter().map(|h| h.close_free()).sum();
        if closed > 0 {
            self.metrics.readers_closed(closed);
            debug!(closed, "Idle sweep closed map readers");
        }
        closed
    }

    /// Retires a handle that is being replaced.
    pub fn retire(&self, handle: &MapFileHandle) -> usize {
        let closed = handle.retire();
        self.metrics.readers_closed(closed);
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::QuadRect;
    use crate::map_file::{write_map_file, FileIndex, MmapOpener};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use tempfile::TempDir;

    struct FailingOpener;

    impl ReaderOpener for FailingOpener {
        fn open(&self, path: &Path) -> Result<Arc<dyn MapReader>, MapFileError> {
            Err(MapFileError::Corrupt {
                path: path.to_path_buf(),
                reason: "test".to_string(),
            })
        }
    }

    fn setup(config: PoolConfig) -> (TempDir, ReaderPool, Arc<MapFileHandle>, Arc<RoutingMetrics>) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tile.obf");
        let index = FileIndex::single("tile", QuadRect::new(0, 0, 10, 10));
        write_map_file(&path, &index, b"payload").unwrap();

        let metrics = Arc::new(RoutingMetrics::new());
        let pool = ReaderPool::new(config, Arc::new(MmapOpener), Arc::clone(&metrics));
        let handle = Arc::new(MapFileHandle::new(path, index));
        (temp, pool, handle, metrics)
    }

    #[test]
    fn test_acquire_reuses_released_instance() {
        let (_temp, pool, handle, metrics) = setup(PoolConfig::default());

        let lease = pool.acquire(&handle).unwrap();
        assert_eq!(lease.payload(), b"payload");
        lease.release();

        let _again = pool.acquire(&handle).unwrap();
        assert_eq!(handle.open_instances(), 1);
        assert_eq!(metrics.snapshot().readers_opened, 1);
    }

    #[test]
    fn test_acquire_opens_up_to_cap() {
        let config = PoolConfig::default().with_max_readers_per_file(2);
        let (_temp, pool, handle, _metrics) = setup(config);

        let a = pool.acquire(&handle).unwrap();
        let b = pool.acquire(&handle).unwrap();
        assert_eq!(handle.busy_instances(), 2);

        let err = pool
            .acquire_timeout(&handle, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, PoolError::Timeout { .. }));

        drop(a);
        drop(b);
        assert_eq!(handle.busy_instances(), 0);
        assert_eq!(handle.open_instances(), 2);
    }

    #[test]
    fn test_timeout_is_bounded() {
        let config = PoolConfig::default()
            .with_max_readers_per_file(1)
            .with_poll_interval(Duration::from_millis(10));
        let (_temp, pool, handle, metrics) = setup(config);
        let _held = pool.acquire(&handle).unwrap();

        let timeout = Duration::from_millis(100);
        let start = Instant::now();
        let result = pool.acquire_timeout(&handle, timeout);
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(PoolError::Timeout { .. })));
        assert!(elapsed >= timeout);
        // Scheduler slack on top of timeout + poll interval.
        assert!(elapsed < timeout + Duration::from_millis(10) + Duration::from_millis(200));
        assert_eq!(metrics.snapshot().lease_timeouts, 1);
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let config = PoolConfig::default()
            .with_max_readers_per_file(1)
            .with_poll_interval(Duration::from_millis(500));
        let (_temp, pool, handle, _metrics) = setup(config);
        let pool = Arc::new(pool);
        let held = pool.acquire(&handle).unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            let handle = Arc::clone(&handle);
            thread::spawn(move || {
                let start = Instant::now();
                let lease = pool.acquire_timeout(&handle, Duration::from_secs(5));
                (lease.is_ok(), start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        held.release();
        let (ok, waited) = waiter.join().unwrap();
        assert!(ok);
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn test_busy_never_exceeds_cap_under_contention() {
        let cap = 3;
        let config = PoolConfig::default()
            .with_max_readers_per_file(cap)
            .with_acquire_timeout(Duration::from_secs(5));
        let (_temp, pool, handle, _metrics) = setup(config);
        let pool = Arc::new(pool);
        let in_use = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..12)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let handle = Arc::clone(&handle);
                let in_use = Arc::clone(&in_use);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..10 {
                        let lease = pool.acquire(&handle).unwrap();
                        let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        assert!(handle.busy_instances() <= cap);
                        thread::sleep(Duration::from_millis(1));
                        in_use.fetch_sub(1, Ordering::SeqCst);
                        drop(lease);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= cap);
        assert!(handle.open_instances() <= cap);
    }

    #[test]
    fn test_open_failure_is_unavailable_and_not_permanent() {
        let (_temp, _pool, handle, metrics) = setup(PoolConfig::default());
        let failing = ReaderPool::new(
            PoolConfig::default(),
            Arc::new(FailingOpener),
            Arc::clone(&metrics),
        );

        let err = failing.acquire(&handle).unwrap_err();
        assert!(matches!(err, PoolError::Unavailable { .. }));
        assert_eq!(handle.open_instances(), 0);

        let working = ReaderPool::new(PoolConfig::default(), Arc::new(MmapOpener), metrics);
        assert!(working.acquire(&handle).is_ok());
    }

    #[test]
    fn test_sweep_closes_only_free_instances() {
        let (_temp, pool, handle, metrics) = setup(PoolConfig::default());
        let a = pool.acquire(&handle).unwrap();
        let b = pool.acquire(&handle).unwrap();
        b.release();

        let closed = pool.sweep_idle([&handle]);
        assert_eq!(closed, 1);
        assert_eq!(handle.open_instances(), 1);
        assert_eq!(handle.busy_instances(), 1);
        drop(a);
        assert_eq!(metrics.snapshot().readers_closed, 1);
    }

    #[test]
    fn test_retired_handle_closes_on_release() {
        let (_temp, pool, handle, metrics) = setup(PoolConfig::default());
        let held = pool.acquire(&handle).unwrap();
        let spare = pool.acquire(&handle).unwrap();
        spare.release();

        assert_eq!(pool.retire(&handle), 1);
        assert!(matches!(
            pool.acquire(&handle),
            Err(PoolError::Retired { .. })
        ));

        // The in-flight lease keeps working until released.
        assert_eq!(held.payload(), b"payload");
        held.release();
        assert_eq!(handle.open_instances(), 0);
        assert_eq!(metrics.snapshot().readers_closed, 2);
    }

    #[test]
    fn test_open_dedicated_is_outside_cap() {
        let config = PoolConfig::default().with_max_readers_per_file(1);
        let (_temp, pool, handle, _metrics) = setup(config);
        let _lease = pool.acquire(&handle).unwrap();

        let dedicated = pool.open_dedicated(&handle).unwrap();
        assert_eq!(dedicated.payload(), b"payload");
        assert_eq!(handle.open_instances(), 1);
    }
}
