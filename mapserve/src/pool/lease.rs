//! Exclusive reader leases.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::handle::MapFileHandle;
use crate::map_file::MapReader;
use crate::telemetry::RoutingMetrics;

/// Exclusive use of one reader instance of a map file.
///
/// The lease returns its instance when dropped. `release` consumes the
/// lease, so an instance cannot be returned twice.
pub struct ReaderLease {
    handle: Arc<MapFileHandle>,
    slot: u64,
    reader: Arc<dyn MapReader>,
    acquired_at: Instant,
    metrics: Arc<RoutingMetrics>,
}

impl ReaderLease {
    pub(super) fn new(
        handle: Arc<MapFileHandle>,
        slot: u64,
        reader: Arc<dyn MapReader>,
        metrics: Arc<RoutingMetrics>,
    ) -> Self {
        Self {
            handle,
            slot,
            reader,
            acquired_at: Instant::now(),
            metrics,
        }
    }

    pub fn handle(&self) -> &Arc<MapFileHandle> {
        &self.handle
    }

    pub fn reader(&self) -> &Arc<dyn MapReader> {
        &self.reader
    }

    /// How long the lease has been held.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Returns the instance to its file.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for ReaderLease {
    type Target = dyn MapReader;

    fn deref(&self) -> &Self::Target {
        self.reader.as_ref()
    }
}

impl Drop for ReaderLease {
    fn drop(&mut self) {
        if self.handle.release_slot(self.slot) {
            self.metrics.readers_closed(1);
            tracing::debug!(
                path = %self.handle.path().display(),
                slot = self.slot,
                "Closed reader of retired map file"
            );
        }
    }
}

impl fmt::Debug for ReaderLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderLease")
            .field("path", &self.handle.path())
            .field("slot", &self.slot)
            .field("held_for", &self.held_for())
            .finish()
    }
}
