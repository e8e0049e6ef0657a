//! Per-file reader bookkeeping.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::geo::QuadRect;
use crate::map_file::{FileIndex, MapReader};

/// State of one reader instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Open and available for a lease.
    Free,
    /// Leased to exactly one caller, or being opened for one.
    Busy,
    /// Leased while the handle was retired; closed on release.
    Evicting,
}

#[derive(Debug)]
pub(super) struct ReaderSlot {
    pub(super) id: u64,
    pub(super) state: SlotState,
    /// `None` while the instance is being opened outside the lock.
    pub(super) reader: Option<Arc<dyn MapReader>>,
}

/// One on-disk map file and its open reader instances.
///
/// All slot state transitions happen under `slots`; waiters for a free
/// instance park on `available`.
#[derive(Debug)]
pub struct MapFileHandle {
    path: PathBuf,
    index: FileIndex,
    pub(super) slots: Mutex<Vec<ReaderSlot>>,
    pub(super) available: Condvar,
    next_slot_id: AtomicU64,
    retired: AtomicBool,
    last_access: Mutex<Instant>,
}

impl MapFileHandle {
    pub fn new(path: impl Into<PathBuf>, index: FileIndex) -> Self {
        Self {
            path: path.into(),
            index,
            slots: Mutex::new(Vec::new()),
            available: Condvar::new(),
            next_slot_id: AtomicU64::new(0),
            retired: AtomicBool::new(false),
            last_access: Mutex::new(Instant::now()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_index(&self) -> &FileIndex {
        &self.index
    }

    /// File name without the extension, used for region matching.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    #[inline]
    pub fn intersects(&self, quad: &QuadRect) -> bool {
        self.index.intersects(quad)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Time since the last lease was taken on this file.
    pub fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    /// Number of open (or opening) reader instances.
    pub fn open_instances(&self) -> usize {
        self.slots.lock().len()
    }

    /// Number of instances currently leased.
    pub fn busy_instances(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|s| s.state != SlotState::Free)
            .count()
    }

    pub(super) fn next_slot_id(&self) -> u64 {
        self.next_slot_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(super) fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// Closes every free instance. Busy instances are untouched.
    ///
    /// Returns the number of instances closed.
    pub(super) fn close_free(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|s| !(s.state == SlotState::Free && s.reader.is_some()));
        before - slots.len()
    }

    /// Retires the handle: free instances are closed now, leased ones are
    /// marked `Evicting` and closed when their lease is released.
    ///
    /// Returns the number of instances closed immediately.
    pub(super) fn retire(&self) -> usize {
        self.retired.store(true, Ordering::Release);
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|s| s.state != SlotState::Free);
        for slot in slots.iter_mut() {
            slot.state = SlotState::Evicting;
        }
        let closed = before - slots.len();
        drop(slots);
        self.available.notify_all();
        closed
    }

    /// Returns a leased instance. Returns true if the instance was closed.
    pub(super) fn release_slot(&self, id: u64) -> bool {
        let mut slots = self.slots.lock();
        let Some(pos) = slots.iter().position(|s| s.id == id) else {
            tracing::warn!(path = %self.path.display(), slot = id, "Released reader slot no longer exists");
            return false;
        };

        let closed = match slots[pos].state {
            SlotState::Busy if !self.is_retired() => {
                slots[pos].state = SlotState::Free;
                false
            }
            SlotState::Busy | SlotState::Evicting => {
                slots.remove(pos);
                true
            }
            SlotState::Free => {
                tracing::warn!(path = %self.path.display(), slot = id, "Invalid transition: release of a free reader");
                false
            }
        };
        drop(slots);
        self.available.notify_one();
        closed
    }

    /// Drops a slot whose open failed.
    pub(super) fn abandon_slot(&self, id: u64) {
        self.slots.lock().retain(|s| s.id != id);
        self.available.notify_one();
    }
}
