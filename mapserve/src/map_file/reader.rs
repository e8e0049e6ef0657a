//! Memory-mapped map file readers.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use super::format::parse_header;
use super::{FileIndex, MapFileError, RoutingSubregion};
use crate::geo::QuadRect;

/// Read access to one open map file.
///
/// Implementations must be cheap to query from any thread; the pool
/// guarantees that one instance is leased to at most one thread at a time,
/// but dedicated readers owned by routing contexts move between threads.
pub trait MapReader: Send + Sync {
    /// Path the reader was opened from.
    fn path(&self) -> &Path;

    /// Parsed file index.
    fn file_index(&self) -> &FileIndex;

    /// Raw payload following the header.
    fn payload(&self) -> &[u8];

    /// Routing subregions intersecting `quad`.
    fn routing_subregions(&self, quad: &QuadRect) -> Vec<RoutingSubregion> {
        self.file_index()
            .routing_parts
            .iter()
            .flat_map(|p| p.subregions.iter())
            .filter(|s| s.intersects(quad))
            .copied()
            .collect()
    }
}

impl fmt::Debug for dyn MapReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapReader")
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

/// Opens reader instances for map files.
///
/// The pool goes through this seam for every new instance, which lets tests
/// count or fail opens without touching the filesystem.
pub trait ReaderOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn MapReader>, MapFileError>;
}

/// Map file reader backed by a read-only memory map.
pub struct MappedMapReader {
    path: PathBuf,
    index: FileIndex,
    payload_offset: usize,
    mmap: Mmap,
}

impl MappedMapReader {
    /// Maps `path` and parses its header.
    pub fn open(path: &Path) -> Result<Self, MapFileError> {
        let file = File::open(path).map_err(|e| MapFileError::io(path, e))?;
        // SAFETY: map files are replaced by rename, never rewritten in place,
        // so the mapped inode stays immutable for the lifetime of the map.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| MapFileError::io(path, e))?;
        let (index, payload_offset) = parse_header(path, &mmap)?;

        Ok(Self {
            path: path.to_path_buf(),
            index,
            payload_offset,
            mmap,
        })
    }

    /// Size of the mapped file in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl MapReader for MappedMapReader {
    fn path(&self) -> &Path {
        &self.path
    }

    fn file_index(&self) -> &FileIndex {
        &self.index
    }

    fn payload(&self) -> &[u8] {
        &self.mmap[self.payload_offset..]
    }
}

/// Default opener producing [`MappedMapReader`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapOpener;

impl ReaderOpener for MmapOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn MapReader>, MapFileError> {
        Ok(Arc::new(MappedMapReader::open(path)?))
    }
}
