//! Binary map file access.
//!
//! A map file starts with a small header carrying its *file index*: the
//! routing parts and the bounding boxes of their subregions. The rest of the
//! file is an opaque payload consumed by the routing engine.
//!
//! ```text
//! ┌────────┬─────────┬───────────┬──────────────────┬─────────────┐
//! │ "MSRF" │ version │ index_len │ index (bincode)  │ payload ... │
//! │ 4 B    │ u32 LE  │ u32 LE    │ index_len bytes  │             │
//! └────────┴─────────┴───────────┴──────────────────┴─────────────┘
//! ```
//!
//! Readers memory-map the whole file; the persistent [`IndexCache`] keeps
//! parsed indexes across restarts so startup does not touch every file.

mod format;
mod index;
mod index_cache;
mod reader;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use format::{read_file_index, write_map_file, FORMAT_VERSION, MAGIC};
pub use index::{FileIndex, RoutingPart, RoutingSubregion};
pub use index_cache::{default_cache_path, CachedFileIndex, IndexCache, IndexCacheKey};
pub use reader::{MapReader, MappedMapReader, MmapOpener, ReaderOpener};

/// File extension of map files.
pub const MAP_FILE_EXTENSION: &str = "obf";

/// Errors raised while reading map files or their indexes.
#[derive(Debug, Error)]
pub enum MapFileError {
    /// I/O error on the map file.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file does not start with the map file magic.
    #[error("{path} is not a map file")]
    BadMagic { path: PathBuf },

    /// The file was written with an unsupported format version.
    #[error("{path} has unsupported format version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },

    /// The header is truncated or the index does not deserialize.
    #[error("{path} has a corrupt index: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl MapFileError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MapFileError::Io {
            path: path.into(),
            source,
        }
    }
}
