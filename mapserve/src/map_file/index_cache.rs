//! Persistent file index cache for fast startup.
//!
//! Parsing the header of every map file on startup is cheap per file but adds
//! up for a full planet directory. The cache stores each parsed [`FileIndex`]
//! keyed by path, size and modification time; an entry is reused only while
//! all three still match the file on disk.

use std::collections::BTreeMap;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::FileIndex;

/// Cache format version; bump when the layout of cached data changes.
const CACHE_FORMAT: u32 = 1;

/// Identity of a map file on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexCacheKey {
    pub size: u64,
    /// Modification time as seconds since UNIX_EPOCH.
    pub mtime_secs: u64,
}

impl IndexCacheKey {
    /// Compute the key from the file's current metadata.
    pub fn compute(path: &Path) -> io::Result<Self> {
        let metadata = path.metadata()?;
        let mtime_secs = metadata
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(Self {
            size: metadata.len(),
            mtime_secs,
        })
    }
}

/// A cached index together with the file identity it was parsed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFileIndex {
    pub key: IndexCacheKey,
    pub index: FileIndex,
}

/// All cached file indexes.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IndexCache {
    format: u32,
    entries: BTreeMap<PathBuf, CachedFileIndex>,
    /// When the cache was last written (secs since UNIX_EPOCH).
    pub written_at_secs: u64,
}

impl IndexCache {
    pub fn new() -> Self {
        Self {
            format: CACHE_FORMAT,
            entries: BTreeMap::new(),
            written_at_secs: 0,
        }
    }

    /// Load cache from file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);

        let cache: IndexCache = bincode::deserialize_from(reader).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to deserialize index cache: {}", e),
            )
        })?;

        if cache.format != CACHE_FORMAT {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Index cache format {} is not {}", cache.format, CACHE_FORMAT),
            ));
        }
        Ok(cache)
    }

    /// Load the cache, falling back to an empty one when missing or corrupt.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cache) => {
                tracing::info!(
                    path = %path.display(),
                    entries = cache.len(),
                    age = %cache.age_human(),
                    "Loaded map index cache"
                );
                cache
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable map index cache");
                Self::new()
            }
        }
    }

    /// Save cache to file.
    pub fn save(&mut self, path: &Path) -> io::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.written_at_secs = now_secs();

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        let file = std::fs::File::create(&temp_path)?;
        let writer = BufWriter::new(file);

        bincode::serialize_into(writer, &*self)
            .map_err(|e| io::Error::other(format!("Failed to serialize index cache: {}", e)))?;

        std::fs::rename(&temp_path, path)?;

        tracing::debug!(path = %path.display(), entries = self.len(), "Saved map index cache");
        Ok(())
    }

    /// Returns the cached index for `path` if it still matches the file.
    pub fn lookup(&self, path: &Path) -> Option<FileIndex> {
        let cached = self.entries.get(path)?;
        let current = IndexCacheKey::compute(path).ok()?;
        (cached.key == current).then(|| cached.index.clone())
    }

    /// Store the index parsed from `path` under the file's current identity.
    pub fn insert(&mut self, path: &Path, index: FileIndex) -> io::Result<()> {
        let key = IndexCacheKey::compute(path)?;
        self.entries
            .insert(path.to_path_buf(), CachedFileIndex { key, index });
        Ok(())
    }

    pub fn remove(&mut self, path: &Path) -> Option<CachedFileIndex> {
        self.entries.remove(path)
    }

    /// Drop entries whose file no longer exists.
    pub fn retain_existing(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| path.exists());
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache age in seconds.
    pub fn age_secs(&self) -> u64 {
        now_secs().saturating_sub(self.written_at_secs)
    }

    /// Get human-readable cache age.
    pub fn age_human(&self) -> String {
        let secs = self.age_secs();

        if secs < 60 {
            format!("{}s ago", secs)
        } else if secs < 3600 {
            format!("{}m ago", secs / 60)
        } else if secs < 86400 {
            format!("{}h ago", secs / 3600)
        } else {
            format!("{}d ago", secs / 86400)
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Get the default cache file path.
pub fn default_cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("mapserve").join("indexes.cache"))
}
