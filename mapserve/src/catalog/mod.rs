//! Map catalog: every known map file, keyed by path.
//!
//! The catalog answers "which files overlap this box" from the parsed file
//! indexes, without opening any reader. Each entry sits behind its own lock
//! so replacing one file never blocks lookups on the others.
//!
//! ```text
//! resolve_files(quad, hint)
//!   │
//!   ├── every handle whose routing subregions intersect quad
//!   │
//!   └── ≥ 4 candidates and a hint polyline?
//!         ├── sample the hint, map samples to regions
//!         ├── keep files whose region is needed
//!         └── drop parents fully covered by a kept child
//! ```

mod region;
mod updates;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::geo::{distance_m, LatLon, QuadRect};
use crate::map_file::{read_file_index, FileIndex, IndexCache, MapFileError, MAP_FILE_EXTENSION};
use crate::pool::{MapFileHandle, ReaderPool};
use crate::routing::NativeLibrary;

pub use region::{region_key, BoxRegion, BoxRegionIndex, RegionIndex};
pub use updates::{UpdateMonitor, UPDATE_EXTENSION};

/// Minimum candidate count before region narrowing applies.
pub const NARROWING_THRESHOLD: usize = 4;

/// Distance between hint samples used for region narrowing.
const HINT_SAMPLE_SPACING_M: f64 = 5_000.0;

/// Catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    MapFile(#[from] MapFileError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid map directory pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

type Entry = Arc<RwLock<Arc<MapFileHandle>>>;

/// Registry of map files.
pub struct MapCatalog {
    entries: DashMap<PathBuf, Entry>,
    pool: Arc<ReaderPool>,
    regions: Option<Arc<dyn RegionIndex>>,
    native: Option<Arc<dyn NativeLibrary>>,
    index_cache: Mutex<IndexCache>,
    index_cache_path: Option<PathBuf>,
}

impl MapCatalog {
    pub fn new(pool: Arc<ReaderPool>) -> Self {
        Self {
            entries: DashMap::new(),
            pool,
            regions: None,
            native: None,
            index_cache: Mutex::new(IndexCache::new()),
            index_cache_path: None,
        }
    }

    pub fn with_region_index(mut self, regions: Arc<dyn RegionIndex>) -> Self {
        self.regions = Some(regions);
        self
    }

    pub fn with_native_library(mut self, native: Arc<dyn NativeLibrary>) -> Self {
        self.native = Some(native);
        self
    }

    /// Persist parsed indexes at `path`, loading whatever is already there.
    pub fn with_index_cache(mut self, path: PathBuf) -> Self {
        self.index_cache = Mutex::new(IndexCache::load_or_default(&path));
        self.index_cache_path = Some(path);
        self
    }

    pub fn pool(&self) -> &Arc<ReaderPool> {
        &self.pool
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scans `dir` for map files and registers them.
    ///
    /// Indexes still valid in the persistent cache are reused; the rest are
    /// parsed in parallel. Unreadable files are logged and skipped.
    pub fn load_directory(&self, dir: &Path) -> Result<usize, CatalogError> {
        std::fs::read_dir(dir).map_err(|source| CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let pattern = dir.join(format!("*.{}", MAP_FILE_EXTENSION));
        let paths: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
            .filter_map(Result::ok)
            .collect();

        let mut cached = Vec::new();
        let mut missing = Vec::new();
        {
            let cache = self.index_cache.lock();
            for path in paths {
                match cache.lookup(&path) {
                    Some(index) => cached.push((path, index)),
                    None => missing.push(path),
                }
            }
        }

        let parsed: Vec<(PathBuf, Result<FileIndex, MapFileError>)> = missing
            .par_iter()
            .map(|path| (path.clone(), read_file_index(path)))
            .collect();

        let cached_count = cached.len();
        let mut parsed_count = 0;
        {
            let mut cache = self.index_cache.lock();
            for (path, result) in parsed {
                match result {
                    Ok(index) => {
                        if let Err(e) = cache.insert(&path, index.clone()) {
                            warn!(path = %path.display(), error = %e, "Cannot stat map file for index cache");
                        }
                        cached.push((path, index));
                        parsed_count += 1;
                    }
                    Err(e) => warn!(error = %e, "Skipping unreadable map file"),
                }
            }
            cache.retain_existing();
        }

        let total = cached.len();
        for (path, index) in cached {
            self.install(path, index);
        }
        self.save_index_cache();

        info!(
            dir = %dir.display(),
            files = total,
            cached = cached_count,
            parsed = parsed_count,
            "Loaded map catalog"
        );
        Ok(total)
    }

    /// Registers one file with an already parsed index.
    pub fn register(&self, path: impl Into<PathBuf>, index: FileIndex) -> Arc<MapFileHandle> {
        let path = path.into();
        if let Some(native) = &self.native {
            if let Err(e) = native.init_file(&path) {
                warn!(path = %path.display(), error = %e, "Native library rejected map file");
            }
        }
        self.install(path, index)
    }

    fn install(&self, path: PathBuf, index: FileIndex) -> Arc<MapFileHandle> {
        let handle = Arc::new(MapFileHandle::new(path.clone(), index));
        match self.entries.get(&path).map(|e| Arc::clone(e.value())) {
            Some(entry) => {
                let mut current = entry.write();
                self.pool.retire(&current);
                *current = Arc::clone(&handle);
            }
            None => {
                self.entries
                    .insert(path, Arc::new(RwLock::new(Arc::clone(&handle))));
            }
        }
        handle
    }

    /// Current handle for `path`.
    pub fn handle(&self, path: &Path) -> Option<Arc<MapFileHandle>> {
        self.entries.get(path).map(|e| e.value().read().clone())
    }

    /// Current handle for `path`, parsing and registering the file if needed.
    pub fn handle_or_register(&self, path: &Path) -> Result<Arc<MapFileHandle>, CatalogError> {
        if let Some(handle) = self.handle(path) {
            return Ok(handle);
        }
        let index = read_file_index(path)?;
        Ok(self.register(path, index))
    }

    /// Every registered handle, ordered by path.
    pub fn files(&self) -> Vec<Arc<MapFileHandle>> {
        let mut files: Vec<Arc<MapFileHandle>> = self
            .entries
            .iter()
            .map(|e| e.value().read().clone())
            .collect();
        files.sort_by(|a, b| a.path().cmp(b.path()));
        files
    }

    /// Files whose routing subregions intersect `quad`, optionally narrowed
    /// by the regions a `hint` polyline passes through.
    pub fn resolve_files(&self, quad: &QuadRect, hint: Option<&[LatLon]>) -> Vec<Arc<MapFileHandle>> {
        let candidates: Vec<Arc<MapFileHandle>> = self
            .files()
            .into_iter()
            .filter(|h| h.intersects(quad))
            .collect();

        match (hint, &self.regions) {
            (Some(hint), Some(regions))
                if candidates.len() >= NARROWING_THRESHOLD && !hint.is_empty() =>
            {
                let narrowed = narrow_by_region(&candidates, hint, regions.as_ref());
                if narrowed.is_empty() {
                    debug!(candidates = candidates.len(), "Region narrowing matched nothing; using all candidates");
                    candidates
                } else {
                    debug!(
                        candidates = candidates.len(),
                        kept = narrowed.len(),
                        "Narrowed map files by region"
                    );
                    narrowed
                }
            }
            _ => candidates,
        }
    }

    /// Re-parses the index of one file and installs a fresh handle.
    pub fn rebuild_index_for(&self, path: &Path) -> Result<Arc<MapFileHandle>, CatalogError> {
        let index = read_file_index(path)?;
        {
            let mut cache = self.index_cache.lock();
            cache
                .insert(path, index.clone())
                .map_err(|e| CatalogError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
        }
        let handle = self.install(path.to_path_buf(), index);
        self.save_index_cache();
        info!(path = %path.display(), "Rebuilt map file index");
        Ok(handle)
    }

    /// Moves `new_file` over `old_path` and swaps in a fresh handle.
    ///
    /// Leases on the old handle stay valid until released; their readers keep
    /// the old file mapped. Only the entry for `old_path` is locked.
    pub fn replace_file(&self, old_path: &Path, new_file: &Path) -> Result<Arc<MapFileHandle>, CatalogError> {
        let Some(entry) = self.entries.get(old_path).map(|e| Arc::clone(e.value())) else {
            std::fs::rename(new_file, old_path).map_err(|e| CatalogError::Io {
                path: old_path.to_path_buf(),
                source: e,
            })?;
            return self.rebuild_index_for(old_path);
        };

        let mut current = entry.write();
        let closed = self.pool.retire(&current);
        if let Some(native) = &self.native {
            native.close_file(old_path);
        }

        let swapped = std::fs::rename(new_file, old_path)
            .map_err(|e| CatalogError::Io {
                path: old_path.to_path_buf(),
                source: e,
            })
            .and_then(|_| read_file_index(old_path).map_err(CatalogError::from));

        let index = match swapped {
            Ok(index) => index,
            Err(e) => {
                drop(current);
                self.entries.remove(old_path);
                self.index_cache.lock().remove(old_path);
                self.save_index_cache();
                warn!(path = %old_path.display(), error = %e, "Map file replacement failed; file removed from catalog");
                return Err(e);
            }
        };

        let handle = Arc::new(MapFileHandle::new(old_path.to_path_buf(), index.clone()));
        *current = Arc::clone(&handle);
        drop(current);

        if let Some(native) = &self.native {
            if let Err(e) = native.init_file(old_path) {
                warn!(path = %old_path.display(), error = %e, "Native library rejected replaced map file");
            }
        }
        if let Err(e) = self.index_cache.lock().insert(old_path, index) {
            warn!(path = %old_path.display(), error = %e, "Cannot refresh index cache entry");
        }
        self.save_index_cache();

        info!(path = %old_path.display(), closed_readers = closed, "Replaced map file");
        Ok(handle)
    }

    /// Closes every free reader of every file.
    pub fn sweep_idle(&self) -> usize {
        let files = self.files();
        self.pool.sweep_idle(files.iter())
    }

    fn save_index_cache(&self) {
        let Some(path) = &self.index_cache_path else {
            return;
        };
        if let Err(e) = self.index_cache.lock().save(path) {
            warn!(path = %path.display(), error = %e, "Failed to write map index cache");
        }
    }
}

/// Points along `line`, at every vertex and every `spacing_m` in between.
fn sample_polyline(line: &[LatLon], spacing_m: f64) -> Vec<LatLon> {
    let mut samples = Vec::with_capacity(line.len());
    let Some(first) = line.first() else {
        return samples;
    };
    samples.push(*first);
    for pair in line.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let steps = (distance_m(a, b) / spacing_m).floor() as usize;
        for i in 1..=steps {
            let t = i as f64 * spacing_m / distance_m(a, b);
            if t >= 1.0 {
                break;
            }
            samples.push(LatLon::new(a.lat + (b.lat - a.lat) * t, a.lon + (b.lon - a.lon) * t));
        }
        samples.push(b);
    }
    samples
}

fn narrow_by_region(
    candidates: &[Arc<MapFileHandle>],
    hint: &[LatLon],
    regions: &dyn RegionIndex,
) -> Vec<Arc<MapFileHandle>> {
    let sample_regions: Vec<Vec<String>> = sample_polyline(hint, HINT_SAMPLE_SPACING_M)
        .into_iter()
        .map(|p| regions.regions_at(p))
        .collect();
    let needed: HashSet<&str> = sample_regions.iter().flatten().map(String::as_str).collect();

    let kept: Vec<(String, &Arc<MapFileHandle>)> = candidates
        .iter()
        .map(|h| (region_key(&h.stem()), h))
        .filter(|(key, _)| needed.contains(key.as_str()))
        .collect();
    let kept_keys: HashSet<&str> = kept.iter().map(|(k, _)| k.as_str()).collect();

    kept.iter()
        .filter(|(key, _)| {
            let children: Vec<&str> = kept_keys
                .iter()
                .copied()
                .filter(|c| *c != key.as_str() && regions.is_within(c, key))
                .collect();
            if children.is_empty() {
                return true;
            }
            // Keep the parent unless every sample it serves is also served by a kept child.
            !sample_regions
                .iter()
                .filter(|names| names.iter().any(|n| n == key))
                .all(|names| names.iter().any(|n| children.contains(&n.as_str())))
        })
        .map(|(_, h)| Arc::clone(*h))
        .collect()
}
