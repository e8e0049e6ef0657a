//! Compressed map update monitor.
//!
//! Updated maps are dropped into a staging directory as `<name>.obf.gz`. On
//! each check, an archive newer than the live `<name>.obf` is unpacked next
//! to it as `<name>.obf.new` and swapped in through
//! [`MapCatalog::replace_file`].

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use flate2::read::MultiGzDecoder;
use tracing::{debug, info, warn};

use super::{CatalogError, MapCatalog};

/// Extension of staged map updates.
pub const UPDATE_EXTENSION: &str = "gz";

/// Watches a staging directory for compressed map updates.
pub struct UpdateMonitor {
    catalog: Arc<MapCatalog>,
    staging_dir: PathBuf,
    maps_dir: PathBuf,
}

impl UpdateMonitor {
    pub fn new(catalog: Arc<MapCatalog>, staging_dir: PathBuf, maps_dir: PathBuf) -> Self {
        Self {
            catalog,
            staging_dir,
            maps_dir,
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Installs every staged archive newer than its live file.
    ///
    /// A failing archive is logged and skipped; the others still apply.
    /// Returns the number of files replaced.
    pub fn check_updates(&self) -> Result<usize, CatalogError> {
        let pattern = self.staging_dir.join(format!("*.obf.{}", UPDATE_EXTENSION));
        let archives: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
            .filter_map(Result::ok)
            .collect();

        let mut replaced = 0;
        for archive in archives {
            let Some(name) = archive.file_stem() else {
                continue;
            };
            let target = self.maps_dir.join(name);
            if !is_newer(&archive, &target) {
                debug!(archive = %archive.display(), "Staged map is not newer than live file");
                continue;
            }

            match self.install(&archive, &target) {
                Ok(()) => replaced += 1,
                Err(e) => warn!(archive = %archive.display(), error = %e, "Failed to install map update"),
            }
        }

        if replaced > 0 {
            info!(replaced, "Installed map updates");
        }
        Ok(replaced)
    }

    fn install(&self, archive: &Path, target: &Path) -> Result<(), CatalogError> {
        let mut staged = target.as_os_str().to_owned();
        staged.push(".new");
        let staged = PathBuf::from(staged);

        if let Err(e) = decompress(archive, &staged) {
            let _ = std::fs::remove_file(&staged);
            return Err(CatalogError::Io {
                path: archive.to_path_buf(),
                source: e,
            });
        }

        self.catalog.replace_file(target, &staged)?;
        Ok(())
    }
}

fn decompress(archive: &Path, dest: &Path) -> io::Result<u64> {
    let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(archive)?));
    let mut writer = BufWriter::new(File::create(dest)?);
    let written = io::copy(&mut decoder, &mut writer)?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(written)
}

fn modified(path: &Path) -> Option<SystemTime> {
    path.metadata().and_then(|m| m.modified()).ok()
}

fn is_newer(archive: &Path, target: &Path) -> bool {
    match (modified(archive), modified(target)) {
        (Some(a), Some(t)) => a > t,
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::QuadRect;
    use crate::map_file::{write_map_file, FileIndex, MmapOpener};
    use crate::pool::{PoolConfig, ReaderPool};
    use crate::telemetry::RoutingMetrics;
    use filetime::{set_file_mtime, FileTime};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn gzip(src: &Path, dest: &Path) {
        let bytes = std::fs::read(src).unwrap();
        let mut encoder = GzEncoder::new(File::create(dest).unwrap(), Compression::fast());
        encoder.write_all(&bytes).unwrap();
        encoder.finish().unwrap();
    }

    fn setup() -> (TempDir, Arc<MapCatalog>, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let maps = temp.path().join("maps");
        let staging = temp.path().join("staging");
        std::fs::create_dir_all(&maps).unwrap();
        std::fs::create_dir_all(&staging).unwrap();

        let pool = Arc::new(ReaderPool::new(
            PoolConfig::default(),
            Arc::new(MmapOpener),
            Arc::new(RoutingMetrics::new()),
        ));
        let catalog = Arc::new(MapCatalog::new(pool));
        (temp, catalog, maps, staging)
    }

    #[test]
    fn test_newer_archive_replaces_live_file() {
        let (temp, catalog, maps, staging) = setup();
        let live = maps.join("Tile.obf");
        write_map_file(&live, &FileIndex::single("old", QuadRect::new(0, 0, 1, 1)), b"old").unwrap();
        set_file_mtime(&live, FileTime::from_unix_time(1_000, 0)).unwrap();
        catalog.handle_or_register(&live).unwrap();

        let fresh = temp.path().join("fresh.obf");
        write_map_file(&fresh, &FileIndex::single("new", QuadRect::new(5, 5, 9, 9)), b"new").unwrap();
        gzip(&fresh, &staging.join("Tile.obf.gz"));

        let monitor = UpdateMonitor::new(Arc::clone(&catalog), staging, maps);
        assert_eq!(monitor.check_updates().unwrap(), 1);

        let handle = catalog.handle(&live).unwrap();
        assert_eq!(handle.file_index().routing_parts[0].name, "new");
        assert!(!live.with_extension("obf.new").exists());

        // The unpacked file is now newer than the archive.
        assert_eq!(monitor.check_updates().unwrap(), 0);
    }

    #[test]
    fn test_older_archive_is_ignored() {
        let (temp, catalog, maps, staging) = setup();
        let live = maps.join("Tile.obf");
        write_map_file(&live, &FileIndex::single("old", QuadRect::new(0, 0, 1, 1)), b"old").unwrap();
        catalog.handle_or_register(&live).unwrap();

        let fresh = temp.path().join("fresh.obf");
        write_map_file(&fresh, &FileIndex::single("new", QuadRect::new(5, 5, 9, 9)), b"new").unwrap();
        let archive = staging.join("Tile.obf.gz");
        gzip(&fresh, &archive);
        set_file_mtime(&archive, FileTime::from_unix_time(1_000, 0)).unwrap();

        let monitor = UpdateMonitor::new(Arc::clone(&catalog), staging, maps);
        assert_eq!(monitor.check_updates().unwrap(), 0);
        assert_eq!(
            catalog.handle(&live).unwrap().file_index().routing_parts[0].name,
            "old"
        );
    }

    #[test]
    fn test_broken_archive_is_skipped() {
        let (_temp, catalog, maps, staging) = setup();
        std::fs::write(staging.join("Broken.obf.gz"), b"not gzip").unwrap();

        let monitor = UpdateMonitor::new(Arc::clone(&catalog), staging, maps.clone());
        assert_eq!(monitor.check_updates().unwrap(), 0);
        assert!(!maps.join("Broken.obf.new").exists());
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_new_map_is_registered() {
        let (temp, catalog, maps, staging) = setup();
        let fresh = temp.path().join("fresh.obf");
        write_map_file(&fresh, &FileIndex::single("added", QuadRect::new(5, 5, 9, 9)), b"").unwrap();
        gzip(&fresh, &staging.join("Added.obf.gz"));

        let monitor = UpdateMonitor::new(Arc::clone(&catalog), staging, maps.clone());
        assert_eq!(monitor.check_updates().unwrap(), 1);
        assert!(catalog.handle(&maps.join("Added.obf")).is_some());
    }
}
