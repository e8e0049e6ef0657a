//! Application bootstrap and lifecycle management.
//!
//! `MapServeApp` owns every shared component as an explicit struct and runs
//! the periodic maintenance work on a Tokio runtime.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         MapServeApp                          │
//! │                                                              │
//! │  ReaderPool ◄── MapCatalog ◄── RoutingContextCache           │
//! │       ▲             ▲                 ▲                      │
//! │       └─────────────┴── RoutingOrchestrator ──► online       │
//! │                                                              │
//! │  maintenance (spawn_blocking on each tick):                  │
//! │    reader-sweep   every pool.idle_sweep_interval   (15 min)  │
//! │    context-sweep  every contexts.sweep_interval    (5 min)   │
//! │    map-updates    every maps.update_interval       (15 min)  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use mapserve::app::{AppConfig, Collaborators, MapServeApp};
//! use mapserve::routing::StraightLineEngine;
//!
//! let app = MapServeApp::start_sync(config, Collaborators::new(Arc::new(StraightLineEngine::new())))?;
//! let outcome = app.orchestrator().route("car", start, end, &[], &[], &RouteProgress::new())?;
//! app.shutdown();
//! ```

mod config;
mod error;

pub use config::{AppConfig, ConfigError, MapsConfig, DEFAULT_UPDATE_INTERVAL_SECS};
pub use error::AppError;

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{MapCatalog, RegionIndex, UpdateMonitor};
use crate::map_file::MmapOpener;
use crate::online::{HttpClient, OnlineRoutingAdapter, ReqwestClient};
use crate::pool::ReaderPool;
use crate::routing::{NativeLibrary, RoutingContextCache, RoutingEngine, RoutingOrchestrator};
use crate::telemetry::{MetricsSnapshot, RoutingMetrics};

/// External collaborators injected into the app.
pub struct Collaborators {
    pub engine: Arc<dyn RoutingEngine>,
    pub native: Option<Arc<dyn NativeLibrary>>,
    pub regions: Option<Arc<dyn RegionIndex>>,
    /// HTTP client for online providers (default: reqwest, created on demand).
    pub http: Option<Arc<dyn HttpClient>>,
}

impl Collaborators {
    pub fn new(engine: Arc<dyn RoutingEngine>) -> Self {
        Self {
            engine,
            native: None,
            regions: None,
            http: None,
        }
    }

    pub fn with_native_library(mut self, native: Arc<dyn NativeLibrary>) -> Self {
        self.native = Some(native);
        self
    }

    pub fn with_region_index(mut self, regions: Arc<dyn RegionIndex>) -> Self {
        self.regions = Some(regions);
        self
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }
}

/// The map serving and routing core with its maintenance tasks.
pub struct MapServeApp {
    config: AppConfig,
    metrics: Arc<RoutingMetrics>,
    catalog: Arc<MapCatalog>,
    cache: Arc<RoutingContextCache>,
    orchestrator: Arc<RoutingOrchestrator>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    /// Owned runtime when created via `start_sync()`.
    runtime: Option<Runtime>,
}

impl MapServeApp {
    /// Wires every component and loads the map directory, without starting
    /// maintenance tasks.
    pub fn build(config: AppConfig, collaborators: Collaborators) -> Result<Self, AppError> {
        let metrics = Arc::new(RoutingMetrics::new());
        let pool = Arc::new(ReaderPool::new(
            config.pool.clone(),
            Arc::new(MmapOpener),
            Arc::clone(&metrics),
        ));

        let mut catalog = MapCatalog::new(pool);
        if let Some(path) = &config.maps.index_cache {
            catalog = catalog.with_index_cache(path.clone());
        }
        if let Some(regions) = collaborators.regions {
            catalog = catalog.with_region_index(regions);
        }
        if let Some(native) = collaborators.native {
            catalog = catalog.with_native_library(native);
        }
        let catalog = Arc::new(catalog);
        let loaded = catalog.load_directory(&config.maps.dir)?;

        let cache = Arc::new(RoutingContextCache::new(
            config.contexts.clone(),
            Arc::clone(&collaborators.engine),
            Arc::clone(&catalog),
            config.maps.routing_file.clone(),
            Arc::clone(&metrics),
        ));

        let mut orchestrator = RoutingOrchestrator::new(
            config.orchestrator.clone(),
            Arc::clone(&catalog),
            Arc::clone(&cache),
            collaborators.engine,
            Arc::new(config.providers.clone()),
            Arc::clone(&metrics),
        );
        if !config.providers.is_empty() {
            let http: Arc<dyn HttpClient> = match collaborators.http {
                Some(http) => http,
                None => Arc::new(ReqwestClient::new().map_err(|e| AppError::HttpClient(e.to_string()))?),
            };
            orchestrator = orchestrator.with_online_adapter(Arc::new(OnlineRoutingAdapter::new(http, Arc::clone(&metrics))));
        }

        info!(
            maps_dir = %config.maps.dir.display(),
            files = loaded,
            routing_file = ?config.maps.routing_file,
            providers = config.providers.len(),
            "MapServe core ready"
        );

        Ok(Self {
            config,
            metrics,
            catalog,
            cache,
            orchestrator: Arc::new(orchestrator),
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
            runtime: None,
        })
    }

    /// Builds the app and starts maintenance on the caller's runtime.
    pub async fn start(config: AppConfig, collaborators: Collaborators) -> Result<Self, AppError> {
        let mut app = tokio::task::spawn_blocking(move || Self::build(config, collaborators))
            .await
            .map_err(|e| AppError::RuntimeCreation(e.to_string()))??;
        app.spawn_maintenance();
        Ok(app)
    }

    /// Builds the app and starts maintenance on a runtime owned by the app.
    pub fn start_sync(config: AppConfig, collaborators: Collaborators) -> Result<Self, AppError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mapserve-maint")
            .enable_all()
            .build()
            .map_err(|e| AppError::RuntimeCreation(e.to_string()))?;

        let mut app = Self::build(config, collaborators)?;
        {
            let _guard = runtime.enter();
            app.spawn_maintenance();
        }
        app.runtime = Some(runtime);
        Ok(app)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<MapCatalog> {
        &self.catalog
    }

    pub fn context_cache(&self) -> &Arc<RoutingContextCache> {
        &self.cache
    }

    pub fn orchestrator(&self) -> &Arc<RoutingOrchestrator> {
        &self.orchestrator
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Token cancelled on shutdown; request progress can hang off a child.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    fn spawn_maintenance(&mut self) {
        let catalog = Arc::clone(&self.catalog);
        self.spawn_periodic("reader-sweep", self.config.pool.idle_sweep_interval, move || {
            catalog.sweep_idle();
        });

        let cache = Arc::clone(&self.cache);
        self.spawn_periodic("context-sweep", self.config.contexts.sweep_interval, move || {
            cache.sweep();
        });

        if let Some(staging) = self.config.maps.update_dir.clone() {
            let monitor = UpdateMonitor::new(Arc::clone(&self.catalog), staging, self.config.maps.dir.clone());
            self.spawn_periodic("map-updates", self.config.maps.update_interval, move || {
                if let Err(e) = monitor.check_updates() {
                    warn!(error = %e, "Map update check failed");
                }
            });
        }
    }

    /// Runs `work` on the blocking pool every `period` until shutdown.
    fn spawn_periodic<F>(&mut self, name: &'static str, period: Duration, work: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let token = self.shutdown.child_token();
        let work = Arc::new(work);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            debug!(task = name, period = ?period, "Maintenance task started");

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break,

                    _ = ticker.tick() => {
                        let work = Arc::clone(&work);
                        if let Err(e) = tokio::task::spawn_blocking(move || work()).await {
                            warn!(task = name, error = %e, "Maintenance task failed");
                        }
                    }
                }
            }

            debug!(task = name, "Maintenance task stopped");
        });
        self.tasks.push(handle);
    }

    /// Stops maintenance and waits for running work to finish.
    pub fn shutdown(mut self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        match self.runtime.take() {
            Some(runtime) => {
                runtime.block_on(join_all(tasks));
                runtime.shutdown_timeout(Duration::from_secs(5));
            }
            None => {
                // Started on a caller's runtime; the tasks end on their own.
                drop(tasks);
            }
        }
        self.release_resources();
        self.log_final_metrics();
    }

    /// Async variant of [`shutdown`](Self::shutdown) for apps started with [`start`](Self::start).
    pub async fn shutdown_async(mut self) {
        self.shutdown.cancel();
        join_all(std::mem::take(&mut self.tasks)).await;
        self.release_resources();
        self.log_final_metrics();
    }

    /// Evicts cached contexts and closes idle readers.
    ///
    /// Contexts still leased are evicted when their lease is dropped.
    fn release_resources(&self) {
        let drained = self.cache.drain();
        let closed = self.catalog.sweep_idle();
        info!(
            contexts_evicted = drained.evicted,
            contexts_in_use = drained.marked,
            readers_closed = closed,
            "Released routing resources"
        );
    }

    fn log_final_metrics(&self) {
        let snapshot = self.metrics.snapshot();
        info!(
            leases = snapshot.leases_acquired,
            lease_timeouts = snapshot.lease_timeouts,
            contexts_built = snapshot.contexts_built,
            contexts_peak = snapshot.contexts_peak,
            routes_completed = snapshot.routes_completed,
            routes_incomplete = snapshot.routes_incomplete,
            "MapServe core stopped"
        );
    }
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Maintenance task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{LatLon, QuadRect};
    use crate::map_file::{write_map_file, FileIndex};
    use crate::pool::PoolConfig;
    use crate::routing::{ContextCacheConfig, RouteProgress, RouteStatus, StraightLineEngine};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn config(root: &Path) -> AppConfig {
        let maps = root.join("maps");
        std::fs::create_dir_all(&maps).unwrap();
        let bounds = QuadRect::from_degrees(48.0, 8.0, 47.0, 9.0);
        write_map_file(&maps.join("tile.obf"), &FileIndex::single("tile", bounds), b"v1").unwrap();

        AppConfig::new(MapsConfig::new(maps).with_index_cache(Some(root.join("indexes.cache"))))
            .with_pool(PoolConfig::default().with_idle_sweep_interval(Duration::from_millis(20)))
            .with_contexts(ContextCacheConfig::default().with_sweep_interval(Duration::from_millis(20)))
    }

    fn collaborators() -> Collaborators {
        Collaborators::new(Arc::new(StraightLineEngine::new()))
    }

    #[test]
    fn test_build_loads_maps_and_routes() {
        let temp = TempDir::new().unwrap();
        let app = MapServeApp::build(config(temp.path()), collaborators()).unwrap();
        assert_eq!(app.catalog().len(), 1);
        assert!(temp.path().join("indexes.cache").exists());

        let outcome = app
            .orchestrator()
            .route(
                "car",
                LatLon::new(47.5, 8.2),
                LatLon::new(47.5, 8.8),
                &[],
                &[],
                &RouteProgress::new(),
            )
            .unwrap();
        assert_eq!(outcome.status, RouteStatus::Complete);
        assert_eq!(app.metrics().routes_completed, 1);
    }

    #[test]
    fn test_missing_maps_dir_fails() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig::new(MapsConfig::new(temp.path().join("absent")).with_index_cache(None));
        assert!(MapServeApp::build(config, collaborators()).is_err());
    }

    #[test]
    fn test_maintenance_sweeps_idle_readers() {
        let temp = TempDir::new().unwrap();
        let app = MapServeApp::start_sync(config(temp.path()), collaborators()).unwrap();

        let handle = app.catalog().files().pop().unwrap();
        drop(app.catalog().pool().acquire(&handle).unwrap());
        assert_eq!(app.metrics().readers_opened, 1);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.open_instances() > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.open_instances(), 0);
        app.shutdown();
    }

    #[test]
    fn test_update_monitor_installs_staged_map() {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let mut config = config(temp.path());
        config.maps = config
            .maps
            .with_update_dir(&staging)
            .with_update_interval(Duration::from_millis(20));

        let app = MapServeApp::start_sync(config, collaborators()).unwrap();
        let live = temp.path().join("maps").join("tile.obf");
        filetime::set_file_mtime(&live, filetime::FileTime::from_unix_time(1_000, 0)).unwrap();

        let fresh = temp.path().join("fresh.obf");
        let bounds = QuadRect::from_degrees(48.0, 8.0, 47.0, 9.0);
        write_map_file(&fresh, &FileIndex::single("tile-v2", bounds), b"v2").unwrap();
        let archive = temp.path().join("tile.obf.gz");
        let mut encoder = GzEncoder::new(std::fs::File::create(&archive).unwrap(), Compression::fast());
        encoder.write_all(&std::fs::read(&fresh).unwrap()).unwrap();
        encoder.finish().unwrap();
        // Appear in the staging directory atomically.
        std::fs::rename(&archive, staging.join("tile.obf.gz")).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let current = || app.catalog().handle(&live).unwrap().file_index().routing_parts[0].name.clone();
        while current() != "tile-v2" && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(current(), "tile-v2");
        app.shutdown();
    }

    #[test]
    fn test_shutdown_releases_contexts_and_readers() {
        let temp = TempDir::new().unwrap();
        let mut config = config(temp.path());
        let tile = temp.path().join("maps").join("tile.obf");
        config.maps = config.maps.with_routing_file(tile.clone());

        let app = MapServeApp::build(config, collaborators()).unwrap();
        let outcome = app
            .orchestrator()
            .route(
                "car",
                LatLon::new(47.5, 8.2),
                LatLon::new(47.5, 8.8),
                &[],
                &[],
                &RouteProgress::new(),
            )
            .unwrap();
        assert_eq!(outcome.status, RouteStatus::Complete);

        let handle = app.catalog().handle(&tile).unwrap();
        drop(app.catalog().pool().acquire(&handle).unwrap());
        let cache = Arc::clone(app.context_cache());
        assert_eq!(cache.len(), 1);
        assert_eq!(handle.open_instances(), 1);

        app.shutdown();
        assert!(cache.is_empty());
        assert_eq!(handle.open_instances(), 0);
    }

    #[tokio::test]
    async fn test_async_start_and_shutdown() {
        let temp = TempDir::new().unwrap();
        let app = MapServeApp::start(config(temp.path()), collaborators()).await.unwrap();
        assert!(!app.shutdown_token().is_cancelled());
        let token = app.shutdown_token().clone();
        app.shutdown_async().await;
        assert!(token.is_cancelled());
    }
}
