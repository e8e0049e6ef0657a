//! Routing orchestration.
//!
//! Entry point for route, approximation and geocoding requests. Parameters
//! are parsed once; the orchestrator then picks where the routing graph comes
//! from and runs the resolved strategy on it.
//!
//! ```text
//! route(params, start, end, waypoints, avoid, progress)
//!   │
//!   ├── online profile ──► fetch provider path ──► approximation pipeline
//!   │
//!   ├── cache eligible ──► checkout context ──► unload request data,
//!   │                                           apply impassable ids, search
//!   │
//!   └── per request ─────► resolve files ──► lease every file (fail-closed)
//!                          ──► build graph ──► search
//! ```
//!
//! Reader leases and context leases are released by `Drop` on every path,
//! including errors and cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use super::cache::{CheckoutKind, RoutingContextCache};
use super::engine::{native_call_guard, EngineError, RouteRequest, RouterConfig, RoutingEngine, RoutingGraph};
use super::params::{
    ApproximationKind, ApproximationStrategy, CalculationMode, EngineKind, ParamError, RouteRequestParameters, RoutingStrategy,
};
use super::progress::RouteProgress;
use super::types::{Diagnostics, GeocodeOutcome, RouteOutcome, RouteResult, RouteStatus};
use crate::catalog::MapCatalog;
use crate::geo::{LatLon, QuadRect};
use crate::map_file::MapReader;
use crate::online::{OnlineRoutingAdapter, ProviderRegistry};
use crate::pool::{MapFileHandle, PoolError, ReaderLease};
use crate::telemetry::RoutingMetrics;

/// Margin added around request points when selecting files, in 31-bit tile
/// units (about 1 km at the equator).
pub const DEFAULT_BBOX_MARGIN: u32 = 1 << 14;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Margin around request points for file selection (default: [`DEFAULT_BBOX_MARGIN`]).
    pub bbox_margin: u32,
    /// Per-file lease timeout for request files (default: 1s).
    pub lease_timeout: Duration,
    /// Whether eligible requests may use cached contexts (default: true).
    pub use_context_cache: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bbox_margin: DEFAULT_BBOX_MARGIN,
            lease_timeout: Duration::from_secs(1),
            use_context_cache: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_bbox_margin(mut self, margin: u32) -> Self {
        self.bbox_margin = margin;
        self
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn with_context_cache(mut self, enabled: bool) -> Self {
        self.use_context_cache = enabled;
        self
    }
}

/// One parameter of a routing mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeParameter {
    pub key: String,
    /// Developer-only switch.
    pub dev: bool,
    pub default: String,
    pub values: Vec<String>,
}

impl ModeParameter {
    fn boolean(key: &str, default: bool, dev: bool) -> Self {
        Self {
            key: key.to_string(),
            dev,
            default: default.to_string(),
            values: vec!["true".to_string(), "false".to_string()],
        }
    }
}

/// A selectable routing mode: an engine profile or an online provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingMode {
    pub key: String,
    /// Router profile the mode runs on.
    pub profile: String,
    pub online: bool,
    pub params: Vec<ModeParameter>,
}

/// Why a request produced no engine result.
#[derive(Debug)]
enum Failure {
    /// Required map data could not be leased.
    Incomplete,
    /// The online provider returned nothing usable.
    Online,
    Engine(EngineError),
}

impl From<EngineError> for Failure {
    fn from(e: EngineError) -> Self {
        Failure::Engine(e)
    }
}

/// Routes, approximates and geocodes against the map catalog.
pub struct RoutingOrchestrator {
    config: OrchestratorConfig,
    catalog: Arc<MapCatalog>,
    cache: Arc<RoutingContextCache>,
    engine: Arc<dyn RoutingEngine>,
    online: Option<Arc<OnlineRoutingAdapter>>,
    providers: Arc<ProviderRegistry>,
    metrics: Arc<RoutingMetrics>,
}

impl RoutingOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        catalog: Arc<MapCatalog>,
        cache: Arc<RoutingContextCache>,
        engine: Arc<dyn RoutingEngine>,
        providers: Arc<ProviderRegistry>,
        metrics: Arc<RoutingMetrics>,
    ) -> Self {
        Self {
            config,
            catalog,
            cache,
            engine,
            online: None,
            providers,
            metrics,
        }
    }

    /// Enables online provider profiles.
    pub fn with_online_adapter(mut self, adapter: Arc<OnlineRoutingAdapter>) -> Self {
        self.online = Some(adapter);
        self
    }

    pub fn catalog(&self) -> &Arc<MapCatalog> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<RoutingContextCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<RoutingMetrics> {
        &self.metrics
    }

    /// Parses a `profile,key=val,...` string against the configured providers.
    pub fn parse_params(&self, params: &str) -> Result<RouteRequestParameters, ParamError> {
        RouteRequestParameters::parse(params, &self.providers)
    }

    /// Computes a route. Only parameter parsing fails; everything else is
    /// reported through the outcome status.
    pub fn route(
        &self,
        params: &str,
        start: LatLon,
        end: LatLon,
        waypoints: &[LatLon],
        avoid: &[u64],
        progress: &RouteProgress,
    ) -> Result<RouteOutcome, ParamError> {
        let params = self.parse_params(params)?;
        let request = RouteRequest {
            start,
            end,
            waypoints: waypoints.to_vec(),
        };
        Ok(self.route_with(&params, &request, avoid, progress))
    }

    /// Computes a route for already parsed parameters.
    pub fn route_with(
        &self,
        params: &RouteRequestParameters,
        request: &RouteRequest,
        avoid: &[u64],
        progress: &RouteProgress,
    ) -> RouteOutcome {
        let started = Instant::now();
        let mut diagnostics = Diagnostics::default();

        if let Some(provider) = &params.provider {
            diagnostics.online_provider = Some(provider.name.clone());
            let path = match &self.online {
                Some(adapter) => progress.timed("online", || {
                    adapter.fetch_route(provider, request.start, request.end, &request.waypoints, params.heading)
                }),
                None => {
                    warn!(provider = %provider.name, "Online provider configured but no adapter installed");
                    None
                }
            };
            return match path {
                Some(path) => self.approximate_points(params, &path, progress, started, diagnostics),
                None => self.outcome(Err(Failure::Online), diagnostics, progress, started),
            };
        }

        let strategy = self.routing_strategy(params.routing);
        diagnostics.native = strategy.engine == EngineKind::Native;
        diagnostics.strategy = strategy.to_string();

        let config = RouterConfig::from_request(params, avoid);
        let points = request.points();
        let result = self.with_graph(params, &config, &points, &mut diagnostics, progress, |graph| {
            run_native_aware(strategy.engine, "search", graph, progress, |g| {
                g.search_route(request, strategy, progress)
            })
        });
        self.outcome(result, diagnostics, progress, started)
    }

    /// Snaps a point sequence onto the road graph.
    pub fn approximate(
        &self,
        params: &str,
        points: &[LatLon],
        progress: &RouteProgress,
    ) -> Result<RouteOutcome, ParamError> {
        let params = self.parse_params(params)?;
        Ok(self.approximate_points(&params, points, progress, Instant::now(), Diagnostics::default()))
    }

    fn approximate_points(
        &self,
        params: &RouteRequestParameters,
        points: &[LatLon],
        progress: &RouteProgress,
        started: Instant,
        mut diagnostics: Diagnostics,
    ) -> RouteOutcome {
        let strategy = self.approximation_strategy(params.approximation);
        diagnostics.native = strategy.engine == EngineKind::Native;
        diagnostics.strategy = approximation_label(strategy).to_string();

        if points.len() < 2 {
            return self.outcome(Ok(RouteResult::default()), diagnostics, progress, started);
        }

        let config = RouterConfig::from_request(params, &[]);
        let result = self.with_graph(params, &config, points, &mut diagnostics, progress, |graph| {
            run_native_aware(strategy.engine, "approximate", graph, progress, |g| {
                g.approximate(points, strategy, progress)
            })
        });
        self.outcome(result, diagnostics, progress, started)
    }

    /// Roads near a point. Unavailable files are skipped and flagged.
    pub fn geocode(&self, lat: f64, lon: f64) -> GeocodeOutcome {
        let point = LatLon::new(lat, lon);
        let quad = QuadRect::from_point(point).inflated(self.config.bbox_margin);
        let pool = self.catalog.pool();

        let mut incomplete = false;
        let mut leases = Vec::new();
        for handle in self.catalog.resolve_files(&quad, None) {
            match pool.acquire_timeout(&handle, self.config.lease_timeout) {
                Ok(lease) => leases.push(lease),
                Err(e) => {
                    debug!(error = %e, "Skipping unavailable map file for geocoding");
                    incomplete = true;
                }
            }
        }
        let readers: Vec<Arc<dyn MapReader>> = leases.iter().map(|l| Arc::clone(l.reader())).collect();

        let mut results = match self.engine.geocode(point, &readers) {
            Ok(results) => results,
            Err(e) => {
                warn!(lat, lon, error = %e, "Geocoding failed");
                incomplete = true;
                Vec::new()
            }
        };
        results.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        GeocodeOutcome { results, incomplete }
    }

    /// Engine profiles followed by online providers, each with its parameters.
    pub fn routing_modes(&self) -> Vec<RoutingMode> {
        let dev_params = |profile: &str| {
            let mut params = vec![
                ModeParameter::boolean("hhoff", false, true),
                ModeParameter::boolean("nativerouting", false, true),
                ModeParameter::boolean("nativeapproximation", false, true),
                ModeParameter::boolean("noglobalfile", false, true),
            ];
            params.push(ModeParameter {
                key: "calcmode".to_string(),
                dev: true,
                default: calc_mode_name(CalculationMode::default_for(profile)).to_string(),
                values: ["COMPLEX", "BASE", "NORMAL"].iter().map(|v| v.to_string()).collect(),
            });
            params
        };

        let mut by_profile: BTreeMap<String, Vec<ModeParameter>> = BTreeMap::new();
        let mut modes: Vec<RoutingMode> = self
            .engine
            .profiles()
            .into_iter()
            .map(|profile| {
                let mut params: Vec<ModeParameter> = profile
                    .parameters
                    .iter()
                    .map(|(key, default)| ModeParameter::boolean(key, *default, false))
                    .collect();
                params.extend(dev_params(&profile.name));
                by_profile.insert(profile.name.clone(), params.clone());
                RoutingMode {
                    key: profile.name.clone(),
                    profile: profile.name,
                    online: false,
                    params,
                }
            })
            .collect();

        for provider in self.providers.iter() {
            let params = by_profile
                .get(&provider.profile)
                .cloned()
                .unwrap_or_else(|| dev_params(&provider.profile));
            modes.push(RoutingMode {
                key: provider.name.clone(),
                profile: provider.profile.clone(),
                online: true,
                params,
            });
        }
        modes
    }

    fn routing_strategy(&self, requested: RoutingStrategy) -> RoutingStrategy {
        if requested.engine == EngineKind::Native && !self.engine.supports_native() {
            warn!(strategy = %requested, "Native routing unavailable; using in-process engine");
            return RoutingStrategy {
                engine: EngineKind::InProcess,
                ..requested
            };
        }
        requested
    }

    fn approximation_strategy(&self, requested: ApproximationStrategy) -> ApproximationStrategy {
        if requested.engine == EngineKind::Native && !self.engine.supports_native() {
            warn!("Native approximation unavailable; using in-process engine");
            return ApproximationStrategy {
                engine: EngineKind::InProcess,
                ..requested
            };
        }
        requested
    }

    /// Runs `run` on a cached context or on a graph built from leased files.
    fn with_graph<F>(
        &self,
        params: &RouteRequestParameters,
        config: &RouterConfig,
        points: &[LatLon],
        diagnostics: &mut Diagnostics,
        progress: &RouteProgress,
        run: F,
    ) -> Result<RouteResult, Failure>
    where
        F: FnOnce(&mut dyn RoutingGraph) -> Result<RouteResult, EngineError>,
    {
        if self.config.use_context_cache && params.cache_eligible() && self.cache.is_enabled() {
            let lease = progress.timed("checkout", || self.cache.checkout(config));
            if let Some(lease) = lease {
                diagnostics.cache_hit = lease.kind() != CheckoutKind::Built;
                diagnostics.files = vec![lease.reader().path().to_path_buf()];
                let mut graph = lease.graph();
                graph.unload_request_data();
                graph.set_impassable(&config.impassable);
                return run(&mut **graph).map_err(Failure::from);
            }
            debug!(profile = %config.profile, "No cached routing context; loading request files");
        }

        let quad = QuadRect::from_points(points.iter())
            .ok_or(Failure::Incomplete)?
            .inflated(self.config.bbox_margin);
        let handles = self.catalog.resolve_files(&quad, Some(points));
        diagnostics.files = handles.iter().map(|h| h.path().to_path_buf()).collect();
        if handles.is_empty() {
            warn!(%quad, "No map files cover the request");
            return Err(Failure::Incomplete);
        }

        let leases = self.lease_files(&handles)?;
        let readers: Vec<Arc<dyn MapReader>> = leases.iter().map(|l| Arc::clone(l.reader())).collect();

        let mut graph = progress.timed("load", || self.engine.build_graph(config, &readers))?;
        let result = run(&mut *graph);
        if result.is_err() {
            graph.reset_search_state();
        }
        result.map_err(Failure::from)
    }

    /// Leases one reader per file. A file replaced since it was resolved is
    /// leased once more through its current handle.
    fn lease_files(&self, handles: &[Arc<MapFileHandle>]) -> Result<Vec<ReaderLease>, Failure> {
        let pool = self.catalog.pool();
        let mut leases = Vec::with_capacity(handles.len());
        for handle in handles {
            let leased = match pool.acquire_timeout(handle, self.config.lease_timeout) {
                Err(PoolError::Retired { path }) => match self.catalog.handle(&path) {
                    Some(current) => {
                        debug!(path = %path.display(), "Map file replaced during request; leasing current handle");
                        pool.acquire_timeout(&current, self.config.lease_timeout)
                    }
                    None => Err(PoolError::Retired { path }),
                },
                other => other,
            };
            match leased {
                Ok(lease) => leases.push(lease),
                Err(e) => {
                    warn!(error = %e, "Map file unavailable; route incomplete");
                    return Err(Failure::Incomplete);
                }
            }
        }
        Ok(leases)
    }

    fn outcome(
        &self,
        result: Result<RouteResult, Failure>,
        mut diagnostics: Diagnostics,
        progress: &RouteProgress,
        started: Instant,
    ) -> RouteOutcome {
        let phases = progress.phases();
        diagnostics.routing_time_s = ["search", "approximate"]
            .iter()
            .filter_map(|p| phases.get(*p))
            .map(Duration::as_secs_f64)
            .sum();
        diagnostics.phases = phases
            .into_iter()
            .map(|(name, d)| (name, d.as_secs_f64()))
            .collect();
        diagnostics.calc_time_s = started.elapsed().as_secs_f64();

        let outcome = match result {
            Ok(result) if result.segments.is_empty() => RouteOutcome::empty(RouteStatus::NoRoute, diagnostics),
            Ok(result) => {
                diagnostics.distance_m = result.distance_m();
                diagnostics.time_s = result.time_s();
                RouteOutcome {
                    status: RouteStatus::Complete,
                    segments: result.segments,
                    types: result.types,
                    diagnostics,
                }
            }
            Err(Failure::Incomplete) => RouteOutcome::empty(RouteStatus::Incomplete, diagnostics),
            Err(Failure::Online) => RouteOutcome::empty(RouteStatus::Failed, diagnostics),
            Err(Failure::Engine(EngineError::Cancelled)) => {
                debug!("Route calculation cancelled");
                RouteOutcome::empty(RouteStatus::Cancelled, diagnostics)
            }
            Err(Failure::Engine(e)) => {
                warn!(error = %e, "Route calculation failed");
                RouteOutcome::empty(RouteStatus::Failed, diagnostics)
            }
        };

        self.metrics.route_finished(outcome.is_complete());
        debug!(
            status = ?outcome.status,
            strategy = %outcome.diagnostics.strategy,
            files = outcome.diagnostics.files.len(),
            cache_hit = outcome.diagnostics.cache_hit,
            calc_ms = (outcome.diagnostics.calc_time_s * 1000.0) as u64,
            "Route request finished"
        );
        outcome
    }
}

/// Runs `f` on the graph under the native-call lock when `engine` is native.
fn run_native_aware<F>(
    engine: EngineKind,
    phase: &str,
    graph: &mut dyn RoutingGraph,
    progress: &RouteProgress,
    f: F,
) -> Result<RouteResult, EngineError>
where
    F: FnOnce(&mut dyn RoutingGraph) -> Result<RouteResult, EngineError>,
{
    if progress.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    let _native = (engine == EngineKind::Native).then(native_call_guard);
    progress.timed(phase, || f(graph))
}

fn approximation_label(strategy: ApproximationStrategy) -> &'static str {
    match (strategy.engine, strategy.kind) {
        (EngineKind::InProcess, ApproximationKind::Geometry) => "approximation-geometry",
        (EngineKind::InProcess, ApproximationKind::Routing) => "approximation-routing",
        (EngineKind::Native, ApproximationKind::Geometry) => "native-approximation-geometry",
        (EngineKind::Native, ApproximationKind::Routing) => "native-approximation-routing",
    }
}

fn calc_mode_name(mode: CalculationMode) -> &'static str {
    match mode {
        CalculationMode::Complex => "COMPLEX",
        CalculationMode::Normal => "NORMAL",
        CalculationMode::Base => "BASE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_file::{write_map_file, FileIndex, MmapOpener};
    use crate::online::{MockHttpClient, OnlineProvider};
    use crate::pool::{PoolConfig, ReaderPool};
    use crate::routing::cache::ContextCacheConfig;
    use crate::routing::straight_line::StraightLineEngine;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        orchestrator: RoutingOrchestrator,
        metrics: Arc<RoutingMetrics>,
        http: Arc<MockHttpClient>,
    }

    fn tile(north: f64, west: f64) -> QuadRect {
        QuadRect::from_degrees(north, west, north - 1.0, west + 1.0)
    }

    fn fixture(routing_file: bool, http: MockHttpClient) -> Fixture {
        let dir = TempDir::new().unwrap();
        let maps = dir.path().join("maps");
        std::fs::create_dir(&maps).unwrap();
        write_map_file(&maps.join("west.obf"), &FileIndex::single("west", tile(48.0, 8.0)), b"").unwrap();
        write_map_file(&maps.join("east.obf"), &FileIndex::single("east", tile(48.0, 9.0)), b"").unwrap();

        let world: Option<PathBuf> = routing_file.then(|| {
            let path = dir.path().join("world.obf");
            let bounds = QuadRect::from_degrees(50.0, 7.0, 46.0, 11.0);
            write_map_file(&path, &FileIndex::single("world", bounds), b"").unwrap();
            path
        });

        let metrics = Arc::new(RoutingMetrics::new());
        let pool = Arc::new(ReaderPool::new(
            PoolConfig::default().with_max_readers_per_file(1),
            Arc::new(MmapOpener),
            Arc::clone(&metrics),
        ));
        let catalog = Arc::new(MapCatalog::new(pool));
        catalog.load_directory(&maps).unwrap();

        let engine: Arc<dyn RoutingEngine> = Arc::new(StraightLineEngine::new());
        let cache = Arc::new(RoutingContextCache::new(
            ContextCacheConfig::default().with_checkout_timeout(Duration::from_millis(100)),
            Arc::clone(&engine),
            Arc::clone(&catalog),
            world,
            Arc::clone(&metrics),
        ));

        let mut providers = ProviderRegistry::default();
        providers.insert(OnlineProvider::parse("osrm", "type=geometry,url=http://router.test/route/v1/driving").unwrap());

        let http = Arc::new(http);
        let adapter = Arc::new(OnlineRoutingAdapter::new(http.clone(), Arc::clone(&metrics)));
        let orchestrator = RoutingOrchestrator::new(
            OrchestratorConfig::default().with_lease_timeout(Duration::from_millis(50)),
            catalog,
            cache,
            engine,
            Arc::new(providers),
            Arc::clone(&metrics),
        )
        .with_online_adapter(adapter);

        Fixture {
            dir,
            orchestrator,
            metrics,
            http,
        }
    }

    fn no_http() -> MockHttpClient {
        MockHttpClient::ok("")
    }

    #[test]
    fn test_route_across_disjoint_tiles() {
        let f = fixture(false, no_http());
        let outcome = f
            .orchestrator
            .route(
                "car",
                LatLon::new(47.5, 8.5),
                LatLon::new(47.5, 9.5),
                &[],
                &[],
                &RouteProgress::new(),
            )
            .unwrap();

        assert_eq!(outcome.status, RouteStatus::Complete);
        assert_eq!(outcome.diagnostics.files.len(), 2);
        assert!(!outcome.diagnostics.cache_hit);
        assert!(outcome.diagnostics.distance_m > 70_000.0);
        assert_eq!(outcome.diagnostics.strategy, "inprocess-hh");
        assert!(f.http.requests.lock().is_empty());
    }

    #[test]
    fn test_route_without_coverage_is_incomplete() {
        let f = fixture(false, no_http());
        let outcome = f
            .orchestrator
            .route(
                "car",
                LatLon::new(10.0, 100.0),
                LatLon::new(10.1, 100.1),
                &[],
                &[],
                &RouteProgress::new(),
            )
            .unwrap();
        assert_eq!(outcome.status, RouteStatus::Incomplete);
        assert!(outcome.segments.is_empty());
    }

    #[test]
    fn test_route_fails_closed_when_file_busy() {
        let f = fixture(false, no_http());
        let catalog = f.orchestrator.catalog();
        let west = catalog.handle(&f.dir.path().join("maps/west.obf")).unwrap();
        let _held = catalog.pool().acquire(&west).unwrap();

        let outcome = f
            .orchestrator
            .route(
                "car",
                LatLon::new(47.5, 8.5),
                LatLon::new(47.5, 9.5),
                &[],
                &[],
                &RouteProgress::new(),
            )
            .unwrap();
        assert_eq!(outcome.status, RouteStatus::Incomplete);
        assert_eq!(f.metrics.snapshot().routes_incomplete, 1);
        // The east lease taken before the failure was released.
        let east = catalog.handle(&f.dir.path().join("maps/east.obf")).unwrap();
        assert_eq!(east.busy_instances(), 0);
    }

    #[test]
    fn test_file_replaced_after_resolution_is_leased_again() {
        let f = fixture(false, no_http());
        let catalog = f.orchestrator.catalog();
        let west_path = f.dir.path().join("maps/west.obf");
        let stale = catalog.handle(&west_path).unwrap();

        let update = f.dir.path().join("west.obf.new");
        write_map_file(&update, &FileIndex::single("west", tile(48.0, 8.0)), b"v2").unwrap();
        catalog.replace_file(&west_path, &update).unwrap();
        assert!(stale.is_retired());

        let leases = f.orchestrator.lease_files(&[stale]).unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].payload(), b"v2");
        assert!(!leases[0].handle().is_retired());
    }

    #[test]
    fn test_removed_file_after_resolution_is_incomplete() {
        let f = fixture(false, no_http());
        let catalog = f.orchestrator.catalog();
        let west_path = f.dir.path().join("maps/west.obf");
        let stale = catalog.handle(&west_path).unwrap();

        // A replacement that fails to parse drops the file from the catalog.
        let broken = f.dir.path().join("west.obf.new");
        std::fs::write(&broken, b"not a map file").unwrap();
        assert!(catalog.replace_file(&west_path, &broken).is_err());

        assert!(matches!(f.orchestrator.lease_files(&[stale]), Err(Failure::Incomplete)));
    }

    #[test]
    fn test_cached_context_reused_between_requests() {
        let f = fixture(true, no_http());
        let route = || {
            f.orchestrator
                .route(
                    "car",
                    LatLon::new(47.5, 8.5),
                    LatLon::new(47.5, 9.5),
                    &[],
                    &[],
                    &RouteProgress::new(),
                )
                .unwrap()
        };

        let first = route();
        assert_eq!(first.status, RouteStatus::Complete);
        assert!(!first.diagnostics.cache_hit);
        assert!(first.diagnostics.files[0].ends_with("world.obf"));

        let second = route();
        assert!(second.diagnostics.cache_hit);
        assert_eq!(f.orchestrator.cache().len(), 1);
        assert_eq!(f.metrics.snapshot().contexts_built, 1);
    }

    #[test]
    fn test_noglobalfile_bypasses_cache() {
        let f = fixture(true, no_http());
        let outcome = f
            .orchestrator
            .route(
                "car,noglobalfile",
                LatLon::new(47.5, 8.5),
                LatLon::new(47.5, 8.6),
                &[],
                &[],
                &RouteProgress::new(),
            )
            .unwrap();
        assert_eq!(outcome.status, RouteStatus::Complete);
        assert!(f.orchestrator.cache().is_empty());
        assert!(outcome.diagnostics.files[0].ends_with("west.obf"));
    }

    #[test]
    fn test_native_request_falls_back_in_process() {
        let f = fixture(false, no_http());
        let outcome = f
            .orchestrator
            .route(
                "car,nativerouting",
                LatLon::new(47.5, 8.5),
                LatLon::new(47.5, 8.6),
                &[],
                &[],
                &RouteProgress::new(),
            )
            .unwrap();
        assert_eq!(outcome.status, RouteStatus::Complete);
        assert!(!outcome.diagnostics.native);
        assert_eq!(outcome.diagnostics.strategy, "inprocess-hh");
    }

    #[test]
    fn test_cancelled_route() {
        let f = fixture(false, no_http());
        let progress = RouteProgress::new();
        progress.cancel();
        let outcome = f
            .orchestrator
            .route("car", LatLon::new(47.5, 8.5), LatLon::new(47.5, 8.6), &[], &[], &progress)
            .unwrap();
        assert_eq!(outcome.status, RouteStatus::Cancelled);
    }

    #[test]
    fn test_avoided_segment_finds_no_route() {
        let f = fixture(false, no_http());
        let outcome = f
            .orchestrator
            .route(
                "car",
                LatLon::new(47.5, 8.5),
                LatLon::new(47.5, 8.6),
                &[],
                &[1],
                &RouteProgress::new(),
            )
            .unwrap();
        assert_eq!(outcome.status, RouteStatus::NoRoute);
    }

    #[test]
    fn test_online_profile_approximates_provider_path() {
        let body = r#"{"routes":[{"geometry":{"coordinates":[[8.5,47.5],[8.55,47.52],[8.6,47.5]]}}]}"#;
        let f = fixture(false, MockHttpClient::ok(body));
        let outcome = f
            .orchestrator
            .route(
                "osrm",
                LatLon::new(47.5, 8.5),
                LatLon::new(47.5, 8.6),
                &[],
                &[],
                &RouteProgress::new(),
            )
            .unwrap();

        assert_eq!(outcome.status, RouteStatus::Complete);
        assert_eq!(outcome.segments.len(), 2);
        assert_eq!(outcome.diagnostics.online_provider.as_deref(), Some("osrm"));
        assert_eq!(f.http.requests.lock().len(), 1);
    }

    #[test]
    fn test_online_failure_is_failed_outcome() {
        let f = fixture(false, MockHttpClient::ok(r#"{"routes":[]}"#));
        let outcome = f
            .orchestrator
            .route(
                "osrm",
                LatLon::new(47.5, 8.5),
                LatLon::new(47.5, 8.6),
                &[],
                &[],
                &RouteProgress::new(),
            )
            .unwrap();
        assert_eq!(outcome.status, RouteStatus::Failed);
    }

    #[test]
    fn test_invalid_params_are_rejected() {
        let f = fixture(false, no_http());
        let err = f
            .orchestrator
            .route(
                "car,calcmode=fast",
                LatLon::new(47.5, 8.5),
                LatLon::new(47.5, 8.6),
                &[],
                &[],
                &RouteProgress::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ParamError::InvalidValue { .. }));
    }

    #[test]
    fn test_approximate_points() {
        let f = fixture(false, no_http());
        let points = [LatLon::new(47.5, 8.5), LatLon::new(47.6, 8.6), LatLon::new(47.5, 9.5)];
        let outcome = f
            .orchestrator
            .approximate("bicycle", &points, &RouteProgress::new())
            .unwrap();
        assert_eq!(outcome.status, RouteStatus::Complete);
        assert_eq!(outcome.polyline().len(), 3);
        assert_eq!(outcome.diagnostics.strategy, "approximation-geometry");
    }

    #[test]
    fn test_geocode_skips_busy_file() {
        let f = fixture(false, no_http());
        let catalog = f.orchestrator.catalog();
        let west = catalog.handle(&f.dir.path().join("maps/west.obf")).unwrap();

        let found = f.orchestrator.geocode(47.5, 8.5);
        assert!(!found.incomplete);
        assert_eq!(found.results[0].name, "west");

        let _held = catalog.pool().acquire(&west).unwrap();
        let found = f.orchestrator.geocode(47.5, 8.5);
        assert!(found.incomplete);
        assert!(found.results.is_empty());
    }

    #[test]
    fn test_routing_modes_list_providers_with_profile_params() {
        let f = fixture(false, no_http());
        let modes = f.orchestrator.routing_modes();
        let car = modes.iter().find(|m| m.key == "car").unwrap();
        let osrm = modes.iter().find(|m| m.key == "osrm").unwrap();

        assert!(osrm.online);
        assert_eq!(osrm.params, car.params);
        let calcmode = car.params.iter().find(|p| p.key == "calcmode").unwrap();
        assert_eq!(calcmode.default, "COMPLEX");
        assert!(calcmode.dev);
    }
}
