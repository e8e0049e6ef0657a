//! Routing engine seams.
//!
//! The route search itself lives behind [`RoutingEngine`] (builds graphs) and
//! [`RoutingGraph`] (one prepared router). A [`NativeLibrary`] is the optional
//! foreign engine that keeps its own handles to map files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use super::params::{ApproximationStrategy, RouteRequestParameters, RoutingStrategy};
use super::progress::RouteProgress;
use super::types::{GeocodingResult, RouteResult};
use crate::geo::LatLon;
use crate::map_file::MapReader;

/// Process-wide critical section for native engine calls.
static NATIVE_CALL_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Serializes native calls; the native engine is not reentrant.
pub fn native_call_guard() -> MutexGuard<'static, ()> {
    NATIVE_CALL_LOCK.lock()
}

/// Engine failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// The progress token was cancelled.
    #[error("calculation cancelled")]
    Cancelled,

    #[error("routing failed: {0}")]
    Failed(String),

    #[error("native engine failed: {0}")]
    Native(String),
}

/// Router configuration for one (profile, parameter set).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouterConfig {
    pub profile: String,
    pub params: BTreeMap<String, String>,
    pub impassable: BTreeSet<u64>,
    pub time_conditional: bool,
    pub calc_time: Option<DateTime<Utc>>,
    pub heading: Option<f64>,
    pub min_point_approximation_m: Option<f64>,
}

impl RouterConfig {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Configuration for a parsed request; `avoid` ids are merged in.
    pub fn from_request(params: &RouteRequestParameters, avoid: &[u64]) -> Self {
        let mut impassable = params.impassable.clone();
        impassable.extend(avoid.iter().copied());
        Self {
            profile: params.router_profile.clone(),
            params: params.router_params.clone(),
            impassable,
            time_conditional: params.time_conditional,
            calc_time: params.calc_time,
            heading: params.heading,
            min_point_approximation_m: params.min_point_approximation_m,
        }
    }

    /// Router parameters as sorted `k=v` pairs.
    pub fn canonical_params(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Everything a built graph is configured with, as one comparable string.
    ///
    /// Cached contexts match on this. Impassable ids are excluded: they are
    /// applied to the graph on every request.
    pub fn context_key(&self) -> String {
        let mut key = self.canonical_params();
        if self.time_conditional {
            key.push_str(";time_conditional");
        }
        if let Some(t) = self.calc_time {
            key.push_str(";calc_time=");
            key.push_str(&t.to_rfc3339());
        }
        if let Some(heading) = self.heading {
            key.push_str(&format!(";heading={}", heading));
        }
        if let Some(min) = self.min_point_approximation_m {
            key.push_str(&format!(";min_point_approximation={}", min));
        }
        key
    }
}

/// Start, end and intermediate points of a route request.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub start: LatLon,
    pub end: LatLon,
    pub waypoints: Vec<LatLon>,
}

impl RouteRequest {
    /// All points in travel order.
    pub fn points(&self) -> Vec<LatLon> {
        let mut points = Vec::with_capacity(self.waypoints.len() + 2);
        points.push(self.start);
        points.extend_from_slice(&self.waypoints);
        points.push(self.end);
        points
    }
}

/// Description of a profile exposed by an engine.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ProfileInfo {
    pub name: String,
    /// Boolean router parameters the profile understands, with defaults.
    pub parameters: Vec<(String, bool)>,
}

/// Builds routing graphs and answers geocoding queries.
pub trait RoutingEngine: Send + Sync {
    /// Loads and indexes the routing graph of `readers` for `config`.
    fn build_graph(
        &self,
        config: &RouterConfig,
        readers: &[Arc<dyn MapReader>],
    ) -> Result<Box<dyn RoutingGraph>, EngineError>;

    /// Roads near `point` from the given files.
    fn geocode(
        &self,
        point: LatLon,
        readers: &[Arc<dyn MapReader>],
    ) -> Result<Vec<GeocodingResult>, EngineError>;

    /// Whether native strategies can run.
    fn supports_native(&self) -> bool {
        false
    }

    /// Built-in profiles.
    fn profiles(&self) -> Vec<ProfileInfo> {
        Vec::new()
    }
}

/// One prepared router with its hierarchical sub-context and cached segments.
///
/// A graph is used by at most one thread at a time.
pub trait RoutingGraph: Send {
    /// Rebuilds the router for new parameters without reloading the graph.
    fn reconfigure(&mut self, config: &RouterConfig) -> Result<(), EngineError>;

    /// Drops cached graph segments computed under the previous router.
    fn invalidate_segments(&mut self);

    /// Drops data attached by the previous request (e.g. direction points).
    fn unload_request_data(&mut self);

    /// Releases cached graph segments to free memory.
    fn release_segments(&mut self);

    /// Resets partial search state after a finished, failed or cancelled search.
    fn reset_search_state(&mut self);

    fn set_impassable(&mut self, ids: &BTreeSet<u64>);

    fn search_route(
        &mut self,
        request: &RouteRequest,
        strategy: RoutingStrategy,
        progress: &RouteProgress,
    ) -> Result<RouteResult, EngineError>;

    fn approximate(
        &mut self,
        points: &[LatLon],
        strategy: ApproximationStrategy,
        progress: &RouteProgress,
    ) -> Result<RouteResult, EngineError>;
}

/// Optional native engine keeping its own file handles.
pub trait NativeLibrary: Send + Sync {
    /// Makes a map file known to the native engine.
    fn init_file(&self, path: &Path) -> Result<(), EngineError>;

    /// Releases the native engine's handles on a map file.
    fn close_file(&self, path: &Path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::online::ProviderRegistry;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_router_config_merges_avoid_ids() {
        let params =
            RouteRequestParameters::parse("bicycle,avoid=5,short_way", &ProviderRegistry::default()).unwrap();
        let config = RouterConfig::from_request(&params, &[7, 5]);
        assert_eq!(config.profile, "bicycle");
        assert_eq!(config.impassable.iter().copied().collect::<Vec<_>>(), vec![5, 7]);
        assert_eq!(config.canonical_params(), "short_way=true");
        assert_eq!(config.canonical_params(), params.canonical_params());
    }

    #[test]
    fn test_context_key_covers_graph_settings() {
        let base = RouterConfig::new("car").with_param("short_way", "true");
        assert_eq!(base.context_key(), "short_way=true");

        let timed = RouterConfig {
            time_conditional: true,
            ..base.clone()
        };
        let at = RouterConfig {
            calc_time: Some(Utc::now()),
            ..base.clone()
        };
        let heading = RouterConfig {
            heading: Some(90.0),
            ..base.clone()
        };
        let approx = RouterConfig {
            min_point_approximation_m: Some(50.0),
            ..base.clone()
        };
        let avoiding = RouterConfig {
            impassable: [42].into_iter().collect(),
            ..base.clone()
        };

        for other in [&timed, &at, &heading, &approx] {
            assert_ne!(other.context_key(), base.context_key());
            assert_eq!(other.canonical_params(), base.canonical_params());
        }
        assert_eq!(avoiding.context_key(), base.context_key());
    }

    #[test]
    fn test_route_request_points_order() {
        let request = RouteRequest {
            start: LatLon::new(0.0, 0.0),
            end: LatLon::new(2.0, 2.0),
            waypoints: vec![LatLon::new(1.0, 1.0)],
        };
        let points = request.points();
        assert_eq!(points.len(), 3);
        assert_eq!(points[1], LatLon::new(1.0, 1.0));
    }

    #[test]
    fn test_native_guard_serializes() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let inside = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..5 {
                        let _guard = native_call_guard();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::sleep(Duration::from_millis(1));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
    }
}
