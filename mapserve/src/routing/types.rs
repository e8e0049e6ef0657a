//! Route results and diagnostics.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{json, Value};

use crate::geo::LatLon;

/// Tag/value pair referenced by segments through their index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TypeRule {
    pub tag: String,
    pub value: String,
}

impl TypeRule {
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
        }
    }
}

/// One piece of a route along a single road.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSegment {
    pub road_id: u64,
    pub geometry: Vec<LatLon>,
    pub distance_m: f64,
    pub time_s: f64,
    /// Indices into the route's type dictionary.
    pub type_rules: Vec<u32>,
}

/// Raw engine output for one search or approximation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteResult {
    pub segments: Vec<RouteSegment>,
    pub types: Vec<TypeRule>,
}

impl RouteResult {
    pub fn distance_m(&self) -> f64 {
        self.segments.iter().map(|s| s.distance_m).sum()
    }

    pub fn time_s(&self) -> f64 {
        self.segments.iter().map(|s| s.time_s).sum()
    }
}

/// Final state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
    Complete,
    /// Required map data could not be leased.
    Incomplete,
    Cancelled,
    Failed,
    /// The search finished without finding a path.
    NoRoute,
}

/// Side-channel timing and engine information for a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub distance_m: f64,
    pub time_s: f64,
    /// Wall-clock time spent inside the engine, in seconds.
    pub routing_time_s: f64,
    /// Wall-clock time of the whole request, in seconds.
    pub calc_time_s: f64,
    pub native: bool,
    pub strategy: String,
    pub files: Vec<PathBuf>,
    pub cache_hit: bool,
    pub online_provider: Option<String>,
    /// Seconds per named phase.
    pub phases: BTreeMap<String, f64>,
}

impl Diagnostics {
    /// Nested map with `overall` and `dev` sections.
    pub fn to_json(&self) -> Value {
        json!({
            "overall": {
                "distance": self.distance_m,
                "time": self.time_s,
                "routingTime": self.routing_time_s,
                "calcTime": self.calc_time_s,
            },
            "dev": {
                "nativeLib": self.native,
                "strategy": self.strategy,
                "files": self.files,
                "cacheHit": self.cache_hit,
                "onlineProvider": self.online_provider,
                "phases": self.phases,
            },
        })
    }
}

/// Result of `route` or `approximate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteOutcome {
    pub status: RouteStatus,
    pub segments: Vec<RouteSegment>,
    pub types: Vec<TypeRule>,
    pub diagnostics: Diagnostics,
}

impl RouteOutcome {
    /// Outcome without segments.
    pub fn empty(status: RouteStatus, diagnostics: Diagnostics) -> Self {
        Self {
            status,
            segments: Vec::new(),
            types: Vec::new(),
            diagnostics,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == RouteStatus::Complete
    }

    /// Route polyline with consecutive duplicate points removed.
    pub fn polyline(&self) -> Vec<LatLon> {
        let mut line: Vec<LatLon> = Vec::new();
        for point in self.segments.iter().flat_map(|s| s.geometry.iter()) {
            if line.last() != Some(point) {
                line.push(*point);
            }
        }
        line
    }
}

/// A road or address near a queried point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodingResult {
    pub point: LatLon,
    pub road_id: u64,
    pub name: String,
    pub distance_m: f64,
}

/// Result of `geocode`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeOutcome {
    pub results: Vec<GeocodingResult>,
    /// Some candidate files were unavailable and were skipped.
    pub incomplete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(points: &[(f64, f64)], distance_m: f64, time_s: f64) -> RouteSegment {
        RouteSegment {
            road_id: 1,
            geometry: points.iter().map(|(lat, lon)| LatLon::new(*lat, *lon)).collect(),
            distance_m,
            time_s,
            type_rules: vec![0],
        }
    }

    #[test]
    fn test_result_totals() {
        let result = RouteResult {
            segments: vec![segment(&[(0.0, 0.0)], 100.0, 10.0), segment(&[(0.0, 1.0)], 50.5, 4.5)],
            types: vec![TypeRule::new("highway", "primary")],
        };
        assert_eq!(result.distance_m(), 150.5);
        assert_eq!(result.time_s(), 14.5);
    }

    #[test]
    fn test_polyline_dedups_joints() {
        let outcome = RouteOutcome {
            status: RouteStatus::Complete,
            segments: vec![
                segment(&[(0.0, 0.0), (0.0, 1.0)], 1.0, 1.0),
                segment(&[(0.0, 1.0), (0.0, 2.0)], 1.0, 1.0),
            ],
            types: Vec::new(),
            diagnostics: Diagnostics::default(),
        };
        assert_eq!(outcome.polyline().len(), 3);
    }

    #[test]
    fn test_diagnostics_json_shape() {
        let mut diagnostics = Diagnostics {
            distance_m: 1200.0,
            native: true,
            strategy: "native-hh".to_string(),
            ..Default::default()
        };
        diagnostics.phases.insert("search".to_string(), 0.25);

        let value = diagnostics.to_json();
        assert_eq!(value["overall"]["distance"], json!(1200.0));
        assert_eq!(value["dev"]["nativeLib"], json!(true));
        assert_eq!(value["dev"]["phases"]["search"], json!(0.25));
    }
}
