//! Point-to-point routing engine.
//!
//! Connects consecutive request points with straight legs, as long as every
//! point is covered by one of the loaded map files. Used by the CLI and by
//! tests that need a real engine without a road graph.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use super::engine::{EngineError, ProfileInfo, RouteRequest, RouterConfig, RoutingEngine, RoutingGraph};
use super::params::{ApproximationStrategy, RoutingStrategy};
use super::progress::RouteProgress;
use super::types::{GeocodingResult, RouteResult, RouteSegment, TypeRule};
use crate::geo::{distance_m, LatLon, QuadRect};
use crate::map_file::MapReader;

/// Travel speed in m/s for a profile.
fn speed_for(profile: &str) -> f64 {
    match profile {
        "car" => 13.9,
        "bicycle" => 4.2,
        "pedestrian" => 1.4,
        _ => 10.0,
    }
}

/// Engine producing straight legs between request points.
#[derive(Debug, Default, Clone, Copy)]
pub struct StraightLineEngine;

impl StraightLineEngine {
    pub fn new() -> Self {
        Self
    }
}

impl RoutingEngine for StraightLineEngine {
    fn build_graph(
        &self,
        config: &RouterConfig,
        readers: &[Arc<dyn MapReader>],
    ) -> Result<Box<dyn RoutingGraph>, EngineError> {
        let coverage: Vec<QuadRect> = readers
            .iter()
            .flat_map(|r| r.file_index().routing_parts.iter())
            .flat_map(|p| p.subregions.iter().map(|s| s.bounds()))
            .collect();
        if coverage.is_empty() {
            return Err(EngineError::Failed("no routing data in loaded files".to_string()));
        }
        Ok(Box::new(StraightLineGraph {
            profile: config.profile.clone(),
            short_way: config.params.get("short_way").is_some_and(|v| v == "true"),
            coverage,
            impassable: config.impassable.clone(),
            request_points: 0,
        }))
    }

    fn geocode(
        &self,
        point: LatLon,
        readers: &[Arc<dyn MapReader>],
    ) -> Result<Vec<GeocodingResult>, EngineError> {
        let results = readers
            .iter()
            .enumerate()
            .filter_map(|(i, reader)| {
                let bounds = reader.file_index().bounds()?;
                if !bounds.contains_point(point) {
                    return None;
                }
                let name = reader
                    .path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Some(GeocodingResult {
                    point,
                    road_id: i as u64 + 1,
                    name,
                    distance_m: 0.0,
                })
            })
            .collect();
        Ok(results)
    }

    fn profiles(&self) -> Vec<ProfileInfo> {
        let params = |extra: &[&str]| {
            std::iter::once("short_way")
                .chain(extra.iter().copied())
                .map(|k| (k.to_string(), false))
                .collect()
        };
        vec![
            ProfileInfo {
                name: "car".to_string(),
                parameters: params(&["avoid_motorway", "avoid_toll"]),
            },
            ProfileInfo {
                name: "bicycle".to_string(),
                parameters: params(&["height_obstacles"]),
            },
            ProfileInfo {
                name: "pedestrian".to_string(),
                parameters: params(&[]),
            },
        ]
    }
}

struct StraightLineGraph {
    profile: String,
    short_way: bool,
    coverage: Vec<QuadRect>,
    impassable: BTreeSet<u64>,
    request_points: usize,
}

impl StraightLineGraph {
    fn covers(&self, point: LatLon) -> bool {
        self.coverage.iter().any(|q| q.contains_point(point))
    }

    /// Road id of the leg starting at `index`.
    fn leg_id(index: usize) -> u64 {
        index as u64 + 1
    }

    fn connect(&mut self, points: &[LatLon], progress: &RouteProgress) -> Result<RouteResult, EngineError> {
        let started = Instant::now();
        self.request_points = points.len();
        if points.len() < 2 || !points.iter().all(|p| self.covers(*p)) {
            return Ok(RouteResult::default());
        }

        let speed = if self.short_way {
            speed_for(&self.profile) * 0.8
        } else {
            speed_for(&self.profile)
        };
        let mut segments = Vec::with_capacity(points.len() - 1);
        for (index, leg) in points.windows(2).enumerate() {
            if progress.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let road_id = Self::leg_id(index);
            if self.impassable.contains(&road_id) {
                return Ok(RouteResult::default());
            }
            let distance = distance_m(leg[0], leg[1]);
            segments.push(RouteSegment {
                road_id,
                geometry: vec![leg[0], leg[1]],
                distance_m: distance,
                time_s: distance / speed,
                type_rules: vec![0],
            });
        }
        progress.add_visited(segments.len() as u64);
        progress.record_phase("connect", started.elapsed());

        Ok(RouteResult {
            segments,
            types: vec![TypeRule::new("highway", "straight")],
        })
    }
}

impl RoutingGraph for StraightLineGraph {
    fn reconfigure(&mut self, config: &RouterConfig) -> Result<(), EngineError> {
        self.profile = config.profile.clone();
        self.short_way = config.params.get("short_way").is_some_and(|v| v == "true");
        self.impassable = config.impassable.clone();
        Ok(())
    }

    fn invalidate_segments(&mut self) {}

    fn unload_request_data(&mut self) {
        self.request_points = 0;
    }

    fn release_segments(&mut self) {}

    fn reset_search_state(&mut self) {
        self.request_points = 0;
    }

    fn set_impassable(&mut self, ids: &BTreeSet<u64>) {
        self.impassable = ids.clone();
    }

    fn search_route(
        &mut self,
        request: &RouteRequest,
        _strategy: RoutingStrategy,
        progress: &RouteProgress,
    ) -> Result<RouteResult, EngineError> {
        self.connect(&request.points(), progress)
    }

    fn approximate(
        &mut self,
        points: &[LatLon],
        _strategy: ApproximationStrategy,
        progress: &RouteProgress,
    ) -> Result<RouteResult, EngineError> {
        self.connect(points, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_file::{FileIndex, MapReader};
    use crate::routing::params::{EngineKind, SearchMethod};
    use std::path::{Path, PathBuf};

    struct StubReader {
        path: PathBuf,
        index: FileIndex,
    }

    impl MapReader for StubReader {
        fn path(&self) -> &Path {
            &self.path
        }

        fn file_index(&self) -> &FileIndex {
            &self.index
        }

        fn payload(&self) -> &[u8] {
            &[]
        }
    }

    fn tile_reader(name: &str, north: f64, west: f64) -> Arc<dyn MapReader> {
        Arc::new(StubReader {
            path: PathBuf::from(format!("/maps/{}.obf", name)),
            index: FileIndex::single(name, QuadRect::from_degrees(north, west, north - 1.0, west + 1.0)),
        })
    }

    const STRATEGY: RoutingStrategy = RoutingStrategy {
        engine: EngineKind::InProcess,
        method: SearchMethod::Hierarchical,
    };

    fn request(points: &[(f64, f64)]) -> RouteRequest {
        let mut points: Vec<LatLon> = points.iter().map(|(lat, lon)| LatLon::new(*lat, *lon)).collect();
        let end = points.pop().unwrap();
        let start = points.remove(0);
        RouteRequest {
            start,
            end,
            waypoints: points,
        }
    }

    #[test]
    fn test_route_within_coverage() {
        let engine = StraightLineEngine::new();
        let mut graph = engine
            .build_graph(&RouterConfig::new("car"), &[tile_reader("a", 48.0, 8.0)])
            .unwrap();
        let result = graph
            .search_route(&request(&[(47.5, 8.2), (47.6, 8.4), (47.7, 8.6)]), STRATEGY, &RouteProgress::new())
            .unwrap();
        assert_eq!(result.segments.len(), 2);
        assert!(result.distance_m() > 0.0);
        assert!((result.time_s() - result.distance_m() / 13.9).abs() < 1e-6);
    }

    #[test]
    fn test_uncovered_point_finds_no_route() {
        let engine = StraightLineEngine::new();
        let mut graph = engine
            .build_graph(&RouterConfig::new("car"), &[tile_reader("a", 48.0, 8.0)])
            .unwrap();
        let result = graph
            .search_route(&request(&[(47.5, 8.2), (47.5, 9.5)]), STRATEGY, &RouteProgress::new())
            .unwrap();
        assert!(result.segments.is_empty());
    }

    #[test]
    fn test_impassable_leg_blocks_route() {
        let engine = StraightLineEngine::new();
        let mut graph = engine
            .build_graph(&RouterConfig::new("car"), &[tile_reader("a", 48.0, 8.0)])
            .unwrap();
        graph.set_impassable(&BTreeSet::from([1]));
        let result = graph
            .search_route(&request(&[(47.5, 8.2), (47.6, 8.4)]), STRATEGY, &RouteProgress::new())
            .unwrap();
        assert!(result.segments.is_empty());
    }

    #[test]
    fn test_cancelled_search() {
        let engine = StraightLineEngine::new();
        let mut graph = engine
            .build_graph(&RouterConfig::new("car"), &[tile_reader("a", 48.0, 8.0)])
            .unwrap();
        let progress = RouteProgress::new();
        progress.cancel();
        let err = graph
            .search_route(&request(&[(47.5, 8.2), (47.6, 8.4)]), STRATEGY, &progress)
            .unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
    }

    #[test]
    fn test_build_without_data_fails() {
        assert!(StraightLineEngine::new()
            .build_graph(&RouterConfig::new("car"), &[])
            .is_err());
    }

    #[test]
    fn test_geocode_names_covering_file() {
        let readers = [tile_reader("a", 48.0, 8.0), tile_reader("b", 48.0, 9.0)];
        let results = StraightLineEngine::new()
            .geocode(LatLon::new(47.5, 9.5), &readers)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "b");
    }
}
