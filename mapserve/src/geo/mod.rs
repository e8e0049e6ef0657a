//! Geographic primitives module
//!
//! Provides WGS84 points, conversions to the 31-bit tile coordinate space used
//! by map file routing indexes, and the bounding quads that map files and
//! routing requests are matched on.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum latitude representable in Web Mercator.
pub const MAX_LAT: f64 = 85.051_128_779_806_6;

/// Minimum latitude representable in Web Mercator.
pub const MIN_LAT: f64 = -85.051_128_779_806_6;

/// Mean radius of Earth, in meters.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Size of the 31-bit tile space (2^31).
const TILE_31_SIZE: f64 = 2_147_483_648.0;

/// A WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// X coordinate of this point in the 31-bit tile space.
    pub fn x31(&self) -> u32 {
        lon_to_x31(self.lon)
    }

    /// Y coordinate of this point in the 31-bit tile space.
    pub fn y31(&self) -> u32 {
        lat_to_y31(self.lat)
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

/// Converts a longitude to its 31-bit tile X coordinate.
#[inline]
pub fn lon_to_x31(lon: f64) -> u32 {
    let lon = lon.clamp(-180.0, 180.0);
    let x = (lon + 180.0) / 360.0 * TILE_31_SIZE;
    x.clamp(0.0, TILE_31_SIZE - 1.0) as u32
}

/// Converts a latitude to its 31-bit tile Y coordinate (Web Mercator).
#[inline]
pub fn lat_to_y31(lat: f64) -> u32 {
    let lat = lat.clamp(MIN_LAT, MAX_LAT);
    let lat_rad = lat * PI / 180.0;
    let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * TILE_31_SIZE;
    y.clamp(0.0, TILE_31_SIZE - 1.0) as u32
}

/// Converts a 31-bit tile X coordinate back to longitude.
#[inline]
pub fn x31_to_lon(x: u32) -> f64 {
    x as f64 / TILE_31_SIZE * 360.0 - 180.0
}

/// Converts a 31-bit tile Y coordinate back to latitude.
#[inline]
pub fn y31_to_lat(y: u32) -> f64 {
    let n = PI * (1.0 - 2.0 * y as f64 / TILE_31_SIZE);
    n.sinh().atan() * 180.0 / PI
}

/// Great-circle distance between two points in meters (haversine formula).
pub fn distance_m(a: LatLon, b: LatLon) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let sin_dlat_half = ((lat2 - lat1) * 0.5).sin();
    let sin_dlon_half = ((b.lon.to_radians() - a.lon.to_radians()) * 0.5).sin();

    let h = sin_dlat_half * sin_dlat_half + lat1.cos() * lat2.cos() * sin_dlon_half * sin_dlon_half;

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Bounding quad in the 31-bit tile space.
///
/// `top` is the northern edge and has the smaller Y value. Edges are
/// inclusive, so a degenerate quad built from a single point still
/// intersects the subregions it lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuadRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl QuadRect {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Degenerate quad covering a single point.
    pub fn from_point(point: LatLon) -> Self {
        let (x, y) = (point.x31(), point.y31());
        Self::new(x, y, x, y)
    }

    /// Quad covering the given degree bounds.
    pub fn from_degrees(north: f64, west: f64, south: f64, east: f64) -> Self {
        Self::new(
            lon_to_x31(west.min(east)),
            lat_to_y31(north.max(south)),
            lon_to_x31(east.max(west)),
            lat_to_y31(south.min(north)),
        )
    }

    /// Smallest quad covering every point, or `None` for an empty input.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a LatLon>,
    {
        let mut quad: Option<QuadRect> = None;
        for point in points {
            quad = Some(match quad {
                Some(q) => q.extended(*point),
                None => QuadRect::from_point(*point),
            });
        }
        quad
    }

    /// Returns a copy grown to include `point`.
    pub fn extended(mut self, point: LatLon) -> Self {
        let (x, y) = (point.x31(), point.y31());
        self.left = self.left.min(x);
        self.right = self.right.max(x);
        self.top = self.top.min(y);
        self.bottom = self.bottom.max(y);
        self
    }

    /// Returns a copy grown by `margin` tile units on every side.
    pub fn inflated(self, margin: u32) -> Self {
        Self::new(
            self.left.saturating_sub(margin),
            self.top.saturating_sub(margin),
            self.right.saturating_add(margin).min(TILE_31_SIZE as u32 - 1),
            self.bottom.saturating_add(margin).min(TILE_31_SIZE as u32 - 1),
        )
    }

    /// Inclusive intersection test.
    #[inline]
    pub fn intersects(&self, other: &QuadRect) -> bool {
        self.left <= other.right
            && self.right >= other.left
            && self.top <= other.bottom
            && self.bottom >= other.top
    }

    /// Returns true if `point` lies inside or on the edge of this quad.
    pub fn contains_point(&self, point: LatLon) -> bool {
        let (x, y) = (point.x31(), point.y31());
        self.left <= x && x <= self.right && self.top <= y && y <= self.bottom
    }

    /// North-west and south-east corners in degrees.
    pub fn corners(&self) -> (LatLon, LatLon) {
        (
            LatLon::new(y31_to_lat(self.top), x31_to_lon(self.left)),
            LatLon::new(y31_to_lat(self.bottom), x31_to_lon(self.right)),
        )
    }
}

impl fmt::Display for QuadRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (nw, se) = self.corners();
        write!(f, "[{} .. {}]", nw, se)
    }
}

/// Total length of a polyline in meters.
pub fn polyline_length_m(points: &[LatLon]) -> f64 {
    points.windows(2).map(|w| distance_m(w[0], w[1])).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x31_origin_and_antimeridian() {
        assert_eq!(lon_to_x31(-180.0), 0);
        assert_eq!(lon_to_x31(0.0), 1 << 30);
        assert_eq!(lon_to_x31(180.0), (1u32 << 31) - 1);
    }

    #[test]
    fn test_y31_equator() {
        assert_eq!(lat_to_y31(0.0), 1 << 30);
        assert!(lat_to_y31(50.0) < lat_to_y31(10.0), "north is smaller");
    }

    #[test]
    fn test_y31_clamps_polar_latitudes() {
        assert_eq!(lat_to_y31(90.0), lat_to_y31(MAX_LAT));
        assert_eq!(lat_to_y31(-90.0), lat_to_y31(MIN_LAT));
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        let d = distance_m(LatLon::new(0.0, 0.0), LatLon::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 100.0, "got {}", d);
    }

    #[test]
    fn test_quad_from_points() {
        let points = vec![
            LatLon::new(52.0, 13.0),
            LatLon::new(52.5, 13.5),
            LatLon::new(51.8, 12.9),
        ];
        let quad = QuadRect::from_points(&points).unwrap();
        for p in &points {
            assert!(quad.contains_point(*p));
        }
        assert_eq!(quad.left, lon_to_x31(12.9));
        assert_eq!(quad.top, lat_to_y31(52.5));
    }

    #[test]
    fn test_quad_from_no_points() {
        let points: Vec<LatLon> = Vec::new();
        assert!(QuadRect::from_points(&points).is_none());
    }

    #[test]
    fn test_intersection_is_inclusive() {
        let a = QuadRect::new(0, 0, 10, 10);
        let b = QuadRect::new(10, 10, 20, 20);
        let c = QuadRect::new(11, 0, 20, 10);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_from_degrees_orders_edges() {
        let q = QuadRect::from_degrees(47.0, 8.0, 46.0, 9.0);
        let swapped = QuadRect::from_degrees(46.0, 9.0, 47.0, 8.0);
        assert_eq!(q, swapped);
        assert!(q.top < q.bottom);
        assert!(q.left < q.right);
    }

    #[test]
    fn test_inflated_saturates() {
        let q = QuadRect::new(5, 5, 10, 10).inflated(100);
        assert_eq!(q.left, 0);
        assert_eq!(q.top, 0);
        assert_eq!(q.right, 110);
    }

    #[test]
    fn test_polyline_length() {
        let line = [
            LatLon::new(0.0, 0.0),
            LatLon::new(1.0, 0.0),
            LatLon::new(2.0, 0.0),
        ];
        let total = polyline_length_m(&line);
        assert!((total - 2.0 * 111_195.0).abs() < 200.0);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_x31_roundtrip(lon in -180.0..180.0_f64) {
                let back = x31_to_lon(lon_to_x31(lon));
                prop_assert!((back - lon).abs() < 1e-6, "{} -> {}", lon, back);
            }

            #[test]
            fn test_y31_roundtrip(lat in -85.0..85.0_f64) {
                let back = y31_to_lat(lat_to_y31(lat));
                prop_assert!((back - lat).abs() < 1e-6, "{} -> {}", lat, back);
            }

            #[test]
            fn test_intersects_symmetric(
                a in (0u32..1000, 0u32..1000, 0u32..1000, 0u32..1000),
                b in (0u32..1000, 0u32..1000, 0u32..1000, 0u32..1000),
            ) {
                let qa = QuadRect::new(a.0.min(a.2), a.1.min(a.3), a.0.max(a.2), a.1.max(a.3));
                let qb = QuadRect::new(b.0.min(b.2), b.1.min(b.3), b.0.max(b.2), b.1.max(b.3));
                prop_assert_eq!(qa.intersects(&qb), qb.intersects(&qa));
            }
        }
    }
}
