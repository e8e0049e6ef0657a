//! Region lookup used to narrow file selection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geo::{LatLon, QuadRect};

/// Maps points to the named download regions covering them.
pub trait RegionIndex: Send + Sync {
    /// Names of every region containing `point`, most specific first.
    fn regions_at(&self, point: LatLon) -> Vec<String>;

    /// Name of the region directly containing `region`.
    fn parent(&self, region: &str) -> Option<String>;

    /// Returns true if `ancestor` is a (transitive) parent of `region`.
    fn is_within(&self, region: &str, ancestor: &str) -> bool {
        let mut current = self.parent(region);
        // Region trees are shallow; the bound guards against cycles.
        for _ in 0..16 {
            match current {
                Some(ref name) if name == ancestor => return true,
                Some(name) => current = self.parent(&name),
                None => return false,
            }
        }
        false
    }
}

/// Normalizes a map file stem or region name for matching.
///
/// `Germany_berlin_europe_2` and `germany_berlin_europe` both become
/// `germany_berlin_europe`.
pub fn region_key(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    match lower.rsplit_once('_') {
        Some((head, tail)) if !head.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) => {
            head.to_string()
        }
        _ => lower,
    }
}

/// A rectangular region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxRegion {
    pub name: String,
    pub bounds: QuadRect,
    pub parent: Option<String>,
}

/// Region index over axis-aligned boxes.
#[derive(Debug, Default, Clone)]
pub struct BoxRegionIndex {
    regions: Vec<BoxRegion>,
    parents: HashMap<String, String>,
}

impl BoxRegionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, name: &str, bounds: QuadRect, parent: Option<&str>) -> Self {
        let name = region_key(name);
        let parent = parent.map(region_key);
        if let Some(ref p) = parent {
            self.parents.insert(name.clone(), p.clone());
        }
        self.regions.push(BoxRegion {
            name,
            bounds,
            parent,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    fn depth(&self, name: &str) -> usize {
        let mut depth = 0;
        let mut current = self.parents.get(name);
        while let Some(p) = current {
            depth += 1;
            if depth > 16 {
                break;
            }
            current = self.parents.get(p);
        }
        depth
    }
}

impl RegionIndex for BoxRegionIndex {
    fn regions_at(&self, point: LatLon) -> Vec<String> {
        let mut found: Vec<&BoxRegion> = self
            .regions
            .iter()
            .filter(|r| r.bounds.contains_point(point))
            .collect();
        found.sort_by_key(|r| std::cmp::Reverse(self.depth(&r.name)));
        found.into_iter().map(|r| r.name.clone()).collect()
    }

    fn parent(&self, region: &str) -> Option<String> {
        self.parents.get(&region_key(region)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn europe() -> BoxRegionIndex {
        BoxRegionIndex::new()
            .with_region("germany_europe", QuadRect::from_degrees(55.0, 5.0, 47.0, 15.0), Some("europe"))
            .with_region(
                "germany_berlin_europe",
                QuadRect::from_degrees(52.7, 13.0, 52.3, 13.8),
                Some("germany_europe"),
            )
            .with_region("europe", QuadRect::from_degrees(71.0, -25.0, 34.0, 45.0), None)
    }

    #[test]
    fn test_region_key_strips_version_suffix() {
        assert_eq!(region_key("Germany_berlin_europe_2"), "germany_berlin_europe");
        assert_eq!(region_key("World_basemap"), "world_basemap");
        assert_eq!(region_key("_2"), "_2");
    }

    #[test]
    fn test_regions_at_most_specific_first() {
        let index = europe();
        let regions = index.regions_at(LatLon::new(52.52, 13.40));
        assert_eq!(
            regions,
            vec!["germany_berlin_europe", "germany_europe", "europe"]
        );
    }

    #[test]
    fn test_is_within_walks_parents() {
        let index = europe();
        assert!(index.is_within("germany_berlin_europe", "europe"));
        assert!(!index.is_within("europe", "germany_europe"));
    }
}
