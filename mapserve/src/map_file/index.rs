//! File index: routing parts and their subregion bounding boxes.

use serde::{Deserialize, Serialize};

use crate::geo::QuadRect;

/// One routing subregion of a map file, in 31-bit tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSubregion {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    /// Whether the subregion belongs to the base (long-distance) graph.
    pub base: bool,
    /// Offset of the subregion data inside the payload.
    pub data_offset: u64,
}

impl RoutingSubregion {
    pub fn new(bounds: QuadRect, base: bool) -> Self {
        Self {
            left: bounds.left,
            top: bounds.top,
            right: bounds.right,
            bottom: bounds.bottom,
            base,
            data_offset: 0,
        }
    }

    pub fn bounds(&self) -> QuadRect {
        QuadRect::new(self.left, self.top, self.right, self.bottom)
    }

    #[inline]
    pub fn intersects(&self, quad: &QuadRect) -> bool {
        self.bounds().intersects(quad)
    }
}

/// A named routing section of a map file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPart {
    pub name: String,
    pub subregions: Vec<RoutingSubregion>,
}

/// Index of a map file: everything needed to decide whether the file is
/// relevant for a bounding box without opening it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndex {
    /// Map data version (date stamp set by the map producer).
    pub version: u64,
    pub routing_parts: Vec<RoutingPart>,
}

impl FileIndex {
    /// Index with a single routing part covering `bounds`.
    pub fn single(name: impl Into<String>, bounds: QuadRect) -> Self {
        Self {
            version: 0,
            routing_parts: vec![RoutingPart {
                name: name.into(),
                subregions: vec![RoutingSubregion::new(bounds, false)],
            }],
        }
    }

    /// Returns true if any routing subregion intersects `quad`.
    pub fn intersects(&self, quad: &QuadRect) -> bool {
        self.routing_parts
            .iter()
            .flat_map(|part| part.subregions.iter())
            .any(|s| s.intersects(quad))
    }

    /// Total number of routing subregions.
    pub fn subregion_count(&self) -> usize {
        self.routing_parts.iter().map(|p| p.subregions.len()).sum()
    }

    /// Quad enclosing every subregion, if any.
    pub fn bounds(&self) -> Option<QuadRect> {
        let mut subregions = self.routing_parts.iter().flat_map(|p| p.subregions.iter());
        let first = subregions.next()?.bounds();
        Some(subregions.fold(first, |acc, s| {
            QuadRect::new(
                acc.left.min(s.left),
                acc.top.min(s.top),
                acc.right.max(s.right),
                acc.bottom.max(s.bottom),
            )
        }))
    }

    pub fn has_routing(&self) -> bool {
        self.subregion_count() > 0
    }
}
