// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Input samples as stored in the segmentation's point arena.

use nalgebra::{Point3, Vector3};
use smallvec::SmallVec;

use crate::keys::{ClusterKey, PointIndex};

/// Boundary/attribute bits carried in [`Point::flags`].
pub mod flags {
    /// Sample lies on the border of the valid image region.
    pub const BORDER_BOUNDARY: u32 = 0x1;
    /// Sample lies on the near side of a depth discontinuity.
    pub const SILHOUETTE_BOUNDARY: u32 = 0x2;
    /// Sample lies on the far side of a depth discontinuity.
    pub const SHADOW_BOUNDARY: u32 = 0x4;
}

/// One oriented sample.
///
/// Points are owned by the segmentation and never move once loaded. The
/// owning cluster is a non-owning back-reference that the clustering passes
/// rewrite as membership changes.
#[derive(Debug, Clone)]
pub struct Point {
    pub position: Point3<f64>,
    pub normal: Vector3<f64>,
    pub tangent: Vector3<f64>,
    pub radius1: f64,
    pub radius2: f64,
    pub area: f64,
    pub color: Vector3<f64>,
    pub depth: Option<f64>,
    pub timestamp: Option<f64>,
    pub category: Option<u32>,
    pub category_confidence: f64,
    pub identifier: Option<u32>,
    pub flags: u32,
    /// Pixel index or mesh face id this sample came from.
    pub source_index: usize,
    /// Filtered neighbors, in candidate order.
    pub neighbors: SmallVec<[PointIndex; 8]>,
    pub cluster: Option<ClusterKey>,
    /// Affinity of the point to its current cluster.
    pub cluster_affinity: f64,
}

impl Point {
    /// Creates an unattached sample at `position` with neutral attributes.
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: Vector3::zeros(),
            tangent: Vector3::zeros(),
            radius1: 0.0,
            radius2: 0.0,
            area: 0.0,
            color: Vector3::zeros(),
            depth: None,
            timestamp: None,
            category: None,
            category_confidence: 0.0,
            identifier: None,
            flags: 0,
            source_index: 0,
            neighbors: SmallVec::new(),
            cluster: None,
            cluster_affinity: 0.0,
        }
    }

    pub fn is_silhouette_boundary(&self) -> bool {
        self.flags & flags::SILHOUETTE_BOUNDARY != 0
    }

    pub fn is_shadow_boundary(&self) -> bool {
        self.flags & flags::SHADOW_BOUNDARY != 0
    }

    /// `false` when one sample is on the shadow side and the other on the
    /// silhouette side of a depth discontinuity.
    pub fn boundary_compatible(&self, other: &Point) -> bool {
        !((self.is_shadow_boundary() && other.is_silhouette_boundary())
            || (self.is_silhouette_boundary() && other.is_shadow_boundary()))
    }

    /// Largest per-channel color difference.
    pub fn color_difference(&self, other: &Point) -> f64 {
        (self.color - other.color).abs().max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_and_silhouette_are_incompatible() {
        let mut a = Point::new(Point3::origin());
        let mut b = Point::new(Point3::origin());
        assert!(a.boundary_compatible(&b));

        a.flags = flags::SHADOW_BOUNDARY;
        b.flags = flags::SILHOUETTE_BOUNDARY;
        assert!(!a.boundary_compatible(&b));
        assert!(!b.boundary_compatible(&a));

        b.flags = flags::SHADOW_BOUNDARY | flags::BORDER_BOUNDARY;
        assert!(a.boundary_compatible(&b));
    }

    #[test]
    fn color_difference_is_max_channel() {
        let mut a = Point::new(Point3::origin());
        let mut b = Point::new(Point3::origin());
        a.color = Vector3::new(0.1, 0.5, 0.9);
        b.color = Vector3::new(0.2, 0.1, 0.9);
        assert!((a.color_difference(&b) - 0.4).abs() < 1e-12);
    }
}
