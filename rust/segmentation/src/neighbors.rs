// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Neighbor graph construction.
//!
//! Candidates come from the loaded [`Connectivity`]: image 4/8-neighborhoods,
//! explicit adjacency lists, or k-nearest spatial queries. Candidates are then
//! filtered by distance, normal angle, color, timestamp, identifier, category
//! and depth-discontinuity flags. The filtered graph is symmetric; the raw
//! candidates are kept for boundary refinement.

use smallvec::SmallVec;
use tracing::debug;

use crate::affinity::oriented_angle;
use crate::element::Connectivity;
use crate::error::{Error, Result};
use crate::keys::PointIndex;
use crate::point::Point;
use crate::segmentation::{Segmentation, SegmentationState};

type NeighborList = SmallVec<[PointIndex; 8]>;

/// Pixel offsets: the first four are edge neighbors, the rest diagonals.
const PIXEL_OFFSETS: [(i64, i64); 8] = [
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (-1, -1),
    (1, -1),
    (-1, 1),
    (1, 1),
];

impl Segmentation {
    /// Builds each point's filtered neighbor list. Returns the number of
    /// directed neighbor edges.
    pub fn build_neighbors(&mut self) -> Result<usize> {
        self.require_state("build_neighbors", &[SegmentationState::PointsLoaded])?;

        let candidates = self.neighbor_candidates()?;
        let mut filtered: Vec<NeighborList> = candidates
            .iter()
            .enumerate()
            .map(|(p, list)| {
                list.iter()
                    .copied()
                    .filter(|&q| q != p && self.neighbor_compatible(p, q))
                    .collect()
            })
            .collect();
        symmetrize(&mut filtered);

        let edges: usize = filtered.iter().map(|list| list.len()).sum();
        for (point, list) in self.points.iter_mut().zip(filtered) {
            point.neighbors = list;
        }
        self.geometric_neighbors = candidates;
        self.state = SegmentationState::NeighborsBuilt;

        let isolated = self.points.iter().filter(|p| p.neighbors.is_empty()).count();
        debug!(edges, isolated, "built neighbor graph");
        Ok(edges)
    }

    /// `true` when every neighbor edge has its reverse.
    pub fn neighbor_graph_is_symmetric(&self) -> bool {
        self.points.iter().enumerate().all(|(p, point)| {
            point
                .neighbors
                .iter()
                .all(|&q| self.points.get(q).is_some_and(|other| other.neighbors.contains(&p)))
        })
    }

    fn neighbor_candidates(&self) -> Result<Vec<NeighborList>> {
        match &self.connectivity {
            Connectivity::ImageGrid {
                width,
                height,
                diagonal,
            } => Ok(self.image_candidates(*width, *height, *diagonal)),
            Connectivity::Explicit(lists) => Ok(lists
                .iter()
                .enumerate()
                .map(|(p, list)| {
                    let mut out: NeighborList = SmallVec::new();
                    for &q in list {
                        if q != p && !out.contains(&q) {
                            out.push(q);
                        }
                    }
                    out
                })
                .collect()),
            Connectivity::Spatial => self.spatial_candidates(),
        }
    }

    fn image_candidates(&self, width: usize, height: usize, diagonal: bool) -> Vec<NeighborList> {
        let mut pixels: Vec<Option<PointIndex>> = vec![None; width * height];
        for (p, point) in self.points.iter().enumerate() {
            pixels[point.source_index] = Some(p);
        }

        let offsets = if diagonal {
            &PIXEL_OFFSETS[..]
        } else {
            &PIXEL_OFFSETS[..4]
        };

        self.points
            .iter()
            .map(|point| {
                let x = (point.source_index % width) as i64;
                let y = (point.source_index / width) as i64;
                offsets
                    .iter()
                    .filter_map(|&(dx, dy)| {
                        let (nx, ny) = (x + dx, y + dy);
                        if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                            return None;
                        }
                        pixels[ny as usize * width + nx as usize]
                    })
                    .collect()
            })
            .collect()
    }

    fn spatial_candidates(&self) -> Result<Vec<NeighborList>> {
        let index = self.index.as_ref().ok_or(Error::InvalidState {
            operation: "build_neighbors",
            state: self.state,
        })?;
        let k = self.params.max_neighbor_count;

        let mut lists = Vec::with_capacity(self.points.len());
        for (p, point) in self.points.iter().enumerate() {
            let radius = self.search_radius(point);
            let found = match (k, radius) {
                (0, None) => {
                    return Err(Error::InvalidParameter {
                        name: "max_neighbor_count",
                        reason: "spatial neighbors need a count or a distance bound".to_string(),
                    })
                }
                (0, Some(r)) => index.within_radius(&point.position, r),
                (k, r) => index.nearest_k(&point.position, k + 1, r),
            };
            let limit = if k == 0 { usize::MAX } else { k };
            lists.push(
                found
                    .into_iter()
                    .map(|(q, _)| q)
                    .filter(|&q| q != p)
                    .take(limit)
                    .collect(),
            );
        }
        Ok(lists)
    }

    /// Radius for spatial queries around `point`, if bounded.
    pub(crate) fn search_radius(&self, point: &Point) -> Option<f64> {
        let params = &self.params;
        if params.scale_tolerances_with_depth
            && params.max_neighbor_distance_factor > 0.0
            && point.radius1 > 0.0
        {
            Some(params.max_neighbor_distance_factor * point.radius1)
        } else if params.max_neighbor_distance > 0.0 {
            Some(params.max_neighbor_distance)
        } else {
            None
        }
    }

    fn neighbor_distance_bound(&self, a: &Point, b: &Point) -> Option<f64> {
        let params = &self.params;
        let radius = a.radius1.min(b.radius1);
        if params.scale_tolerances_with_depth && params.max_neighbor_distance_factor > 0.0 && radius > 0.0 {
            Some(params.max_neighbor_distance_factor * radius)
        } else if params.max_neighbor_distance > 0.0 {
            Some(params.max_neighbor_distance)
        } else {
            None
        }
    }

    /// Whether `p` and `q` may be neighbors. Symmetric in its arguments.
    pub(crate) fn neighbor_compatible(&self, p: PointIndex, q: PointIndex) -> bool {
        let (a, b) = (&self.points[p], &self.points[q]);
        let params = &self.params;

        if let Some(bound) = self.neighbor_distance_bound(a, b) {
            if (a.position - b.position).norm() > bound {
                return false;
            }
        }
        if params.max_neighbor_normal_angle > 0.0
            && oriented_angle(&a.normal, &b.normal) > params.max_neighbor_normal_angle
        {
            return false;
        }
        if params.max_neighbor_color_difference > 0.0
            && a.color_difference(b) > params.max_neighbor_color_difference
        {
            return false;
        }
        if params.max_neighbor_timestamp_difference > 0.0 {
            if let (Some(ta), Some(tb)) = (a.timestamp, b.timestamp) {
                if (ta - tb).abs() > params.max_neighbor_timestamp_difference {
                    return false;
                }
            }
        }
        if params.partition_by_identifier && a.identifier != b.identifier {
            return false;
        }
        if params.partition_by_category {
            if let (Some(ca), Some(cb)) = (a.category, b.category) {
                if ca != cb {
                    return false;
                }
            }
        }
        a.boundary_compatible(b)
    }
}

/// Adds every missing reverse edge.
fn symmetrize(lists: &mut [NeighborList]) {
    let mut missing = Vec::new();
    for (p, list) in lists.iter().enumerate() {
        for &q in list {
            if !lists[q].contains(&p) {
                missing.push((q, p));
            }
        }
    }
    for (q, p) in missing {
        if !lists[q].contains(&p) {
            lists[q].push(p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementBuffers;
    use crate::params::SegmentationParams;
    use crate::point::flags;
    use nalgebra::{Point3, Vector3};

    fn image(width: usize, height: usize, diagonal: bool) -> ElementBuffers {
        let n = width * height;
        let positions = (0..n)
            .map(|i| Point3::new((i % width) as f64, (i / width) as f64, 0.0))
            .collect();
        ElementBuffers::new(positions)
            .with_normals(vec![Vector3::z(); n])
            .with_connectivity(Connectivity::ImageGrid {
                width,
                height,
                diagonal,
            })
    }

    fn loaded(buffers: &ElementBuffers, params: SegmentationParams) -> Segmentation {
        let mut seg = Segmentation::new(params).unwrap();
        seg.load_points(buffers).unwrap();
        seg.build_neighbors().unwrap();
        seg
    }

    #[test]
    fn image_grid_four_and_eight_connectivity() {
        let seg = loaded(&image(3, 3, false), SegmentationParams::default());
        assert_eq!(seg.points()[4].neighbors.len(), 4);
        assert_eq!(seg.points()[0].neighbors.len(), 2);

        let seg = loaded(&image(3, 3, true), SegmentationParams::default());
        assert_eq!(seg.points()[4].neighbors.len(), 8);
        assert_eq!(seg.points()[0].neighbors.len(), 3);
        assert!(seg.neighbor_graph_is_symmetric());
    }

    #[test]
    fn steep_normals_are_cut_but_kept_as_geometric_neighbors() {
        let mut buffers = image(3, 1, false);
        buffers.normals[2] = Vector3::x();
        let seg = loaded(&buffers, SegmentationParams::default());
        assert_eq!(seg.points()[1].neighbors.as_slice(), &[0]);
        assert_eq!(seg.geometric_neighbors()[1].len(), 2);
    }

    #[test]
    fn shadow_and_silhouette_points_are_not_neighbors() {
        let buffers = image(2, 1, false).with_flags(vec![flags::SHADOW_BOUNDARY, flags::SILHOUETTE_BOUNDARY]);
        let seg = loaded(&buffers, SegmentationParams::default());
        assert!(seg.points()[0].neighbors.is_empty());
        assert!(seg.points()[1].neighbors.is_empty());
    }

    #[test]
    fn spatial_neighbors_are_symmetric() {
        // A tight cluster plus one far point: the far point's nearest
        // neighbors do not list it back until symmetrized.
        let mut positions: Vec<Point3<f64>> = (0..5).map(|i| Point3::new(i as f64 * 0.01, 0.0, 0.0)).collect();
        positions.push(Point3::new(1.0, 0.0, 0.0));
        let buffers = ElementBuffers::new(positions);
        let params = SegmentationParams {
            max_neighbor_count: 2,
            ..Default::default()
        };
        let seg = loaded(&buffers, params);
        assert!(seg.neighbor_graph_is_symmetric());
        assert!(seg.points()[5].neighbors.contains(&4));
        assert!(seg.points()[4].neighbors.contains(&5));
    }

    #[test]
    fn unbounded_spatial_query_is_rejected() {
        let params = SegmentationParams {
            max_neighbor_count: 0,
            ..Default::default()
        };
        let mut seg = Segmentation::new(params).unwrap();
        seg.load_points(&ElementBuffers::new(vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)]))
            .unwrap();
        assert!(matches!(
            seg.build_neighbors(),
            Err(Error::InvalidParameter { name: "max_neighbor_count", .. })
        ));
    }

    #[test]
    fn distance_bound_filters_candidates() {
        let buffers = ElementBuffers::new(vec![
            Point3::origin(),
            Point3::new(0.5, 0.0, 0.0),
            Point3::new(5.0, 0.0, 0.0),
        ]);
        let params = SegmentationParams {
            max_neighbor_distance: 1.0,
            ..Default::default()
        };
        let seg = loaded(&buffers, params);
        assert_eq!(seg.points()[0].neighbors.as_slice(), &[1]);
        assert!(seg.points()[2].neighbors.is_empty());
    }

    /// Three pixels in a row where the middle one keeps only its left edge.
    fn assert_only_left_pair(seg: &Segmentation) {
        assert_eq!(seg.points()[0].neighbors.as_slice(), &[1]);
        assert_eq!(seg.points()[1].neighbors.as_slice(), &[0]);
        assert!(seg.points()[2].neighbors.is_empty());
        assert_eq!(seg.geometric_neighbors()[1].len(), 2);
    }

    #[test]
    fn color_difference_filters_candidates() {
        let buffers = image(3, 1, false).with_colors(vec![
            Vector3::new(0.2, 0.2, 0.2),
            Vector3::new(0.25, 0.2, 0.2),
            Vector3::new(0.25, 0.8, 0.2),
        ]);
        let params = SegmentationParams {
            max_neighbor_color_difference: 0.1,
            ..Default::default()
        };
        assert_only_left_pair(&loaded(&buffers, params));
        assert_eq!(loaded(&buffers, SegmentationParams::default()).points()[1].neighbors.len(), 2);
    }

    #[test]
    fn timestamp_difference_filters_candidates() {
        let mut buffers = image(3, 1, false);
        buffers.timestamps = vec![0.0, 0.5, 5.0];
        let params = SegmentationParams {
            max_neighbor_timestamp_difference: 1.0,
            ..Default::default()
        };
        assert_only_left_pair(&loaded(&buffers, params));
    }

    #[test]
    fn identifier_partitioning_filters_candidates() {
        let mut buffers = image(3, 1, false);
        buffers.identifiers = vec![7, 7, 8];
        let params = SegmentationParams {
            partition_by_identifier: true,
            ..Default::default()
        };
        assert_only_left_pair(&loaded(&buffers, params));
        assert_eq!(loaded(&buffers, SegmentationParams::default()).points()[1].neighbors.len(), 2);
    }

    #[test]
    fn distance_bound_scales_with_the_smaller_radius() {
        let positions = vec![
            Point3::origin(),
            Point3::new(0.5, 0.0, 0.0),
            Point3::new(5.0, 0.0, 0.0),
        ];
        let params = SegmentationParams {
            scale_tolerances_with_depth: true,
            max_neighbor_distance_factor: 8.0,
            ..Default::default()
        };

        // 8 × 0.1 = 0.8 reaches the second point but not the third.
        let buffers = ElementBuffers::new(positions.clone()).with_radii(vec![[0.1, 0.1]; 3]);
        let seg = loaded(&buffers, params.clone());
        assert_eq!(seg.points()[0].neighbors.as_slice(), &[1]);
        assert!(seg.points()[2].neighbors.is_empty());

        // 8 × min(0.1, 0.05) = 0.4 falls short.
        let buffers = ElementBuffers::new(positions).with_radii(vec![[0.1, 0.1], [0.05, 0.05], [0.1, 0.1]]);
        let seg = loaded(&buffers, params);
        assert!(seg.points().iter().all(|p| p.neighbors.is_empty()));
    }
}
