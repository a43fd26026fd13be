// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Affinity scores in `[0, 1]`.
//!
//! Each enabled tolerance contributes a factor `1 - value / tolerance`, and a
//! value beyond its tolerance zeroes the score. A tolerance of `0` disables
//! its criterion.
//!
//! Sample normals are oriented, fitted plane normals are not: sample to sample
//! angles use `acos(n·m)`, angles against a fitted plane use `acos(|n·m|)`.
//! A zero-length normal never fails an angle test.

use nalgebra::Vector3;
use surfseg_geometry::Primitive;

use crate::cluster::Cluster;
use crate::keys::{ClusterKey, PointIndex};
use crate::params::SegmentationParams;
use crate::point::Point;
use crate::segmentation::Segmentation;

const MIN_NORMAL_LENGTH: f64 = 1e-12;

fn cosine(a: &Vector3<f64>, b: &Vector3<f64>) -> Option<f64> {
    let (la, lb) = (a.norm(), b.norm());
    if la <= MIN_NORMAL_LENGTH || lb <= MIN_NORMAL_LENGTH {
        return None;
    }
    Some((a.dot(b) / (la * lb)).clamp(-1.0, 1.0))
}

/// Angle between two oriented normals, in `[0, π]`.
pub fn oriented_angle(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    cosine(a, b).map_or(0.0, f64::acos)
}

/// Angle between two lines through the origin, in `[0, π/2]`.
pub fn unoriented_angle(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    cosine(a, b).map_or(0.0, |c| c.abs().acos())
}

/// `1 - value / tolerance`, or `0` once `value` exceeds `tolerance`.
pub fn tolerance_factor(value: f64, tolerance: f64) -> f64 {
    if value <= tolerance {
        1.0 - value / tolerance
    } else {
        0.0
    }
}

fn categories_conflict(a: Option<u32>, b: Option<u32>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x != y)
}

/// Affinity of `point` for `cluster`.
pub fn point_cluster_affinity(point: &Point, cluster: &Cluster, params: &SegmentationParams) -> f64 {
    if params.partition_by_category && categories_conflict(point.category, cluster.category) {
        return 0.0;
    }
    let mut affinity = 1.0;

    let mut distance_tolerance = params.max_cluster_primitive_distance;
    if params.scale_tolerances_with_depth {
        if let Some(depth) = point.depth.filter(|d| *d > 0.0) {
            distance_tolerance *= depth;
        }
    }
    if distance_tolerance > 0.0 {
        affinity *= tolerance_factor(cluster.primitive.distance(&point.position), distance_tolerance);
    }

    if params.max_cluster_normal_angle > 0.0 {
        let angle = match cluster.primitive.normal() {
            Some(normal) => unoriented_angle(&point.normal, &normal),
            None => cluster
                .aggregate_normal()
                .map_or(0.0, |normal| oriented_angle(&point.normal, &normal)),
        };
        affinity *= tolerance_factor(angle, params.max_cluster_normal_angle);
    }

    if params.max_cluster_color_difference > 0.0 {
        let difference = (point.color - cluster.color()).abs().max();
        affinity *= tolerance_factor(difference, params.max_cluster_color_difference);
    }

    if params.max_cluster_timestamp_difference > 0.0 {
        if let (Some(t), Some(ct)) = (point.timestamp, cluster.timestamp()) {
            affinity *= tolerance_factor((t - ct).abs(), params.max_cluster_timestamp_difference);
        }
    }
    affinity
}

/// Affinity of merging clusters `a` and `b`.
///
/// The angle criterion takes the largest angle among the two cluster normals
/// and the normal of the merged plane.
pub fn cluster_pair_affinity(a: &Cluster, b: &Cluster, params: &SegmentationParams) -> f64 {
    if params.partition_by_category && categories_conflict(a.category, b.category) {
        return 0.0;
    }
    let merged = Primitive::merge(&a.primitive, &b.primitive, a.npoints as f64, b.npoints as f64);
    let mut affinity = 1.0;

    if params.max_pair_primitive_distance > 0.0 {
        affinity *= tolerance_factor(merged.rms_residual(), params.max_pair_primitive_distance);
    }

    if params.max_pair_normal_angle > 0.0 {
        let mut angle = match (a.primitive.normal(), b.primitive.normal()) {
            (Some(na), Some(nb)) => unoriented_angle(&na, &nb),
            _ => match (a.aggregate_normal(), b.aggregate_normal()) {
                (Some(na), Some(nb)) => oriented_angle(&na, &nb),
                _ => 0.0,
            },
        };
        // Two parallel strips at different heights are coplanar with each
        // other's normals but not with the plane spanning both.
        if let Some(merged_normal) = merged.normal() {
            for cluster in [a, b] {
                if let Some(normal) = cluster.primitive.normal().or_else(|| cluster.aggregate_normal()) {
                    angle = angle.max(unoriented_angle(&normal, &merged_normal));
                }
            }
        }
        affinity *= tolerance_factor(angle, params.max_pair_normal_angle);
    }

    if params.max_pair_color_difference > 0.0 {
        let difference = (a.color() - b.color()).abs().max();
        affinity *= tolerance_factor(difference, params.max_pair_color_difference);
    }

    if params.max_pair_timestamp_difference > 0.0 {
        if let (Some(ta), Some(tb)) = (a.timestamp(), b.timestamp()) {
            affinity *= tolerance_factor((ta - tb).abs(), params.max_pair_timestamp_difference);
        }
    }

    if params.equalize_cluster_sizes {
        let (small, large) = if a.npoints <= b.npoints {
            (a.npoints, b.npoints)
        } else {
            (b.npoints, a.npoints)
        };
        if large > 0 {
            affinity *= (small as f64 / large as f64).sqrt();
        }
    }

    if params.favor_convex_clusters {
        let extent = merged.bbox.planar_extent();
        if extent > 0.0 {
            affinity *= ((a.area + b.area) / extent).min(1.0);
        }
    }
    affinity
}

impl Segmentation {
    /// Affinity of a point for a cluster; `0` for stale keys.
    pub fn point_affinity(&self, point: PointIndex, cluster: ClusterKey) -> f64 {
        match (self.points.get(point), self.clusters.get(cluster)) {
            (Some(p), Some(c)) => point_cluster_affinity(p, c, &self.params),
            _ => 0.0,
        }
    }

    /// Affinity of merging two clusters; `0` for stale keys.
    pub fn pair_affinity(&self, a: ClusterKey, b: ClusterKey) -> f64 {
        match (self.clusters.get(a), self.clusters.get(b)) {
            (Some(ca), Some(cb)) => cluster_pair_affinity(ca, cb, &self.params),
            _ => 0.0,
        }
    }
}
