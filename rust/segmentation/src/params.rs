// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Segmentation tunables.
//!
//! A flat struct of plain values with documented defaults. Every tolerance
//! uses `0` to mean "criterion disabled". Angles are in radians. The struct
//! round-trips through JSON, and missing fields take their defaults.

use std::f64::consts::{FRAC_PI_4, FRAC_PI_6};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// All tunables of a segmentation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationParams {
    // --- Neighbor graph ---
    /// Candidates per point for spatial queries (0 = everything in radius).
    pub max_neighbor_count: usize,
    /// Absolute neighbor distance bound.
    pub max_neighbor_distance: f64,
    /// Multiplier of the smaller radius1 when scaling with depth.
    pub max_neighbor_distance_factor: f64,
    /// Oriented normal angle between neighbors.
    pub max_neighbor_normal_angle: f64,
    /// Per-channel color difference between neighbors.
    pub max_neighbor_color_difference: f64,
    pub max_neighbor_timestamp_difference: f64,
    /// Neighbors must carry the same identifier.
    pub partition_by_identifier: bool,
    /// Neighbors and cluster members must carry the same category.
    pub partition_by_category: bool,

    // --- Point to cluster affinity ---
    pub max_cluster_primitive_distance: f64,
    pub max_cluster_normal_angle: f64,
    pub max_cluster_color_difference: f64,
    pub max_cluster_timestamp_difference: f64,
    /// Minimum affinity for a point to join or stay in a cluster.
    pub min_point_affinity: f64,
    /// Margin a neighboring cluster must win by during refinement.
    pub reassignment_hysteresis: f64,

    // --- Cluster to cluster affinity ---
    /// Bound on the rms residual of the merged primitive.
    pub max_pair_primitive_distance: f64,
    /// Plane angle bound; also gates neighbors during boundary refinement.
    pub max_pair_normal_angle: f64,
    pub max_pair_color_difference: f64,
    pub max_pair_timestamp_difference: f64,
    /// Pairs below this affinity are not merged.
    pub min_pair_affinity: f64,

    // --- Cluster counts and sizes ---
    /// Merging stops at this many clusters (0 = no bound).
    pub min_clusters: usize,
    /// Merging continues below `min_pair_affinity` while above this many
    /// clusters (0 = no bound).
    pub max_clusters: usize,
    pub min_cluster_points: usize,
    pub min_cluster_area: f64,
    /// Minimum fraction of all points a cluster must hold.
    pub min_cluster_coverage: f64,

    // --- Iteration caps ---
    pub max_refinement_iterations: usize,
    /// Merge/reassign rounds.
    pub max_reassignment_iterations: usize,
    /// Safety cap for the boundary relabeling fixed point.
    pub max_boundary_refinement_passes: usize,

    /// Raster spacing for planar grids (0 = twice the mean radius1).
    pub planar_grid_spacing: f64,

    // --- Strategy switches ---
    pub initialize_hierarchically: bool,
    pub scale_tolerances_with_depth: bool,
    pub allow_outlier_points: bool,
    pub equalize_cluster_sizes: bool,
    pub favor_convex_clusters: bool,
    pub split_disconnected_clusters: bool,
    pub refine_boundaries: bool,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            max_neighbor_count: 16,
            max_neighbor_distance: 0.0,
            max_neighbor_distance_factor: 8.0,
            max_neighbor_normal_angle: FRAC_PI_4,
            max_neighbor_color_difference: 0.0,
            max_neighbor_timestamp_difference: 0.0,
            partition_by_identifier: false,
            partition_by_category: false,

            max_cluster_primitive_distance: 0.1,
            max_cluster_normal_angle: FRAC_PI_6,
            max_cluster_color_difference: 0.0,
            max_cluster_timestamp_difference: 0.0,
            min_point_affinity: 0.25,
            reassignment_hysteresis: 0.05,

            max_pair_primitive_distance: 0.1,
            max_pair_normal_angle: FRAC_PI_6,
            max_pair_color_difference: 0.0,
            max_pair_timestamp_difference: 0.0,
            min_pair_affinity: 0.5,

            min_clusters: 0,
            max_clusters: 0,
            min_cluster_points: 10,
            min_cluster_area: 0.0,
            min_cluster_coverage: 0.0,

            max_refinement_iterations: 5,
            max_reassignment_iterations: 2,
            max_boundary_refinement_passes: 100,

            planar_grid_spacing: 0.0,

            initialize_hierarchically: true,
            scale_tolerances_with_depth: false,
            allow_outlier_points: false,
            equalize_cluster_sizes: false,
            favor_convex_clusters: false,
            split_disconnected_clusters: true,
            refine_boundaries: true,
        }
    }
}

impl SegmentationParams {
    /// Parses parameters from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    /// Serializes parameters to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks every tolerance is finite and non-negative and the cluster
    /// count bounds are consistent.
    pub fn validate(&self) -> Result<()> {
        let tolerances: [(&'static str, f64); 16] = [
            ("max_neighbor_distance", self.max_neighbor_distance),
            ("max_neighbor_distance_factor", self.max_neighbor_distance_factor),
            ("max_neighbor_normal_angle", self.max_neighbor_normal_angle),
            ("max_neighbor_color_difference", self.max_neighbor_color_difference),
            ("max_neighbor_timestamp_difference", self.max_neighbor_timestamp_difference),
            ("max_cluster_primitive_distance", self.max_cluster_primitive_distance),
            ("max_cluster_normal_angle", self.max_cluster_normal_angle),
            ("max_cluster_color_difference", self.max_cluster_color_difference),
            ("max_cluster_timestamp_difference", self.max_cluster_timestamp_difference),
            ("reassignment_hysteresis", self.reassignment_hysteresis),
            ("max_pair_primitive_distance", self.max_pair_primitive_distance),
            ("max_pair_normal_angle", self.max_pair_normal_angle),
            ("max_pair_color_difference", self.max_pair_color_difference),
            ("max_pair_timestamp_difference", self.max_pair_timestamp_difference),
            ("min_cluster_area", self.min_cluster_area),
            ("planar_grid_spacing", self.planar_grid_spacing),
        ];
        for (name, value) in tolerances {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidParameter {
                    name,
                    reason: format!("must be finite and non-negative, got {value}"),
                });
            }
        }

        for (name, value) in [
            ("min_point_affinity", self.min_point_affinity),
            ("min_pair_affinity", self.min_pair_affinity),
            ("min_cluster_coverage", self.min_cluster_coverage),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidParameter {
                    name,
                    reason: format!("must lie in [0, 1], got {value}"),
                });
            }
        }

        if self.min_clusters > 0 && self.max_clusters > 0 && self.min_clusters > self.max_clusters {
            return Err(Error::InvalidParameter {
                name: "min_clusters",
                reason: format!(
                    "{} exceeds max_clusters {}",
                    self.min_clusters, self.max_clusters
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SegmentationParams::default().validate().unwrap();
    }

    #[test]
    fn json_round_trip() {
        let mut params = SegmentationParams::default();
        params.min_cluster_points = 42;
        params.allow_outlier_points = true;
        let json = params.to_json_string().unwrap();
        let back = SegmentationParams::from_json_str(&json).unwrap();
        assert_eq!(back.min_cluster_points, 42);
        assert!(back.allow_outlier_points);
        assert!((back.max_pair_normal_angle - params.max_pair_normal_angle).abs() < 1e-12);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let params = SegmentationParams::from_json_str(r#"{ "min_cluster_points": 3 }"#).unwrap();
        assert_eq!(params.min_cluster_points, 3);
        assert_eq!(params.max_refinement_iterations, 5);
        assert!(params.initialize_hierarchically);
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        let params = SegmentationParams {
            max_cluster_primitive_distance: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidParameter { name: "max_cluster_primitive_distance", .. })
        ));
    }

    #[test]
    fn inconsistent_cluster_bounds_are_rejected() {
        let params = SegmentationParams {
            min_clusters: 10,
            max_clusters: 5,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        assert!(matches!(
            SegmentationParams::from_json_str("{ not json"),
            Err(Error::Serialization(_))
        ));
    }
}
