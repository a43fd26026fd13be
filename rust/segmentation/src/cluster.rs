// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Clusters and cluster pairs.
//!
//! A cluster is a node of the merge forest. Leaf clusters own point indices
//! directly; internal clusters, created by hierarchical initialization, own
//! two children and summarize their union. Only top-level clusters (no
//! parent) take part in refinement and merging, and only they carry pairs.

use nalgebra::Vector3;
use smallvec::SmallVec;
use surfseg_geometry::Primitive;

use crate::keys::{ClusterKey, PairKey, PointIndex};
use crate::point::Point;

/// A group of points with a fitted primitive and aggregate attributes.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Point the cluster was started from, if any.
    pub seed: Option<PointIndex>,
    /// Member points of a leaf cluster.
    pub points: Vec<PointIndex>,
    pub parent: Option<ClusterKey>,
    pub children: Vec<ClusterKey>,
    /// Pairs this cluster participates in.
    pub pairs: SmallVec<[PairKey; 8]>,
    pub primitive: Primitive,
    /// Number of points, including those of descendants.
    pub npoints: usize,
    pub area: f64,
    pub color_sum: Vector3<f64>,
    pub normal_sum: Vector3<f64>,
    pub timestamp_sum: f64,
    pub timestamp_count: usize,
    pub category: Option<u32>,
    /// Sum of member affinities as of the last refit.
    pub total_affinity: f64,
    /// Position in the finalized output order.
    pub index: usize,
}

impl Cluster {
    pub fn new(seed: Option<PointIndex>) -> Self {
        Self {
            seed,
            points: Vec::new(),
            parent: None,
            children: Vec::new(),
            pairs: SmallVec::new(),
            primitive: Primitive::null(),
            npoints: 0,
            area: 0.0,
            color_sum: Vector3::zeros(),
            normal_sum: Vector3::zeros(),
            timestamp_sum: 0.0,
            timestamp_count: 0,
            category: None,
            total_affinity: 0.0,
            index: 0,
        }
    }

    pub fn npoints(&self) -> usize {
        self.npoints
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Mean member color.
    pub fn color(&self) -> Vector3<f64> {
        if self.npoints == 0 {
            Vector3::zeros()
        } else {
            self.color_sum / self.npoints as f64
        }
    }

    /// Mean member timestamp, if any member carries one.
    pub fn timestamp(&self) -> Option<f64> {
        (self.timestamp_count > 0).then(|| self.timestamp_sum / self.timestamp_count as f64)
    }

    /// Normalized sum of member normals.
    pub fn aggregate_normal(&self) -> Option<Vector3<f64>> {
        let len = self.normal_sum.norm();
        (len > 1e-12).then(|| self.normal_sum / len)
    }

    pub fn mean_affinity(&self) -> f64 {
        if self.npoints == 0 {
            0.0
        } else {
            self.total_affinity / self.npoints as f64
        }
    }

    pub(crate) fn clear_stats(&mut self) {
        self.npoints = 0;
        self.area = 0.0;
        self.color_sum = Vector3::zeros();
        self.normal_sum = Vector3::zeros();
        self.timestamp_sum = 0.0;
        self.timestamp_count = 0;
        self.category = None;
        self.total_affinity = 0.0;
    }

    /// Accumulates one member into the aggregates. Does not touch `points`.
    pub(crate) fn add_point_stats(&mut self, point: &Point) {
        self.npoints += 1;
        self.area += point.area;
        self.color_sum += point.color;
        self.normal_sum += point.normal;
        if let Some(t) = point.timestamp {
            self.timestamp_sum += t;
            self.timestamp_count += 1;
        }
        if self.category.is_none() {
            self.category = point.category;
        }
    }

    /// Accumulates another cluster's aggregates.
    pub(crate) fn add_cluster_stats(&mut self, other: &Cluster) {
        self.npoints += other.npoints;
        self.area += other.area;
        self.color_sum += other.color_sum;
        self.normal_sum += other.normal_sum;
        self.timestamp_sum += other.timestamp_sum;
        self.timestamp_count += other.timestamp_count;
        if self.category.is_none() {
            self.category = other.category;
        }
        self.total_affinity += other.total_affinity;
    }
}

/// Two adjacent top-level clusters and the affinity of merging them.
///
/// A pair lives only while both clusters do; its position in the merge queue
/// is tracked by the queue itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pair {
    pub clusters: [ClusterKey; 2],
    pub affinity: f64,
}

impl Pair {
    /// The endpoint that is not `key`, or `None` if `key` is not an endpoint.
    pub fn other(&self, key: ClusterKey) -> Option<ClusterKey> {
        match self.clusters {
            [a, b] if a == key => Some(b),
            [a, b] if b == key => Some(a),
            _ => None,
        }
    }
}
