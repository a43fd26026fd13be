// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster initialization.
//!
//! Two strategies:
//!
//! - **Hierarchical**: every point starts as a singleton cluster and adjacent
//!   clusters are merged best-pair-first. Each merge creates a parent node
//!   owning both children, so the phase builds a merge forest; afterwards each
//!   tree is flattened into its root.
//! - **Region growing**: seeds are taken in order of local flatness and grown
//!   breadth-first over the neighbor graph while points have enough affinity.
//!
//! Either way, points left over are handed to [`Segmentation::assign_points`].

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use surfseg_geometry::PrimitiveType;
use tracing::{debug, info};

use crate::affinity::oriented_angle;
use crate::error::{Error, Result};
use crate::keys::{ClusterKey, PointIndex};
use crate::merge::MergeMode;
use crate::segmentation::{Segmentation, SegmentationState};

/// Nearest points examined when placing an unassigned point. Only those
/// already in a cluster contribute candidates.
pub const MAX_ASSIGNMENT_CANDIDATES: usize = 64;

impl Segmentation {
    /// Creates the initial clusters for `primitive_type`. Returns the number
    /// of clusters.
    pub fn initialize(&mut self, primitive_type: PrimitiveType) -> Result<usize> {
        self.require_state("initialize", &[SegmentationState::NeighborsBuilt])?;
        if primitive_type == PrimitiveType::Null {
            return Err(Error::InvalidParameter {
                name: "primitive_type",
                reason: "clusters need a point, line, plane or planar grid primitive".to_string(),
            });
        }
        self.primitive_type = primitive_type;
        self.clear_pairs();
        self.clusters.clear();
        for point in &mut self.points {
            point.cluster = None;
            point.cluster_affinity = 0.0;
        }

        if self.params.initialize_hierarchically {
            self.initialize_hierarchically();
        } else {
            self.initialize_by_region_growing();
        }
        let assigned = self.assign_unclustered();
        self.refit_all();
        self.state = SegmentationState::Initialized;

        let clusters = self.n_clusters();
        info!(clusters, assigned, "initialized clusters");
        Ok(clusters)
    }

    fn initialize_hierarchically(&mut self) {
        for p in 0..self.points.len() {
            let key = self.create_cluster(Some(p));
            self.add_point_to_cluster(key, p, 1.0);
            self.refit_cluster(key);
        }
        self.build_pairs();
        let outcome = self.run_merge_queue(MergeMode::Hierarchical);
        self.clear_pairs();
        self.flatten_hierarchy();
        debug!(
            merges = outcome.merges,
            clusters = self.n_clusters(),
            "hierarchical initialization"
        );
    }

    /// Collapses every merge tree into its root: leaf members are gathered
    /// into the root and all descendants deleted.
    pub(crate) fn flatten_hierarchy(&mut self) {
        let roots: Vec<ClusterKey> = self
            .clusters
            .iter()
            .filter(|(_, c)| c.is_top_level() && !c.is_leaf())
            .map(|(key, _)| key)
            .collect();

        for root in roots {
            let mut stack = match self.clusters.get_mut(root) {
                Some(cluster) => std::mem::take(&mut cluster.children),
                None => continue,
            };
            let mut members = Vec::new();
            let mut seed = None;
            while let Some(key) = stack.pop() {
                if let Some(node) = self.clusters.remove(key) {
                    members.extend_from_slice(&node.points);
                    stack.extend(node.children);
                    seed = match (seed, node.seed) {
                        (Some(a), Some(b)) => Some(PointIndex::min(a, b)),
                        (a, b) => a.or(b),
                    };
                }
            }
            members.sort_unstable();
            for &p in &members {
                self.points[p].cluster = Some(root);
            }
            if let Some(cluster) = self.clusters.get_mut(root) {
                cluster.points = members;
                cluster.seed = seed;
            }
            self.refit_cluster(root);
        }
    }

    fn initialize_by_region_growing(&mut self) {
        let threshold = if self.params.max_cluster_normal_angle > 0.0 {
            0.5 * self.params.max_cluster_normal_angle
        } else {
            f64::INFINITY
        };
        let mut seeds: Vec<(f64, PointIndex)> = (0..self.points.len())
            .filter_map(|p| {
                self.flatness(p)
                    .filter(|&f| f <= threshold)
                    .map(|f| (f, p))
            })
            .collect();
        seeds.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut grown = 0;
        for (_, seed) in seeds {
            if self.points[seed].cluster.is_some() {
                continue;
            }
            self.grow_region(seed);
            grown += 1;
        }
        debug!(regions = grown, "region growing initialization");
    }

    /// Mean oriented normal angle to the filtered neighbors.
    fn flatness(&self, p: PointIndex) -> Option<f64> {
        let point = &self.points[p];
        if point.neighbors.is_empty() {
            return None;
        }
        let total: f64 = point
            .neighbors
            .iter()
            .map(|&q| oriented_angle(&point.normal, &self.points[q].normal))
            .sum();
        Some(total / point.neighbors.len() as f64)
    }

    /// Grows a new cluster from `seed` breadth-first over unassigned
    /// neighbors, refitting at sizes 3, 6, 12, ...
    pub(crate) fn grow_region(&mut self, seed: PointIndex) -> ClusterKey {
        let key = self.create_cluster(Some(seed));
        self.add_point_to_cluster(key, seed, 1.0);
        self.refit_cluster(key);

        let mut next_refit = 3;
        let mut visited: FxHashSet<PointIndex> = FxHashSet::default();
        visited.insert(seed);
        let mut frontier: VecDeque<PointIndex> = VecDeque::new();
        for &q in &self.points[seed].neighbors {
            if visited.insert(q) {
                frontier.push_back(q);
            }
        }

        while let Some(q) = frontier.pop_front() {
            if self.points[q].cluster.is_some() {
                continue;
            }
            let affinity = self.point_affinity(q, key);
            if affinity <= 0.0 || affinity < self.params.min_point_affinity {
                continue;
            }
            self.add_point_to_cluster(key, q, affinity);
            if self.clusters.get(key).map_or(0, |c| c.npoints) >= next_refit {
                self.refit_cluster(key);
                next_refit *= 2;
            }
            let neighbors = self.points[q].neighbors.clone();
            for n in neighbors {
                if self.points[n].cluster.is_none() && visited.insert(n) {
                    frontier.push_back(n);
                }
            }
        }
        self.refit_cluster(key);
        key
    }

    /// Places every unassigned point. Returns the number of points placed.
    ///
    /// Candidate clusters are those of the assigned points among the
    /// [`MAX_ASSIGNMENT_CANDIDATES`] nearest, in order of distance. The first
    /// with enough affinity wins. Otherwise the point stays an outlier when
    /// allowed, joins the nearest candidate, or seeds a new region.
    pub fn assign_points(&mut self) -> Result<usize> {
        self.require_state(
            "assign_points",
            &[
                SegmentationState::Initialized,
                SegmentationState::Refining,
                SegmentationState::Merging,
                SegmentationState::Splitting,
            ],
        )?;
        let placed = self.assign_unclustered();
        self.refit_all();
        Ok(placed)
    }

    pub(crate) fn assign_unclustered(&mut self) -> usize {
        let mut placed = 0;
        let mut seeded = 0;
        for p in 0..self.points.len() {
            if self.points[p].cluster.is_some() {
                continue;
            }
            let (accepted, nearest) = self.assignment_candidates(p);
            if let Some((key, affinity)) = accepted {
                self.add_point_to_cluster(key, p, affinity);
            } else if self.params.allow_outlier_points {
                continue;
            } else if let Some((key, affinity)) = nearest {
                self.add_point_to_cluster(key, p, affinity);
            } else {
                self.grow_region(p);
                seeded += 1;
            }
            placed += 1;
        }
        if placed > 0 {
            debug!(placed, seeded, "assigned leftover points");
        }
        placed
    }

    /// Returns the first candidate cluster with enough affinity and the
    /// nearest candidate regardless of affinity.
    fn assignment_candidates(
        &self,
        p: PointIndex,
    ) -> (Option<(ClusterKey, f64)>, Option<(ClusterKey, f64)>) {
        let Some(index) = self.index.as_ref() else {
            return (None, None);
        };
        let point = &self.points[p];
        let radius = self.search_radius(point);

        let mut nearest = None;
        let mut tried: SmallVec<[ClusterKey; 8]> = SmallVec::new();
        let assigned = index.nearest_matching(&point.position, radius, MAX_ASSIGNMENT_CANDIDATES, |q| {
            self.points[q].cluster.is_some()
        });
        for (q, _) in assigned {
            let Some(key) = self.points[q].cluster else {
                continue;
            };
            if tried.contains(&key) {
                continue;
            }
            tried.push(key);
            let affinity = self.point_affinity(p, key);
            if nearest.is_none() {
                nearest = Some((key, affinity));
            }
            if affinity > 0.0 && affinity >= self.params.min_point_affinity {
                return (Some((key, affinity)), nearest);
            }
        }
        (None, nearest)
    }
}
