// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster merging, small-cluster absorption, and deletion.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use surfseg_geometry::Primitive;
use tracing::{debug, info};

use crate::cluster::Cluster;
use crate::error::Result;
use crate::keys::ClusterKey;
use crate::segmentation::{Segmentation, SegmentationState};

/// Counters reported by a merge phase.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MergeOutcome {
    pub merges: usize,
    /// Merges below `min_pair_affinity`, made to respect `max_clusters`.
    pub forced_merges: usize,
    /// Lowest affinity among the merged pairs.
    pub lowest_affinity: Option<f64>,
}

impl MergeOutcome {
    fn record(&mut self, affinity: f64, forced: bool) {
        self.merges += 1;
        if forced {
            self.forced_merges += 1;
        }
        self.lowest_affinity = Some(self.lowest_affinity.map_or(affinity, |low| low.min(affinity)));
    }

    /// Adds the counters of a later phase.
    pub fn accumulate(&mut self, other: &MergeOutcome) {
        self.merges += other.merges;
        self.forced_merges += other.forced_merges;
        self.lowest_affinity = match (self.lowest_affinity, other.lowest_affinity) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
}

/// What a merge does with the two clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MergeMode {
    /// The smaller cluster is absorbed into the larger.
    Absorb,
    /// A new parent cluster adopts both.
    Hierarchical,
}

impl Segmentation {
    /// Merges adjacent clusters best-pair-first while their affinity reaches
    /// `min_pair_affinity`, or below it while the cluster count exceeds
    /// `max_clusters`. Never goes below `min_clusters`.
    pub fn merge_clusters(&mut self) -> Result<MergeOutcome> {
        self.require_state(
            "merge_clusters",
            &[
                SegmentationState::Initialized,
                SegmentationState::Refining,
                SegmentationState::Merging,
            ],
        )?;
        self.state = SegmentationState::Merging;

        let before = self.n_clusters();
        self.build_pairs();
        let outcome = self.run_merge_queue(MergeMode::Absorb);
        self.clear_pairs();

        info!(
            before,
            after = self.n_clusters(),
            merges = outcome.merges,
            forced = outcome.forced_merges,
            "merged clusters"
        );
        Ok(outcome)
    }

    /// Pops pairs from the queue and merges them until the best remaining
    /// pair does not qualify or the count reaches its floor.
    pub(crate) fn run_merge_queue(&mut self, mode: MergeMode) -> MergeOutcome {
        let floor = self.params.min_clusters.max(1);
        let min_affinity = self.params.min_pair_affinity;
        let max_clusters = self.params.max_clusters;

        let mut outcome = MergeOutcome::default();
        let mut count = self.n_clusters();
        while count > floor {
            let Some((pair_key, affinity)) = self.queue.peek() else {
                break;
            };
            let qualifies = affinity > 0.0 && affinity >= min_affinity;
            let forced = !qualifies && max_clusters > 0 && count > max_clusters;
            if !qualifies && !forced {
                break;
            }
            self.queue.pop();
            let Some(pair) = self.pairs.get(pair_key).copied() else {
                continue;
            };
            let [a, b] = pair.clusters;

            let mut partners = self.unlink_pairs(a);
            partners.extend(self.unlink_pairs(b));
            let merged = match mode {
                MergeMode::Absorb => {
                    let (survivor, absorbed) = self.survivor_order(a, b);
                    if !self.absorb_cluster(survivor, absorbed) {
                        continue;
                    }
                    survivor
                }
                MergeMode::Hierarchical => match self.create_parent(a, b) {
                    Some(parent) => parent,
                    None => continue,
                },
            };

            partners.sort_unstable();
            partners.dedup();
            for other in partners {
                if other != a && other != b {
                    self.link_pair(merged, other);
                }
            }
            count -= 1;
            outcome.record(affinity, forced);
        }
        outcome
    }

    /// Orders two clusters as (survivor, absorbed): the larger survives, ties
    /// go to the lower key.
    fn survivor_order(&self, a: ClusterKey, b: ClusterKey) -> (ClusterKey, ClusterKey) {
        let na = self.clusters.get(a).map_or(0, Cluster::npoints);
        let nb = self.clusters.get(b).map_or(0, Cluster::npoints);
        if na > nb || (na == nb && a < b) {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Moves every member of `absorbed` into `survivor` and merges their
    /// primitives. Returns `false` if either key is stale.
    pub(crate) fn absorb_cluster(&mut self, survivor: ClusterKey, absorbed: ClusterKey) -> bool {
        if survivor == absorbed || !self.clusters.contains_key(survivor) {
            return false;
        }
        self.unlink_pairs(absorbed);
        let Some(gone) = self.clusters.remove(absorbed) else {
            return false;
        };
        for &p in &gone.points {
            self.points[p].cluster = Some(survivor);
        }

        let Some(target) = self.clusters.get(survivor) else {
            return false;
        };
        let merged = Primitive::merge(
            &target.primitive,
            &gone.primitive,
            target.npoints as f64,
            gone.npoints as f64,
        );
        let normal_sum = target.normal_sum + gone.normal_sum;
        let primitive = self.conform_primitive(merged, &normal_sum, None);

        if let Some(target) = self.clusters.get_mut(survivor) {
            target.points.extend_from_slice(&gone.points);
            target.add_cluster_stats(&gone);
            target.primitive = primitive;
        }
        true
    }

    /// Creates a parent node owning `a` and `b`.
    pub(crate) fn create_parent(&mut self, a: ClusterKey, b: ClusterKey) -> Option<ClusterKey> {
        let (ca, cb) = (self.clusters.get(a)?, self.clusters.get(b)?);
        let merged = Primitive::merge(&ca.primitive, &cb.primitive, ca.npoints as f64, cb.npoints as f64);
        let mut parent = Cluster::new(None);
        parent.add_cluster_stats(ca);
        parent.add_cluster_stats(cb);
        parent.children = vec![a, b];
        parent.primitive = self.conform_primitive(merged, &parent.normal_sum, None);

        let key = self.clusters.insert(parent);
        for child in [a, b] {
            if let Some(cluster) = self.clusters.get_mut(child) {
                cluster.parent = Some(key);
            }
        }
        Some(key)
    }

    fn is_small(&self, cluster: &Cluster) -> bool {
        let params = &self.params;
        cluster.npoints < params.min_cluster_points
            || (params.min_cluster_area > 0.0 && cluster.area < params.min_cluster_area)
            || (params.min_cluster_coverage > 0.0
                && (cluster.npoints as f64) < params.min_cluster_coverage * self.points.len() as f64)
    }

    /// Neighboring top-level clusters of `key` with the number of neighbor
    /// edges to each. Falls back to the unfiltered candidates when the
    /// filtered graph has no edge leaving the cluster.
    fn adjacent_clusters(&self, key: ClusterKey) -> FxHashMap<ClusterKey, usize> {
        let mut adjacent: FxHashMap<ClusterKey, usize> = FxHashMap::default();
        let Some(cluster) = self.clusters.get(key) else {
            return adjacent;
        };
        for &p in &cluster.points {
            for &q in &self.points[p].neighbors {
                if let Some(other) = self.points[q].cluster.filter(|&o| o != key) {
                    *adjacent.entry(other).or_default() += 1;
                }
            }
        }
        if adjacent.is_empty() {
            for &p in &cluster.points {
                for &q in self.geometric_neighbors.get(p).into_iter().flatten() {
                    if let Some(other) = self.points[q].cluster.filter(|&o| o != key) {
                        *adjacent.entry(other).or_default() += 1;
                    }
                }
            }
        }
        adjacent
    }

    /// Absorbs clusters below the size, area, or coverage minimum into their
    /// best neighbor, smallest first, repeating until nothing changes. A small
    /// cluster without neighbors is dissolved into outliers when outliers are
    /// allowed and kept otherwise. Returns the number of clusters removed.
    pub fn merge_small_clusters(&mut self) -> Result<usize> {
        self.require_state(
            "merge_small_clusters",
            &[
                SegmentationState::Initialized,
                SegmentationState::Refining,
                SegmentationState::Merging,
                SegmentationState::Splitting,
            ],
        )?;
        self.clear_pairs();

        let mut absorbed = 0;
        let mut dissolved = 0;
        loop {
            let mut small: Vec<(usize, ClusterKey)> = self
                .clusters
                .iter()
                .filter(|(_, c)| c.is_top_level() && self.is_small(c))
                .map(|(key, c)| (c.npoints, key))
                .collect();
            small.sort_unstable();

            let mut changed = 0;
            for (_, key) in small {
                match self.clusters.get(key) {
                    Some(cluster) if self.is_small(cluster) => {}
                    _ => continue,
                }
                let adjacent = self.adjacent_clusters(key);
                let target = adjacent
                    .iter()
                    .map(|(&other, &edges)| (self.pair_affinity(key, other), edges, other))
                    .max_by(|x, y| {
                        x.0.total_cmp(&y.0)
                            .then(x.1.cmp(&y.1))
                            .then(y.2.cmp(&x.2))
                    })
                    .map(|(_, _, other)| other);

                match target {
                    Some(target) => {
                        if self.absorb_cluster(target, key) {
                            absorbed += 1;
                            changed += 1;
                        }
                    }
                    None if self.params.allow_outlier_points => {
                        self.remove_cluster(key);
                        dissolved += 1;
                        changed += 1;
                    }
                    None => {}
                }
            }
            if changed == 0 {
                break;
            }
        }

        if absorbed + dissolved > 0 {
            self.refit_all();
        }
        debug!(absorbed, dissolved, clusters = self.n_clusters(), "merged small clusters");
        Ok(absorbed + dissolved)
    }

    /// Deletes every top-level leaf cluster without members. Returns the
    /// number deleted.
    pub fn delete_clusters(&mut self) -> usize {
        let empty: SmallVec<[ClusterKey; 8]> = self
            .clusters
            .iter()
            .filter(|(_, c)| c.is_top_level() && c.is_leaf() && c.points.is_empty())
            .map(|(key, _)| key)
            .collect();
        for &key in &empty {
            self.remove_cluster(key);
        }
        if !empty.is_empty() {
            debug!(deleted = empty.len(), "deleted empty clusters");
        }
        empty.len()
    }
}
