// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read-only views of a segmentation result.
//!
//! Labels are positions in the output order of [`Segmentation::ordered_keys`],
//! which matches `Cluster::index` once the segmentation is finalized.

use rustc_hash::FxHashMap;
use surfseg_geometry::Primitive;

use crate::cluster::Cluster;
use crate::keys::ClusterKey;
use crate::report::ClusterRecord;
use crate::segmentation::Segmentation;

/// Source indices of one cluster, or of the unclustered leftovers.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfelGroup {
    pub name: String,
    pub source_indices: Vec<usize>,
    /// `None` for the unclustered group.
    pub primitive: Option<Primitive>,
}

impl Segmentation {
    /// Top-level clusters in output order.
    pub fn clusters(&self) -> Vec<(ClusterKey, &Cluster)> {
        self.ordered_keys()
            .into_iter()
            .filter_map(|key| self.clusters.get(key).map(|c| (key, c)))
            .collect()
    }

    fn label_lookup(&self) -> FxHashMap<ClusterKey, usize> {
        self.ordered_keys()
            .into_iter()
            .enumerate()
            .map(|(label, key)| (key, label))
            .collect()
    }

    /// Cluster label of every point, `None` for outliers.
    pub fn point_labels(&self) -> Vec<Option<usize>> {
        let lookup = self.label_lookup();
        self.points
            .iter()
            .map(|p| p.cluster.and_then(|key| lookup.get(&key).copied()))
            .collect()
    }

    /// Cluster label per external source index (pixel or face id), `-1` for
    /// sources that were skipped at load time or left unclustered. Points
    /// whose source index is `>= n_sources` are ignored.
    pub fn source_labels(&self, n_sources: usize) -> Vec<i32> {
        let mut labels = vec![-1; n_sources];
        for (point, label) in self.points.iter().zip(self.point_labels()) {
            if let (Some(slot), Some(label)) = (labels.get_mut(point.source_index), label) {
                *slot = label as i32;
            }
        }
        labels
    }

    /// Source indices of a cluster's members, ascending.
    pub fn cluster_source_indices(&self, key: ClusterKey) -> Vec<usize> {
        let Some(cluster) = self.clusters.get(key) else {
            return Vec::new();
        };
        let mut indices: Vec<usize> = cluster
            .points
            .iter()
            .map(|&p| self.points[p].source_index)
            .collect();
        indices.sort_unstable();
        indices
    }

    /// One group per cluster in output order, then an `"unclustered"` group
    /// holding the source indices of every outlier.
    pub fn surfel_groups(&self) -> Vec<SurfelGroup> {
        let mut groups: Vec<SurfelGroup> = self
            .clusters()
            .into_iter()
            .enumerate()
            .map(|(label, (key, cluster))| SurfelGroup {
                name: format!("cluster_{label}"),
                source_indices: self.cluster_source_indices(key),
                primitive: Some(cluster.primitive.clone()),
            })
            .collect();

        let mut leftovers: Vec<usize> = self
            .points
            .iter()
            .filter(|p| p.cluster.is_none())
            .map(|p| p.source_index)
            .collect();
        leftovers.sort_unstable();
        groups.push(SurfelGroup {
            name: "unclustered".to_string(),
            source_indices: leftovers,
            primitive: None,
        });
        groups
    }

    /// Report records for every cluster in output order.
    pub fn cluster_records(&self) -> Vec<ClusterRecord> {
        self.clusters()
            .into_iter()
            .enumerate()
            .map(|(label, (_, cluster))| ClusterRecord::from_cluster(label, cluster))
            .collect()
    }
}
