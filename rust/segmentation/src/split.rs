// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Splitting of clusters whose members are not connected.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::debug;

use crate::error::Result;
use crate::keys::{ClusterKey, PointIndex};
use crate::segmentation::{Segmentation, SegmentationState};

impl Segmentation {
    /// Splits every cluster into the connected components of the neighbor
    /// graph restricted to its members. The largest component stays in the
    /// original cluster; each other component becomes a new cluster. Returns
    /// the number of clusters created.
    pub fn split_clusters(&mut self) -> Result<usize> {
        self.require_state(
            "split_clusters",
            &[
                SegmentationState::Initialized,
                SegmentationState::Refining,
                SegmentationState::Merging,
                SegmentationState::Splitting,
            ],
        )?;
        self.state = SegmentationState::Splitting;
        self.clear_pairs();

        let keys: Vec<ClusterKey> = self
            .clusters
            .iter()
            .filter(|(_, c)| c.is_top_level() && c.points.len() > 1)
            .map(|(key, _)| key)
            .collect();

        let mut created = 0;
        for key in keys {
            let mut components = match self.clusters.get(key) {
                Some(cluster) => self.connected_components(&cluster.points),
                None => continue,
            };
            if components.len() < 2 {
                continue;
            }
            // Largest first; ties by smallest member.
            components.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));

            let mut rest = components.split_off(1);
            let kept = components.remove(0);
            if let Some(cluster) = self.clusters.get_mut(key) {
                cluster.points = kept;
            }
            self.refit_cluster(key);

            for component in rest.drain(..) {
                let new_key = self.create_cluster(component.first().copied());
                for &p in &component {
                    self.points[p].cluster = Some(new_key);
                }
                if let Some(cluster) = self.clusters.get_mut(new_key) {
                    cluster.points = component;
                }
                self.refit_cluster(new_key);
                created += 1;
            }
        }
        debug!(created, clusters = self.n_clusters(), "split disconnected clusters");
        Ok(created)
    }

    /// Connected components of `members` over the filtered neighbor graph,
    /// each sorted by point index.
    fn connected_components(&self, members: &[PointIndex]) -> Vec<Vec<PointIndex>> {
        let member_set: FxHashSet<PointIndex> = members.iter().copied().collect();

        // Edges are followed in both directions.
        let mut adjacency: FxHashMap<PointIndex, SmallVec<[PointIndex; 8]>> = FxHashMap::default();
        for &p in members {
            for &q in &self.points[p].neighbors {
                if q != p && member_set.contains(&q) {
                    adjacency.entry(p).or_default().push(q);
                    adjacency.entry(q).or_default().push(p);
                }
            }
        }

        let mut sorted: Vec<PointIndex> = members.to_vec();
        sorted.sort_unstable();
        let mut visited: FxHashSet<PointIndex> = FxHashSet::default();
        let mut components = Vec::new();
        for &start in &sorted {
            if !visited.insert(start) {
                continue;
            }
            let mut component = vec![start];
            let mut stack = vec![start];
            while let Some(p) = stack.pop() {
                for &q in adjacency.get(&p).into_iter().flatten() {
                    if visited.insert(q) {
                        component.push(q);
                        stack.push(q);
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Connectivity, ElementBuffers};
    use crate::params::SegmentationParams;
    use nalgebra::{Point3, Vector3};
    use surfseg_geometry::PrimitiveType;

    #[test]
    fn disconnected_members_become_separate_clusters() {
        // Three collinear runs of a 9×1 image separated by one-pixel gaps
        // of unrelated normals.
        let width = 9;
        let positions = (0..width).map(|i| Point3::new(i as f64 * 0.1, 0.0, 0.0)).collect();
        let mut normals = vec![Vector3::z(); width];
        normals[3] = Vector3::x();
        normals[5] = Vector3::x();
        let buffers = ElementBuffers::new(positions)
            .with_normals(normals)
            .with_connectivity(Connectivity::ImageGrid {
                width,
                height: 1,
                diagonal: false,
            });
        let mut seg = Segmentation::new(SegmentationParams::default()).unwrap();
        seg.load_points(&buffers).unwrap();
        seg.build_neighbors().unwrap();
        seg.initialize(PrimitiveType::Plane).unwrap();

        // Force the runs 0..3, 4 and 6..9 into one cluster.
        let key = seg.points()[0].cluster.unwrap();
        for p in [0, 1, 2, 4, 6, 7, 8] {
            seg.points[p].cluster = Some(key);
        }
        seg.rebuild_memberships();
        seg.delete_clusters();
        seg.refit_all();

        let created = seg.split_clusters().unwrap();
        assert_eq!(created, 2);
        assert_eq!(seg.cluster(key).unwrap().points, vec![0, 1, 2]);
        let four = seg.points()[4].cluster.unwrap();
        let tail = seg.points()[6].cluster.unwrap();
        assert_ne!(four, key);
        assert_ne!(tail, key);
        assert_ne!(four, tail);
        assert_eq!(seg.cluster(tail).unwrap().points, vec![6, 7, 8]);
    }
}
