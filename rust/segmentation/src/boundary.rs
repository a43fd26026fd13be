// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boundary relabeling.
//!
//! Smooths jagged cluster borders on a labeling: an element with at least
//! three neighbors adopts a label held by a strict majority of them. Passes
//! repeat until a pass changes nothing. On symmetric adjacency every relabel
//! lowers the number of neighbor edges whose endpoints disagree, so the
//! process reaches a fixed point. Raw k-nearest candidate lists are not
//! symmetric and can cycle; the pass cap stops those.

use nalgebra::Vector3;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::affinity::oriented_angle;
use crate::error::Result;
use crate::keys::ClusterKey;
use crate::segmentation::{Segmentation, SegmentationState};

/// Minimum number of neighbors an element needs to be relabeled.
pub const MIN_BOUNDARY_NEIGHBORS: usize = 3;

/// Outcome of [`refine_labels`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryRefinement {
    /// Passes run, including the final pass that changed nothing.
    pub passes: usize,
    pub relabeled: usize,
    /// `false` when the pass cap was hit first.
    pub converged: bool,
}

/// Relabels elements whose neighbors mostly carry another label.
///
/// Negative labels mean "unlabeled": such elements are never relabeled and
/// their label is never adopted. A neighbor whose normal is more than
/// `max_normal_angle` away (oriented) counts as unlabeled; `0` disables the
/// gate, as does an empty `normals`.
pub fn refine_labels<N: AsRef<[usize]>>(
    labels: &mut [i32],
    neighbors: &[N],
    normals: &[Vector3<f64>],
    max_normal_angle: f64,
    max_passes: usize,
) -> BoundaryRefinement {
    let max_passes = max_passes.max(1);
    let mut result = BoundaryRefinement {
        passes: 0,
        relabeled: 0,
        converged: false,
    };
    let mut counts: SmallVec<[(i32, usize); 8]> = SmallVec::new();

    while result.passes < max_passes {
        result.passes += 1;
        let mut changed = 0;
        for i in 0..labels.len() {
            let own = labels[i];
            if own < 0 {
                continue;
            }
            let Some(list) = neighbors.get(i).map(AsRef::as_ref) else {
                continue;
            };
            if list.len() < MIN_BOUNDARY_NEIGHBORS {
                continue;
            }

            counts.clear();
            for &j in list {
                let Some(&label) = labels.get(j) else {
                    continue;
                };
                if label < 0 {
                    continue;
                }
                if max_normal_angle > 0.0 {
                    if let (Some(ni), Some(nj)) = (normals.get(i), normals.get(j)) {
                        if oriented_angle(ni, nj) > max_normal_angle {
                            continue;
                        }
                    }
                }
                match counts.iter_mut().find(|(l, _)| *l == label) {
                    Some(entry) => entry.1 += 1,
                    None => counts.push((label, 1)),
                }
            }

            if let Some(&(label, _)) = counts
                .iter()
                .find(|&&(label, count)| label != own && 2 * count > list.len())
            {
                labels[i] = label;
                changed += 1;
            }
        }
        result.relabeled += changed;
        if changed == 0 {
            result.converged = true;
            break;
        }
    }
    result
}

impl Segmentation {
    /// Runs [`refine_labels`] over the cluster labeling, using the unfiltered
    /// candidate graph and `max_pair_normal_angle` as the normal gate, and
    /// applies the result to cluster membership.
    pub fn refine_boundaries(&mut self) -> Result<BoundaryRefinement> {
        self.require_state(
            "refine_boundaries",
            &[
                SegmentationState::Initialized,
                SegmentationState::Refining,
                SegmentationState::Merging,
                SegmentationState::Splitting,
                SegmentationState::BoundaryRefined,
            ],
        )?;
        self.clear_pairs();

        let keys = self.ordered_keys();
        let lookup: FxHashMap<ClusterKey, i32> = keys
            .iter()
            .enumerate()
            .map(|(i, &key)| (key, i as i32))
            .collect();
        let mut labels: Vec<i32> = self
            .points
            .iter()
            .map(|p| p.cluster.and_then(|key| lookup.get(&key).copied()).unwrap_or(-1))
            .collect();
        let normals: Vec<Vector3<f64>> = self.points.iter().map(|p| p.normal).collect();

        let result = refine_labels(
            &mut labels,
            &self.geometric_neighbors,
            &normals,
            self.params.max_pair_normal_angle,
            self.params.max_boundary_refinement_passes,
        );

        if result.relabeled > 0 {
            for (point, &label) in self.points.iter_mut().zip(&labels) {
                if let Some(&key) = usize::try_from(label).ok().and_then(|l| keys.get(l)) {
                    point.cluster = Some(key);
                }
            }
            self.rebuild_memberships();
            self.delete_clusters();
            self.refit_all();
        }
        if !result.converged {
            warn!(passes = result.passes, "boundary refinement hit its pass cap");
        }
        debug!(
            passes = result.passes,
            relabeled = result.relabeled,
            "refined cluster boundaries"
        );
        self.state = SegmentationState::BoundaryRefined;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_face_with_distinct_neighbors_is_stable() {
        // Center triangle 0 touches three triangles that touch nothing else.
        let neighbors: Vec<Vec<usize>> = vec![vec![1, 2, 3], vec![0], vec![0], vec![0]];
        let mut labels = vec![0, 1, 2, 3];
        let result = refine_labels(&mut labels, &neighbors, &[], 0.0, 100);
        assert_eq!(
            result,
            BoundaryRefinement {
                passes: 1,
                relabeled: 0,
                converged: true
            }
        );
        assert_eq!(labels, vec![0, 1, 2, 3]);
    }

    #[test]
    fn majority_label_is_adopted() {
        let neighbors: Vec<Vec<usize>> = vec![vec![1, 2, 3], vec![0], vec![0], vec![0]];
        let mut labels = vec![0, 1, 1, 2];
        let result = refine_labels(&mut labels, &neighbors, &[], 0.0, 100);
        assert_eq!(labels, vec![1, 1, 1, 2]);
        assert_eq!(result.relabeled, 1);
        assert_eq!(result.passes, 2);
        assert!(result.converged);
    }

    #[test]
    fn unlabeled_elements_are_never_touched_or_adopted() {
        let neighbors: Vec<Vec<usize>> = vec![vec![1, 2, 3], vec![0, 2, 3], vec![0, 1, 3], vec![0, 1, 2]];
        let mut labels = vec![-1, -1, -1, 4];
        refine_labels(&mut labels, &neighbors, &[], 0.0, 100);
        assert_eq!(labels, vec![-1, -1, -1, 4]);
    }

    #[test]
    fn normal_gate_discounts_neighbors() {
        let neighbors: Vec<Vec<usize>> = vec![vec![1, 2, 3], vec![0], vec![0], vec![0]];
        let normals = vec![Vector3::z(), Vector3::x(), Vector3::x(), Vector3::z()];
        let mut labels = vec![0, 1, 1, 2];
        let result = refine_labels(&mut labels, &neighbors, &normals, 0.5, 100);
        assert_eq!(labels, vec![0, 1, 1, 2]);
        assert_eq!(result.relabeled, 0);
    }

    #[test]
    fn refinement_is_idempotent() {
        // A 5×5 image labeled by column, with one stray label in the middle.
        let (w, h) = (5usize, 5usize);
        let mut neighbors = Vec::new();
        for i in 0..w * h {
            let (x, y) = (i % w, i / w);
            let mut list = Vec::new();
            if x > 0 {
                list.push(i - 1);
            }
            if x + 1 < w {
                list.push(i + 1);
            }
            if y > 0 {
                list.push(i - w);
            }
            if y + 1 < h {
                list.push(i + w);
            }
            neighbors.push(list);
        }
        let mut labels: Vec<i32> = (0..w * h).map(|i| if i % w < 3 { 0 } else { 1 }).collect();
        labels[12] = 1;

        let first = refine_labels(&mut labels, &neighbors, &[], 0.0, 100);
        assert!(first.converged);
        assert_eq!(labels[12], 0);
        let snapshot = labels.clone();

        let second = refine_labels(&mut labels, &neighbors, &[], 0.0, 100);
        assert_eq!(second.relabeled, 0);
        assert_eq!(second.passes, 1);
        assert_eq!(labels, snapshot);
    }

    #[test]
    fn pass_cap_is_reported() {
        // Two elements outvoted by their neighbors, with a single pass allowed.
        let neighbors: Vec<Vec<usize>> = vec![vec![2, 3, 4], vec![5, 6, 7], vec![], vec![], vec![], vec![], vec![], vec![]];
        let mut labels = vec![0, 1, 1, 1, 1, 0, 0, 0];
        let result = refine_labels(&mut labels, &neighbors, &[], 0.0, 1);
        assert_eq!(result.passes, 1);
        assert_eq!(result.relabeled, 2);
        assert!(!result.converged);
    }

    #[test]
    fn one_sided_adjacency_can_cycle_until_the_cap() {
        // Each of 0, 1, 2 lists the next one plus two fixed anchors labeled
        // 0 and 1, so each copies its successor's label and nobody listens
        // back.
        let neighbors: Vec<Vec<usize>> = vec![vec![1, 3, 4], vec![2, 3, 4], vec![0, 3, 4], vec![], vec![]];
        let mut labels = vec![0, 0, 1, 0, 1];
        let result = refine_labels(&mut labels, &neighbors, &[], 0.0, 10);
        assert_eq!(
            result,
            BoundaryRefinement {
                passes: 10,
                relabeled: 29,
                converged: false
            }
        );
        assert_eq!(&labels[3..], &[0, 1]);
    }
}
