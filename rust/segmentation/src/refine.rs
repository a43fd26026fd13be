// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Iterative cluster refinement.
//!
//! Each iteration refits every cluster, then lets each point move to a
//! neighboring cluster that beats its current one by more than the
//! reassignment hysteresis. Iteration stops when nothing moves or at the cap.

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::error::Result;
use crate::keys::{ClusterKey, PointIndex};
use crate::segmentation::{Segmentation, SegmentationState};

/// How a refinement phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementOutcome {
    /// `max_refinement_iterations` is zero; clusters were only refitted.
    Skipped,
    /// An iteration moved no point.
    Converged { iterations: usize },
    /// Points were still moving after the last allowed iteration.
    IterationCapReached { iterations: usize },
}

impl Segmentation {
    /// Alternates refitting and reassignment until stable.
    pub fn refine_clusters(&mut self) -> Result<RefinementOutcome> {
        self.require_state(
            "refine_clusters",
            &[
                SegmentationState::Initialized,
                SegmentationState::Refining,
                SegmentationState::Merging,
            ],
        )?;
        self.state = SegmentationState::Refining;
        self.clear_pairs();

        let max_iterations = self.params.max_refinement_iterations;
        if max_iterations == 0 {
            self.refit_all();
            return Ok(RefinementOutcome::Skipped);
        }
        for iteration in 1..=max_iterations {
            self.refit_all();
            let moved = self.reassign_points();
            debug!(iteration, moved, "refinement iteration");
            if moved == 0 {
                return Ok(RefinementOutcome::Converged {
                    iterations: iteration,
                });
            }
            self.rebuild_memberships();
            self.delete_clusters();
        }
        self.refit_all();
        warn!(iterations = max_iterations, "cluster refinement hit its iteration cap");
        Ok(RefinementOutcome::IterationCapReached {
            iterations: max_iterations,
        })
    }

    /// Moves points to better neighboring clusters. Returns the number moved.
    fn reassign_points(&mut self) -> usize {
        let mut moved = 0;
        for p in 0..self.points.len() {
            let (best, affinity) = self.best_cluster(p);
            let point = &mut self.points[p];
            point.cluster_affinity = affinity;
            if best != point.cluster {
                point.cluster = best;
                moved += 1;
            }
        }
        moved
    }

    /// Best cluster for `p` among its current cluster and those of its
    /// neighbors, with its affinity.
    fn best_cluster(&self, p: PointIndex) -> (Option<ClusterKey>, f64) {
        let params = &self.params;
        let current = self.points[p].cluster;
        let current_affinity = current.map_or(0.0, |key| self.point_affinity(p, key));

        let mut best = current;
        let mut best_affinity = current_affinity;
        let mut tried: SmallVec<[ClusterKey; 8]> = SmallVec::new();
        for &q in &self.points[p].neighbors {
            let Some(candidate) = self.points[q].cluster else {
                continue;
            };
            if Some(candidate) == current || tried.contains(&candidate) {
                continue;
            }
            tried.push(candidate);
            let affinity = self.point_affinity(p, candidate);
            if affinity > 0.0
                && affinity >= params.min_point_affinity
                && affinity > current_affinity + params.reassignment_hysteresis
                && affinity > best_affinity
            {
                best = Some(candidate);
                best_affinity = affinity;
            }
        }

        if best == current
            && current.is_some()
            && params.allow_outlier_points
            && current_affinity < params.min_point_affinity
        {
            return (None, 0.0);
        }
        (best, best_affinity)
    }
}
