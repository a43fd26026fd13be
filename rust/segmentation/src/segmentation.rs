// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The segmentation arena and pipeline driver.
//!
//! [`Segmentation`] owns the point arena, the spatial index, the cluster and
//! pair slot maps, and the merge queue. The pipeline steps are implemented
//! across several files as separate `impl Segmentation` blocks:
//!
//! - `neighbors.rs`: neighbor graph construction
//! - `affinity.rs`: point/cluster and cluster/cluster affinities
//! - `initialize.rs`: hierarchical and region-growing initialization
//! - `refine.rs`: iterative reassignment
//! - `merge.rs`: pair merging, small-cluster absorption, deletion
//! - `split.rs`: connected-component splitting
//! - `boundary.rs`: boundary relabeling
//! - `output.rs`: labels and groups
//!
//! Steps must run in order; each checks the [`SegmentationState`] and fails
//! with [`Error::InvalidState`] when called out of turn.

use nalgebra::{Point3, Vector3};
use rustc_hash::FxHashSet;
use slotmap::SlotMap;
use smallvec::SmallVec;
use surfseg_geometry::{Primitive, PrimitiveType, SpatialIndex};
use tracing::{debug, info};

use crate::boundary::BoundaryRefinement;
use crate::cluster::{Cluster, Pair};
use crate::element::{Connectivity, ElementSource};
use crate::error::{Error, Result};
use crate::heap::IndexedHeap;
use crate::keys::{ClusterKey, PairKey, PointIndex};
use crate::merge::MergeOutcome;
use crate::params::SegmentationParams;
use crate::point::Point;
use crate::refine::RefinementOutcome;

/// Pipeline position of a [`Segmentation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentationState {
    Empty,
    PointsLoaded,
    NeighborsBuilt,
    Initialized,
    Refining,
    Merging,
    Splitting,
    BoundaryRefined,
    Finalized,
}

/// Result of a full [`Segmentation::create_clusters`] run.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationSummary {
    pub points: usize,
    pub clusters: usize,
    pub unassigned_points: usize,
    /// Outcome of the last refinement round.
    pub refinement: RefinementOutcome,
    pub merges: MergeOutcome,
    pub small_clusters_absorbed: usize,
    pub clusters_split: usize,
    pub boundary: Option<BoundaryRefinement>,
}

/// Clustering state over one set of input elements.
#[derive(Debug)]
pub struct Segmentation {
    pub(crate) params: SegmentationParams,
    pub(crate) points: Vec<Point>,
    /// Unfiltered neighbor candidates, used by boundary refinement.
    pub(crate) geometric_neighbors: Vec<SmallVec<[PointIndex; 8]>>,
    pub(crate) connectivity: Connectivity,
    pub(crate) index: Option<SpatialIndex>,
    pub(crate) clusters: SlotMap<ClusterKey, Cluster>,
    pub(crate) pairs: SlotMap<PairKey, Pair>,
    pub(crate) queue: IndexedHeap<PairKey>,
    pub(crate) primitive_type: PrimitiveType,
    pub(crate) state: SegmentationState,
}

impl Segmentation {
    /// Creates an empty segmentation after validating `params`.
    pub fn new(params: SegmentationParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            points: Vec::new(),
            geometric_neighbors: Vec::new(),
            connectivity: Connectivity::Spatial,
            index: None,
            clusters: SlotMap::with_key(),
            pairs: SlotMap::with_key(),
            queue: IndexedHeap::new(),
            primitive_type: PrimitiveType::Plane,
            state: SegmentationState::Empty,
        })
    }

    /// Loads elements into the point arena and builds the spatial index.
    ///
    /// Elements with a non-finite position are skipped; explicit adjacency is
    /// remapped onto the surviving points. Nothing is modified unless loading
    /// succeeds. Returns the number of points loaded.
    pub fn load_points<S: ElementSource + ?Sized>(&mut self, source: &S) -> Result<usize> {
        self.require_state("load_points", &[SegmentationState::Empty])?;
        source.validate()?;

        let n = source.len();
        let mut remap: Vec<Option<PointIndex>> = Vec::new();
        remap.try_reserve_exact(n)?;
        let mut points: Vec<Point> = Vec::new();
        points.try_reserve_exact(n)?;

        for i in 0..n {
            let position = source.position(i);
            if !(position.x.is_finite() && position.y.is_finite() && position.z.is_finite()) {
                remap.push(None);
                continue;
            }
            remap.push(Some(points.len()));
            let [radius1, radius2] = source.radii(i);
            let mut point = Point::new(position);
            point.normal = source.normal(i);
            point.tangent = source.tangent(i);
            point.radius1 = radius1;
            point.radius2 = radius2;
            point.area = source.area(i);
            point.color = source.color(i);
            point.depth = source.depth(i);
            point.timestamp = source.timestamp(i);
            point.category = source.category(i);
            point.category_confidence = source.category_confidence(i);
            point.identifier = source.identifier(i);
            point.flags = source.flags(i);
            point.source_index = source.source_index(i);
            points.push(point);
        }
        if points.is_empty() {
            return Err(Error::EmptyInput);
        }

        let connectivity = match source.connectivity() {
            Connectivity::ImageGrid {
                width,
                height,
                diagonal,
            } => {
                let Some(pixels) = width.checked_mul(height) else {
                    return Err(Error::InvalidInput(format!(
                        "{width}x{height} image has too many pixels"
                    )));
                };
                if let Some(point) = points.iter().find(|p| p.source_index >= pixels) {
                    return Err(Error::InvalidInput(format!(
                        "pixel index {} outside {width}x{height} image",
                        point.source_index
                    )));
                }
                Connectivity::ImageGrid {
                    width,
                    height,
                    diagonal,
                }
            }
            Connectivity::Explicit(lists) => {
                let mut remapped = Vec::new();
                remapped.try_reserve_exact(points.len())?;
                for (element, list) in lists.iter().enumerate() {
                    if remap.get(element).copied().flatten().is_none() {
                        continue;
                    }
                    let mut mapped = Vec::with_capacity(list.len());
                    for &other in list {
                        match remap.get(other) {
                            Some(Some(q)) => mapped.push(*q),
                            Some(None) => {}
                            None => {
                                return Err(Error::InvalidInput(format!(
                                    "element {element} lists neighbor {other} of {n}"
                                )))
                            }
                        }
                    }
                    remapped.push(mapped);
                }
                if remapped.len() != points.len() {
                    return Err(Error::InvalidInput(format!(
                        "adjacency covers {} of {n} elements",
                        lists.len()
                    )));
                }
                Connectivity::Explicit(remapped)
            }
            Connectivity::Spatial => Connectivity::Spatial,
        };

        let index = SpatialIndex::build(&points, |p| p.position)
            .ok_or(Error::IndexBuildFailure(points.len()))?;

        let loaded = points.len();
        if loaded < n {
            debug!(skipped = n - loaded, "skipped elements with non-finite positions");
        }
        info!(points = loaded, "loaded points");

        self.points = points;
        self.connectivity = connectivity;
        self.index = Some(index);
        self.state = SegmentationState::PointsLoaded;
        Ok(loaded)
    }

    /// Runs the whole pipeline and fits primitives of `primitive_type`.
    ///
    /// Neighbors are built first when not already present. The result is
    /// finalized: clusters ordered by descending size.
    pub fn create_clusters(&mut self, primitive_type: PrimitiveType) -> Result<SegmentationSummary> {
        match self.state {
            SegmentationState::Empty => return Err(Error::EmptyInput),
            SegmentationState::PointsLoaded => {
                self.build_neighbors()?;
            }
            SegmentationState::NeighborsBuilt => {}
            state => {
                return Err(Error::InvalidState {
                    operation: "create_clusters",
                    state,
                })
            }
        }
        info!(
            points = self.points.len(),
            primitive = %primitive_type,
            hierarchical = self.params.initialize_hierarchically,
            "creating clusters"
        );

        self.initialize(primitive_type)?;
        let mut refinement = self.refine_clusters()?;

        let mut merges = MergeOutcome::default();
        for _ in 0..self.params.max_reassignment_iterations.max(1) {
            let outcome = self.merge_clusters()?;
            merges.accumulate(&outcome);
            if outcome.merges == 0 {
                break;
            }
            refinement = self.refine_clusters()?;
        }

        let mut small_clusters_absorbed = self.merge_small_clusters()?;
        let mut clusters_split = 0;
        if self.params.split_disconnected_clusters {
            clusters_split = self.split_clusters()?;
            if clusters_split > 0 {
                small_clusters_absorbed += self.merge_small_clusters()?;
            }
        }
        let boundary = if self.params.refine_boundaries {
            Some(self.refine_boundaries()?)
        } else {
            None
        };
        self.finalize()?;

        let summary = SegmentationSummary {
            points: self.points.len(),
            clusters: self.n_clusters(),
            unassigned_points: self.unassigned_points(),
            refinement,
            merges,
            small_clusters_absorbed,
            clusters_split,
            boundary,
        };
        info!(
            clusters = summary.clusters,
            unassigned = summary.unassigned_points,
            merges = summary.merges.merges,
            "segmentation finished"
        );
        Ok(summary)
    }

    /// Refits every cluster and fixes the output order: descending point
    /// count, ties broken by smallest member index.
    pub fn finalize(&mut self) -> Result<()> {
        self.require_state(
            "finalize",
            &[
                SegmentationState::Initialized,
                SegmentationState::Refining,
                SegmentationState::Merging,
                SegmentationState::Splitting,
                SegmentationState::BoundaryRefined,
                SegmentationState::Finalized,
            ],
        )?;
        self.clear_pairs();
        self.delete_clusters();
        self.refit_all();
        for (index, key) in self.ordered_keys().into_iter().enumerate() {
            if let Some(cluster) = self.clusters.get_mut(key) {
                cluster.index = index;
                cluster.points.sort_unstable();
            }
        }
        self.state = SegmentationState::Finalized;
        Ok(())
    }

    pub fn params(&self) -> &SegmentationParams {
        &self.params
    }

    pub fn state(&self) -> SegmentationState {
        self.state
    }

    /// Primitive type clusters are fitted with.
    pub fn primitive_type(&self) -> PrimitiveType {
        self.primitive_type
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn point(&self, index: PointIndex) -> Option<&Point> {
        self.points.get(index)
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn spatial_index(&self) -> Option<&SpatialIndex> {
        self.index.as_ref()
    }

    /// Unfiltered neighbor candidates of each point.
    pub fn geometric_neighbors(&self) -> &[SmallVec<[PointIndex; 8]>] {
        &self.geometric_neighbors
    }

    /// Number of top-level clusters.
    pub fn n_clusters(&self) -> usize {
        self.clusters.values().filter(|c| c.is_top_level()).count()
    }

    pub fn cluster(&self, key: ClusterKey) -> Option<&Cluster> {
        self.clusters.get(key)
    }

    /// Top-level cluster keys in output order.
    pub fn ordered_keys(&self) -> Vec<ClusterKey> {
        let mut keys: Vec<(ClusterKey, usize, PointIndex)> = self
            .clusters
            .iter()
            .filter(|(_, c)| c.is_top_level())
            .map(|(k, c)| {
                let first = c.points.iter().copied().min().unwrap_or(usize::MAX);
                (k, c.npoints, first)
            })
            .collect();
        keys.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)).then(a.0.cmp(&b.0)));
        keys.into_iter().map(|(k, _, _)| k).collect()
    }

    /// Points not assigned to any cluster.
    pub fn unassigned_points(&self) -> usize {
        self.points.iter().filter(|p| p.cluster.is_none()).count()
    }

    pub(crate) fn require_state(
        &self,
        operation: &'static str,
        allowed: &[SegmentationState],
    ) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    // ---- Cluster arena ----

    pub(crate) fn create_cluster(&mut self, seed: Option<PointIndex>) -> ClusterKey {
        self.clusters.insert(Cluster::new(seed))
    }

    /// Appends `point` to a leaf cluster and updates its aggregates. The
    /// primitive is left stale until the next refit.
    pub(crate) fn add_point_to_cluster(&mut self, key: ClusterKey, point: PointIndex, affinity: f64) {
        let Some(cluster) = self.clusters.get_mut(key) else {
            return;
        };
        let p = &mut self.points[point];
        cluster.points.push(point);
        cluster.add_point_stats(p);
        cluster.total_affinity += affinity;
        p.cluster = Some(key);
        p.cluster_affinity = affinity;
    }

    /// Fits a primitive of the target type to `positions`.
    pub(crate) fn fit_primitive(
        &self,
        positions: &[Point3<f64>],
        normal_sum: &Vector3<f64>,
        mean_radius: f64,
    ) -> Primitive {
        let fitted = Primitive::fit(positions);
        self.conform_primitive(fitted, normal_sum, Some((positions, mean_radius)))
    }

    /// Brings a fitted or merged primitive to the target type. Points and
    /// lines are promoted to planes through the aggregate normal when a
    /// planar type is requested; higher shapes are reduced otherwise.
    pub(crate) fn conform_primitive(
        &self,
        primitive: Primitive,
        normal_sum: &Vector3<f64>,
        raster: Option<(&[Point3<f64>], f64)>,
    ) -> Primitive {
        match self.primitive_type {
            PrimitiveType::Plane => primitive.with_fallback_normal(normal_sum).reduce_to(PrimitiveType::Plane),
            PrimitiveType::PlanarGrid => {
                let planar = primitive.with_fallback_normal(normal_sum);
                match raster {
                    Some((positions, mean_radius)) => {
                        let spacing = self.grid_spacing(&planar, mean_radius);
                        planar.with_planar_grid(positions, spacing)
                    }
                    None => planar,
                }
            }
            target => primitive.reduce_to(target),
        }
    }

    fn grid_spacing(&self, primitive: &Primitive, mean_radius: f64) -> f64 {
        if self.params.planar_grid_spacing > 0.0 {
            return self.params.planar_grid_spacing;
        }
        if mean_radius > 0.0 {
            return 2.0 * mean_radius;
        }
        let extent = primitive.bbox.planar_extent();
        let weight = primitive.weight();
        if extent > 0.0 && weight > 0.0 {
            (extent / weight).sqrt()
        } else {
            1.0
        }
    }

    /// Recomputes a leaf cluster's aggregates, primitive, and member
    /// affinities from its member list. Internal nodes are left alone.
    pub(crate) fn refit_cluster(&mut self, key: ClusterKey) {
        let members = match self.clusters.get(key) {
            Some(cluster) if cluster.is_leaf() => cluster.points.clone(),
            _ => return,
        };

        let mut stats = Cluster::new(None);
        let mut positions = Vec::with_capacity(members.len());
        let mut radius_sum = 0.0;
        for &p in &members {
            let point = &self.points[p];
            stats.add_point_stats(point);
            positions.push(point.position);
            radius_sum += point.radius1;
        }
        let mean_radius = if members.is_empty() {
            0.0
        } else {
            radius_sum / members.len() as f64
        };
        let primitive = self.fit_primitive(&positions, &stats.normal_sum, mean_radius);

        let Some(cluster) = self.clusters.get_mut(key) else {
            return;
        };
        cluster.npoints = stats.npoints;
        cluster.area = stats.area;
        cluster.color_sum = stats.color_sum;
        cluster.normal_sum = stats.normal_sum;
        cluster.timestamp_sum = stats.timestamp_sum;
        cluster.timestamp_count = stats.timestamp_count;
        cluster.category = stats.category;
        cluster.primitive = primitive;

        let mut total = 0.0;
        for &p in &members {
            let affinity = self.point_affinity(p, key);
            self.points[p].cluster_affinity = affinity;
            total += affinity;
        }
        if let Some(cluster) = self.clusters.get_mut(key) {
            cluster.total_affinity = total;
        }
    }

    pub(crate) fn refit_all(&mut self) {
        let keys: Vec<ClusterKey> = self.clusters.keys().collect();
        for key in keys {
            self.refit_cluster(key);
        }
    }

    /// Rebuilds every top-level cluster's member list from the points'
    /// back-references, keeping members in index order.
    pub(crate) fn rebuild_memberships(&mut self) {
        for cluster in self.clusters.values_mut() {
            if cluster.is_leaf() {
                cluster.points.clear();
            }
        }
        for (index, point) in self.points.iter_mut().enumerate() {
            let Some(key) = point.cluster else {
                continue;
            };
            match self.clusters.get_mut(key) {
                Some(cluster) => cluster.points.push(index),
                None => point.cluster = None,
            }
        }
    }

    /// Removes a cluster and its pairs. Member back-references are cleared.
    pub(crate) fn remove_cluster(&mut self, key: ClusterKey) -> Option<Cluster> {
        self.unlink_pairs(key);
        let cluster = self.clusters.remove(key)?;
        for &p in &cluster.points {
            if self.points[p].cluster == Some(key) {
                self.points[p].cluster = None;
                self.points[p].cluster_affinity = 0.0;
            }
        }
        Some(cluster)
    }

    // ---- Pairs ----

    /// Creates the pair `{a, b}` with its current affinity and queues it.
    pub(crate) fn link_pair(&mut self, a: ClusterKey, b: ClusterKey) -> Option<PairKey> {
        if a == b || !self.clusters.contains_key(a) || !self.clusters.contains_key(b) {
            return None;
        }
        let affinity = self.pair_affinity(a, b);
        let key = self.pairs.insert(Pair {
            clusters: [a, b],
            affinity,
        });
        for endpoint in [a, b] {
            if let Some(cluster) = self.clusters.get_mut(endpoint) {
                cluster.pairs.push(key);
            }
        }
        self.queue.push(key, affinity);
        Some(key)
    }

    /// Removes every pair of `key`, returning the other endpoints.
    pub(crate) fn unlink_pairs(&mut self, key: ClusterKey) -> SmallVec<[ClusterKey; 8]> {
        let mut partners = SmallVec::new();
        let pair_keys = match self.clusters.get_mut(key) {
            Some(cluster) => std::mem::take(&mut cluster.pairs),
            None => return partners,
        };
        for pair_key in pair_keys {
            let Some(pair) = self.pairs.remove(pair_key) else {
                continue;
            };
            self.queue.remove(pair_key);
            if let Some(other) = pair.other(key) {
                partners.push(other);
                if let Some(cluster) = self.clusters.get_mut(other) {
                    cluster.pairs.retain(|k| *k != pair_key);
                }
            }
        }
        partners
    }

    pub(crate) fn clear_pairs(&mut self) {
        self.pairs.clear();
        self.queue.clear();
        for cluster in self.clusters.values_mut() {
            cluster.pairs.clear();
        }
    }

    /// Creates one pair per adjacent couple of clusters, adjacency taken from
    /// the filtered neighbor graph. Returns the number of pairs.
    pub(crate) fn build_pairs(&mut self) -> usize {
        self.clear_pairs();
        let mut seen: FxHashSet<(ClusterKey, ClusterKey)> = FxHashSet::default();
        let mut links = Vec::new();
        for point in &self.points {
            let Some(a) = point.cluster else {
                continue;
            };
            for &q in &point.neighbors {
                let Some(b) = self.points[q].cluster else {
                    continue;
                };
                if a == b {
                    continue;
                }
                let ordered = if a < b { (a, b) } else { (b, a) };
                if seen.insert(ordered) {
                    links.push(ordered);
                }
            }
        }
        let count = links.len();
        for (a, b) in links {
            self.link_pair(a, b);
        }
        debug!(pairs = count, "built cluster pairs");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementBuffers;

    fn plane_buffers(n: usize) -> ElementBuffers {
        let positions = (0..n)
            .map(|i| Point3::new((i % 10) as f64 * 0.1, (i / 10) as f64 * 0.1, 0.0))
            .collect();
        ElementBuffers::new(positions).with_normals(vec![Vector3::z(); n])
    }

    #[test]
    fn load_skips_non_finite_positions() {
        let mut buffers = plane_buffers(5);
        buffers.positions[2] = Point3::new(f64::NAN, 0.0, 0.0);
        let mut seg = Segmentation::new(SegmentationParams::default()).unwrap();
        assert_eq!(seg.load_points(&buffers).unwrap(), 4);
        assert_eq!(seg.state(), SegmentationState::PointsLoaded);
        assert_eq!(seg.points()[2].source_index, 3);
    }

    #[test]
    fn load_rejects_empty_input() {
        let mut seg = Segmentation::new(SegmentationParams::default()).unwrap();
        let err = seg.load_points(&ElementBuffers::default()).unwrap_err();
        assert!(matches!(err, Error::EmptyInput));
        assert_eq!(seg.state(), SegmentationState::Empty);

        let all_invalid = ElementBuffers::new(vec![Point3::new(f64::INFINITY, 0.0, 0.0)]);
        assert!(matches!(seg.load_points(&all_invalid), Err(Error::EmptyInput)));
        assert_eq!(seg.n_points(), 0);
    }

    #[test]
    fn load_twice_is_out_of_order() {
        let mut seg = Segmentation::new(SegmentationParams::default()).unwrap();
        seg.load_points(&plane_buffers(4)).unwrap();
        assert!(matches!(
            seg.load_points(&plane_buffers(4)),
            Err(Error::InvalidState { operation: "load_points", .. })
        ));
    }

    #[test]
    fn create_clusters_without_points_fails() {
        let mut seg = Segmentation::new(SegmentationParams::default()).unwrap();
        assert!(matches!(seg.create_clusters(PrimitiveType::Plane), Err(Error::EmptyInput)));
    }

    #[test]
    fn explicit_adjacency_is_remapped() {
        let mut buffers = plane_buffers(3).with_connectivity(Connectivity::Explicit(vec![
            vec![1, 2],
            vec![0, 2],
            vec![0, 1],
        ]));
        buffers.positions[1] = Point3::new(f64::NAN, 0.0, 0.0);
        let mut seg = Segmentation::new(SegmentationParams::default()).unwrap();
        seg.load_points(&buffers).unwrap();
        assert_eq!(seg.connectivity, Connectivity::Explicit(vec![vec![1], vec![0]]));
    }

    #[test]
    fn out_of_image_pixels_are_rejected() {
        let buffers = plane_buffers(4)
            .with_source_indices(vec![0, 1, 2, 9])
            .with_connectivity(Connectivity::ImageGrid {
                width: 2,
                height: 2,
                diagonal: false,
            });
        let mut seg = Segmentation::new(SegmentationParams::default()).unwrap();
        assert!(matches!(seg.load_points(&buffers), Err(Error::InvalidInput(_))));
        assert_eq!(seg.state(), SegmentationState::Empty);
    }

    #[test]
    fn overflowing_image_size_is_rejected() {
        let buffers = plane_buffers(4).with_connectivity(Connectivity::ImageGrid {
            width: usize::MAX,
            height: 2,
            diagonal: false,
        });
        let mut seg = Segmentation::new(SegmentationParams::default()).unwrap();
        assert!(matches!(seg.load_points(&buffers), Err(Error::InvalidInput(_))));
        assert_eq!(seg.state(), SegmentationState::Empty);
    }
}
