// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Spatial index for radius and nearest-neighbor queries over sample
//! positions.
//!
//! Backed by a bulk-loaded R*-tree. The index stores item indices, not the
//! items themselves, so it stays valid only as long as the indexed positions
//! do not move; rebuild after any position change.

use nalgebra::Point3;
use rstar::primitives::GeomWithData;
use rstar::RTree;

type IndexedPosition = GeomWithData<[f64; 3], usize>;

/// Immutable spatial index over item positions.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    tree: RTree<IndexedPosition>,
}

impl SpatialIndex {
    /// Indexes `items` by the position `position` extracts from each.
    ///
    /// Returns `None` for an empty slice or when any position is not finite;
    /// callers must check for an empty point set before querying.
    pub fn build<T, F>(items: &[T], position: F) -> Option<Self>
    where
        F: Fn(&T) -> Point3<f64>,
    {
        if items.is_empty() {
            return None;
        }
        let mut entries = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let p = position(item);
            if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
                return None;
            }
            entries.push(GeomWithData::new([p.x, p.y, p.z], i));
        }
        Some(Self {
            tree: RTree::bulk_load(entries),
        })
    }

    /// Number of indexed items.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// All items within `radius` of `center`, nearest first (ties by index).
    pub fn within_radius(&self, center: &Point3<f64>, radius: f64) -> Vec<(usize, f64)> {
        let query = [center.x, center.y, center.z];
        let mut found: Vec<(usize, f64)> = self
            .tree
            .locate_within_distance(query, radius * radius)
            .map(|entry| (entry.data, distance(entry.geom(), center)))
            .collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        found
    }

    /// Up to `k` nearest items to `center`, optionally bounded by
    /// `max_radius`, nearest first.
    pub fn nearest_k(&self, center: &Point3<f64>, k: usize, max_radius: Option<f64>) -> Vec<(usize, f64)> {
        self.nearest_iter(center, max_radius).take(k).collect()
    }

    /// Iterates items in order of increasing distance, stopping at
    /// `max_radius` when given.
    pub fn nearest_iter<'a>(
        &'a self,
        center: &Point3<f64>,
        max_radius: Option<f64>,
    ) -> impl Iterator<Item = (usize, f64)> + 'a {
        let origin = *center;
        let query = [center.x, center.y, center.z];
        let limit = max_radius.unwrap_or(f64::INFINITY);
        self.tree
            .nearest_neighbor_iter(&query)
            .map(move |entry| (entry.data, distance(entry.geom(), &origin)))
            .take_while(move |&(_, d)| d <= limit)
    }

    /// Items satisfying `predicate` among the `max_examined` nearest to
    /// `center` within `max_radius`, nearest first.
    ///
    /// Used to find nearby points that already belong to a cluster. The
    /// predicate runs at most `max_examined` times, however few items match.
    pub fn nearest_matching<P>(
        &self,
        center: &Point3<f64>,
        max_radius: Option<f64>,
        max_examined: usize,
        mut predicate: P,
    ) -> Vec<(usize, f64)>
    where
        P: FnMut(usize) -> bool,
    {
        self.nearest_iter(center, max_radius)
            .take(max_examined)
            .filter(|&(index, _)| predicate(index))
            .collect()
    }
}

fn distance(a: &[f64; 3], b: &Point3<f64>) -> f64 {
    ((a[0] - b.x).powi(2) + (a[1] - b.y).powi(2) + (a[2] - b.z).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line_of_points() -> Vec<Point3<f64>> {
        (0..10).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect()
    }

    #[test]
    fn empty_input_has_no_index() {
        let empty: Vec<Point3<f64>> = Vec::new();
        assert!(SpatialIndex::build(&empty, |p| *p).is_none());
    }

    #[test]
    fn non_finite_positions_are_rejected() {
        let pts = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(f64::NAN, 0.0, 0.0)];
        assert!(SpatialIndex::build(&pts, |p| *p).is_none());
    }

    #[test]
    fn radius_query_is_sorted() {
        let pts = line_of_points();
        let index = SpatialIndex::build(&pts, |p| *p).unwrap();
        assert_eq!(index.len(), 10);

        let found = index.within_radius(&Point3::new(4.2, 0.0, 0.0), 1.5);
        let ids: Vec<usize> = found.iter().map(|&(i, _)| i).collect();
        assert_eq!(ids, vec![4, 5, 3]);
        assert_relative_eq!(found[0].1, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn nearest_k_respects_radius() {
        let pts = line_of_points();
        let index = SpatialIndex::build(&pts, |p| *p).unwrap();

        let k = index.nearest_k(&Point3::new(0.0, 0.0, 0.0), 3, None);
        assert_eq!(k.iter().map(|&(i, _)| i).collect::<Vec<_>>(), vec![0, 1, 2]);

        let bounded = index.nearest_k(&Point3::new(0.0, 0.0, 0.0), 5, Some(1.0));
        assert_eq!(bounded.len(), 2);
    }

    #[test]
    fn nearest_matching_skips_rejected_items() {
        let pts = line_of_points();
        let index = SpatialIndex::build(&pts, |p| *p).unwrap();
        let hits = index.nearest_matching(&Point3::new(0.0, 0.0, 0.0), None, 10, |i| i % 4 == 3);
        assert_eq!(hits.iter().map(|&(i, _)| i).collect::<Vec<_>>(), vec![3, 7]);

        let miss = index.nearest_matching(&Point3::new(0.0, 0.0, 0.0), Some(2.0), 10, |i| i > 5);
        assert!(miss.is_empty());
    }

    #[test]
    fn nearest_matching_examines_a_bounded_number_of_items() {
        let pts: Vec<Point3<f64>> = (0..5000).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let index = SpatialIndex::build(&pts, |p| *p).unwrap();
        let mut examined = 0;
        let hits = index.nearest_matching(&Point3::new(2500.0, 0.0, 0.0), None, 64, |_| {
            examined += 1;
            false
        });
        assert!(hits.is_empty());
        assert_eq!(examined, 64);

        let near = index.nearest_matching(&Point3::new(0.0, 0.0, 0.0), None, 3, |i| i == 4999);
        assert!(near.is_empty());
    }
}
