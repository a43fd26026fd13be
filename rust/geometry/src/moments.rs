// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Weighted first and second order moments of a point set.
//!
//! Moments are the sufficient statistic for every primitive fit in this crate:
//! a point, line, or plane is a function of the mean and covariance alone.
//! Combining the moments of two disjoint sets (parallel-axis rule) gives
//! exactly the moments of their union, which is what lets clusters merge
//! their primitives without revisiting member points.

use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};

/// Weighted mean and population covariance of a point set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    /// Total weight (the point count for unweighted sets).
    pub weight: f64,
    pub mean: Vector3<f64>,
    pub covariance: Matrix3<f64>,
}

/// Eigen decomposition of a covariance matrix, sorted ascending.
#[derive(Debug, Clone, Copy)]
pub struct PrincipalAxes {
    pub values: [f64; 3],
    pub axes: [Vector3<f64>; 3],
}

impl Moments {
    /// Moments of the empty set.
    pub fn zero() -> Self {
        Self {
            weight: 0.0,
            mean: Vector3::zeros(),
            covariance: Matrix3::zeros(),
        }
    }

    /// Moments of a single point.
    pub fn from_point(p: &Point3<f64>, weight: f64) -> Self {
        Self {
            weight,
            mean: p.coords,
            covariance: Matrix3::zeros(),
        }
    }

    /// Unit-weight moments of a point set.
    pub fn from_points(points: &[Point3<f64>]) -> Self {
        if points.is_empty() {
            return Self::zero();
        }
        let n = points.len() as f64;
        let mean = points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
        let mut covariance = Matrix3::zeros();
        for p in points {
            let d = p.coords - mean;
            covariance += d * d.transpose();
        }
        Self {
            weight: n,
            mean,
            covariance: covariance / n,
        }
    }

    /// Weighted moments. Points with non-positive weight are ignored.
    pub fn from_weighted_points(points: &[Point3<f64>], weights: &[f64]) -> Self {
        let mut total = 0.0;
        let mut sum = Vector3::zeros();
        for (p, &w) in points.iter().zip(weights) {
            if w > 0.0 {
                total += w;
                sum += p.coords * w;
            }
        }
        if total <= 0.0 {
            return Self::zero();
        }
        let mean = sum / total;
        let mut covariance = Matrix3::zeros();
        for (p, &w) in points.iter().zip(weights) {
            if w > 0.0 {
                let d = p.coords - mean;
                covariance += d * d.transpose() * w;
            }
        }
        Self {
            weight: total,
            mean,
            covariance: covariance / total,
        }
    }

    /// Returns `true` if no weight has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.weight <= 0.0
    }

    /// The mean as a point.
    pub fn centroid(&self) -> Point3<f64> {
        Point3::from(self.mean)
    }

    /// Same distribution, different total weight.
    pub fn with_weight(&self, weight: f64) -> Self {
        Self { weight, ..*self }
    }

    /// Moments of the union of two disjoint sets, each scaled to the given
    /// weight.
    pub fn combine(a: &Moments, weight_a: f64, b: &Moments, weight_b: f64) -> Moments {
        let wa = weight_a.max(0.0);
        let wb = weight_b.max(0.0);
        let w = wa + wb;
        if w <= 0.0 {
            return Moments::zero();
        }
        let mean = (a.mean * wa + b.mean * wb) / w;
        let da = a.mean - mean;
        let db = b.mean - mean;
        let covariance = ((a.covariance + da * da.transpose()) * wa
            + (b.covariance + db * db.transpose()) * wb)
            / w;
        Moments {
            weight: w,
            mean,
            covariance,
        }
    }

    /// Adds one point in place.
    pub fn add_point(&mut self, p: &Point3<f64>, weight: f64) {
        let single = Moments::from_point(p, weight);
        *self = Moments::combine(self, self.weight, &single, weight);
    }

    /// Mean squared distance of the set to the plane `n·x + d = 0`.
    pub fn mean_squared_plane_distance(&self, normal: &Vector3<f64>, d: f64) -> f64 {
        let offset = normal.dot(&self.mean) + d;
        (normal.dot(&(self.covariance * normal)) + offset * offset).max(0.0)
    }

    /// Eigen decomposition sorted by ascending eigenvalue.
    pub fn principal_axes(&self) -> PrincipalAxes {
        let eigen = SymmetricEigen::new(self.covariance);
        let mut order = [0usize, 1, 2];
        order.sort_by(|&i, &j| eigen.eigenvalues[i].total_cmp(&eigen.eigenvalues[j]));
        PrincipalAxes {
            values: order.map(|i| eigen.eigenvalues[i].max(0.0)),
            axes: order.map(|i| eigen.eigenvectors.column(i).into_owned()),
        }
    }
}

impl Default for Moments {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.5),
            Point3::new(1.0, 3.0, 0.0),
            Point3::new(-1.0, 1.0, 2.0),
        ]
    }

    #[test]
    fn combine_matches_union() {
        let pts = sample();
        let whole = Moments::from_points(&pts);
        let a = Moments::from_points(&pts[..2]);
        let b = Moments::from_points(&pts[2..]);
        let merged = Moments::combine(&a, a.weight, &b, b.weight);

        assert_relative_eq!(merged.weight, whole.weight);
        assert_relative_eq!(merged.mean, whole.mean, epsilon = 1e-12);
        assert_relative_eq!(merged.covariance, whole.covariance, epsilon = 1e-12);
    }

    #[test]
    fn incremental_add_matches_batch() {
        let pts = sample();
        let mut m = Moments::zero();
        for p in &pts {
            m.add_point(p, 1.0);
        }
        let batch = Moments::from_points(&pts);
        assert_relative_eq!(m.mean, batch.mean, epsilon = 1e-12);
        assert_relative_eq!(m.covariance, batch.covariance, epsilon = 1e-12);
    }

    #[test]
    fn weighted_points_skip_non_positive_weights() {
        let pts = sample();
        let weights = [1.0, 1.0, 0.0, -2.0, 0.0];
        let m = Moments::from_weighted_points(&pts, &weights);
        assert_relative_eq!(m.weight, 2.0);
        assert_relative_eq!(m.mean, Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn principal_axes_are_sorted() {
        let m = Moments::from_points(&sample());
        let axes = m.principal_axes();
        assert!(axes.values[0] <= axes.values[1]);
        assert!(axes.values[1] <= axes.values[2]);
        for axis in &axes.axes {
            assert_relative_eq!(axis.norm(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn combine_of_nothing_is_zero() {
        let z = Moments::combine(&Moments::zero(), 0.0, &Moments::zero(), 0.0);
        assert!(z.is_empty());
    }
}
