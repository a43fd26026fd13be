// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fitted geometric primitives.
//!
//! A [`Primitive`] is the lowest-dimensional shape that explains a point set:
//! nothing, a point, a line, a plane, or a plane with an occupancy raster.
//! Fits are derived from [`Moments`] via principal component analysis, and
//! degenerate configurations fall back to lower-dimensional shapes
//! (plane → line → point) instead of failing.

use nalgebra::{Point3, Vector3};

use crate::bbox::Aabb;
use crate::grid::PlanarGrid;
use crate::moments::Moments;

/// Ratio of middle to largest covariance eigenvalue below which a point set
/// counts as colinear.
pub const COLINEAR_TOLERANCE: f64 = 1e-6;

/// Largest-eigenvalue floor (relative to the squared magnitude of the mean,
/// with a floor of one) below which a point set counts as a single point.
pub const COINCIDENT_TOLERANCE: f64 = 1e-20;

/// Discriminant for primitive shapes, ordered by dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveType {
    Null = 0,
    Point = 1,
    Line = 2,
    Plane = 3,
    PlanarGrid = 4,
}

impl PrimitiveType {
    /// Returns the lowercase type name used in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveType::Null => "null",
            PrimitiveType::Point => "point",
            PrimitiveType::Line => "line",
            PrimitiveType::Plane => "plane",
            PrimitiveType::PlanarGrid => "planar_grid",
        }
    }

    /// Parses a name produced by [`PrimitiveType::as_str`].
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "null" => Some(PrimitiveType::Null),
            "point" => Some(PrimitiveType::Point),
            "line" => Some(PrimitiveType::Line),
            "plane" => Some(PrimitiveType::Plane),
            "planar_grid" => Some(PrimitiveType::PlanarGrid),
            _ => None,
        }
    }

    /// Returns `true` for plane and planar grid.
    pub fn is_planar(&self) -> bool {
        matches!(self, PrimitiveType::Plane | PrimitiveType::PlanarGrid)
    }
}

impl std::fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infinite line through `point` along unit `direction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line3 {
    pub point: Point3<f64>,
    pub direction: Vector3<f64>,
}

impl Line3 {
    /// Perpendicular distance from `p` to the line.
    pub fn distance(&self, p: &Point3<f64>) -> f64 {
        let d = p - self.point;
        (d - self.direction * d.dot(&self.direction)).norm()
    }
}

/// Plane `normal · x + d = 0` with unit normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane3 {
    pub normal: Vector3<f64>,
    pub d: f64,
}

impl Plane3 {
    /// Plane through `point` with the given (not necessarily unit) normal.
    pub fn from_point_normal(point: &Point3<f64>, normal: &Vector3<f64>) -> Self {
        let normal = normal.normalize();
        Self {
            normal,
            d: -normal.dot(&point.coords),
        }
    }

    /// Plane from `[a, b, c, d]` coefficients, normalized.
    pub fn from_coefficients(c: [f64; 4]) -> Option<Self> {
        let normal = Vector3::new(c[0], c[1], c[2]);
        let len = normal.norm();
        if !(len > 0.0) {
            return None;
        }
        Some(Self {
            normal: normal / len,
            d: c[3] / len,
        })
    }

    /// Returns `[a, b, c, d]`.
    pub fn coefficients(&self) -> [f64; 4] {
        [self.normal.x, self.normal.y, self.normal.z, self.d]
    }

    pub fn signed_distance(&self, p: &Point3<f64>) -> f64 {
        self.normal.dot(&p.coords) + self.d
    }

    pub fn distance(&self, p: &Point3<f64>) -> f64 {
        self.signed_distance(p).abs()
    }

    /// Orthogonal projection of `p` onto the plane.
    pub fn project(&self, p: &Point3<f64>) -> Point3<f64> {
        p - self.normal * self.signed_distance(p)
    }
}

/// The geometric part of a primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Null,
    Point,
    Line(Line3),
    Plane(Plane3),
    PlanarGrid(Plane3, PlanarGrid),
}

/// A fitted primitive with its bounding box, centroid, and the moments it
/// was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub shape: Shape,
    pub bbox: Aabb,
    pub centroid: Point3<f64>,
    pub moments: Moments,
}

impl Primitive {
    /// The null primitive: no points, infinitely far from everything.
    pub fn null() -> Self {
        Self {
            shape: Shape::Null,
            bbox: Aabb::empty(),
            centroid: Point3::origin(),
            moments: Moments::zero(),
        }
    }

    /// Fits the lowest-dimensional primitive that explains `points`.
    ///
    /// 0 points give null, 1 point (or coincident points) a point, 2 or
    /// colinear points a line, and anything else a least-squares plane whose
    /// normal is the smallest principal axis.
    pub fn fit(points: &[Point3<f64>]) -> Self {
        Self::from_moments(Moments::from_points(points), Aabb::from_points(points))
    }

    /// Weighted variant of [`Primitive::fit`].
    pub fn fit_weighted(points: &[Point3<f64>], weights: &[f64]) -> Self {
        let bbox = Aabb::from_points(
            points
                .iter()
                .zip(weights)
                .filter(|(_, w)| **w > 0.0)
                .map(|(p, _)| p),
        );
        Self::from_moments(Moments::from_weighted_points(points, weights), bbox)
    }

    /// Classifies moments into a shape.
    pub fn from_moments(moments: Moments, bbox: Aabb) -> Self {
        if moments.is_empty() {
            return Self::null();
        }
        let centroid = moments.centroid();
        let axes = moments.principal_axes();
        let [_, middle, large] = axes.values;

        let scale = moments.mean.norm_squared().max(1.0);
        let shape = if large <= COINCIDENT_TOLERANCE * scale {
            Shape::Point
        } else if middle <= COLINEAR_TOLERANCE * large {
            Shape::Line(Line3 {
                point: centroid,
                direction: axes.axes[2],
            })
        } else {
            Shape::Plane(Plane3::from_point_normal(&centroid, &axes.axes[0]))
        };

        Self {
            shape,
            bbox,
            centroid,
            moments,
        }
    }

    /// Plane primitive through a single oriented sample.
    pub fn oriented_point(position: &Point3<f64>, normal: &Vector3<f64>, weight: f64) -> Self {
        let point = Self {
            shape: Shape::Point,
            bbox: Aabb::from_point(position),
            centroid: *position,
            moments: Moments::from_point(position, weight),
        };
        point.with_fallback_normal(normal)
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        match self.shape {
            Shape::Null => PrimitiveType::Null,
            Shape::Point => PrimitiveType::Point,
            Shape::Line(_) => PrimitiveType::Line,
            Shape::Plane(_) => PrimitiveType::Plane,
            Shape::PlanarGrid(..) => PrimitiveType::PlanarGrid,
        }
    }

    /// The supporting plane of a plane or planar grid.
    pub fn plane(&self) -> Option<&Plane3> {
        match &self.shape {
            Shape::Plane(plane) | Shape::PlanarGrid(plane, _) => Some(plane),
            _ => None,
        }
    }

    pub fn line(&self) -> Option<&Line3> {
        match &self.shape {
            Shape::Line(line) => Some(line),
            _ => None,
        }
    }

    pub fn grid(&self) -> Option<&PlanarGrid> {
        match &self.shape {
            Shape::PlanarGrid(_, grid) => Some(grid),
            _ => None,
        }
    }

    /// Unit normal of the supporting plane, if planar.
    pub fn normal(&self) -> Option<Vector3<f64>> {
        self.plane().map(|plane| plane.normal)
    }

    /// Total weight of the points this primitive was fitted to.
    pub fn weight(&self) -> f64 {
        self.moments.weight
    }

    /// Distance from `p` to the primitive.
    ///
    /// Perpendicular distance for lines and planes, Euclidean distance to the
    /// centroid for points, and infinity for the null primitive. Planar grids
    /// add the in-plane gap to their occupied cells.
    pub fn distance(&self, p: &Point3<f64>) -> f64 {
        match &self.shape {
            Shape::Null => f64::INFINITY,
            Shape::Point => (p - self.centroid).norm(),
            Shape::Line(line) => line.distance(p),
            Shape::Plane(plane) => plane.distance(p),
            Shape::PlanarGrid(plane, grid) => plane.distance(p).hypot(grid.gap(p)),
        }
    }

    /// Root mean squared distance of the fitted points to the primitive,
    /// computed from the moments alone.
    pub fn rms_residual(&self) -> f64 {
        let c = &self.moments.covariance;
        let mean_squared = match &self.shape {
            Shape::Null => 0.0,
            Shape::Point => {
                let offset = self.moments.mean - self.centroid.coords;
                c.trace() + offset.norm_squared()
            }
            Shape::Line(line) => {
                let along = line.direction.dot(&(c * line.direction));
                let offset = self.moments.mean - line.point.coords;
                let perpendicular = offset - line.direction * offset.dot(&line.direction);
                c.trace() - along + perpendicular.norm_squared()
            }
            Shape::Plane(plane) | Shape::PlanarGrid(plane, _) => {
                self.moments.mean_squared_plane_distance(&plane.normal, plane.d)
            }
        };
        mean_squared.max(0.0).sqrt()
    }

    /// Promotes a point or line to a plane through the centroid using
    /// `normal`. Planes, grids, and null primitives are returned unchanged, as
    /// are lines whose direction is parallel to `normal`.
    pub fn with_fallback_normal(self, normal: &Vector3<f64>) -> Self {
        let n = match self.shape {
            Shape::Point => *normal,
            Shape::Line(line) => normal - line.direction * normal.dot(&line.direction),
            _ => return self,
        };
        let len = n.norm();
        if !(len > 1e-9) {
            return self;
        }
        let plane = Plane3::from_point_normal(&self.centroid, &(n / len));
        Self {
            shape: Shape::Plane(plane),
            ..self
        }
    }

    /// Lowers the primitive to at most `target` dimensions.
    ///
    /// Planes reduce to their principal line, lines to their centroid. Grids
    /// reduce to their plane when the target is a plain plane.
    pub fn reduce_to(self, target: PrimitiveType) -> Self {
        if self.primitive_type() <= target {
            return self;
        }
        match target {
            PrimitiveType::Null => Self::null(),
            PrimitiveType::Point => Self {
                shape: Shape::Point,
                ..self
            },
            PrimitiveType::Line => {
                let axes = self.moments.principal_axes();
                if axes.values[2] <= COINCIDENT_TOLERANCE * self.moments.mean.norm_squared().max(1.0) {
                    return Self {
                        shape: Shape::Point,
                        ..self
                    };
                }
                Self {
                    shape: Shape::Line(Line3 {
                        point: self.centroid,
                        direction: axes.axes[2],
                    }),
                    ..self
                }
            }
            PrimitiveType::Plane => match self.shape {
                Shape::PlanarGrid(plane, _) => Self {
                    shape: Shape::Plane(plane),
                    ..self
                },
                _ => self,
            },
            PrimitiveType::PlanarGrid => self,
        }
    }

    /// Attaches an occupancy raster built from `points` to a planar
    /// primitive. Non-planar primitives are returned unchanged.
    pub fn with_planar_grid(self, points: &[Point3<f64>], spacing: f64) -> Self {
        let plane = match self.plane().copied() {
            Some(plane) => plane,
            None => return self,
        };
        let grid = PlanarGrid::from_points(&plane, &self.centroid, spacing, points);
        Self {
            shape: Shape::PlanarGrid(plane, grid),
            ..self
        }
    }

    /// Weighted combination of two primitives, as when their point sets are
    /// merged.
    ///
    /// The moments are combined exactly, so the result equals refitting the
    /// union when the weights are point counts. A merge never loses planarity:
    /// if either input is planar and the union is degenerate, the result is a
    /// plane through the merged centroid with the weight-averaged input
    /// normal. Occupancy rasters are resampled onto the merged plane.
    pub fn merge(a: &Primitive, b: &Primitive, weight_a: f64, weight_b: f64) -> Primitive {
        if a.moments.is_empty() || weight_a <= 0.0 {
            return b.clone();
        }
        if b.moments.is_empty() || weight_b <= 0.0 {
            return a.clone();
        }
        let moments = Moments::combine(&a.moments, weight_a, &b.moments, weight_b);
        let bbox = a.bbox.union(&b.bbox);
        let mut merged = Primitive::from_moments(moments, bbox);

        let average_normal = match (a.normal(), b.normal()) {
            (Some(na), Some(nb)) => {
                let nb = if na.dot(&nb) < 0.0 { -nb } else { nb };
                Some(na * weight_a + nb * weight_b)
            }
            (Some(n), None) | (None, Some(n)) => Some(n),
            (None, None) => None,
        };
        if let Some(normal) = average_normal {
            merged = merged.with_fallback_normal(&normal);
        }

        let grids: Vec<&PlanarGrid> = [a.grid(), b.grid()].into_iter().flatten().collect();
        if grids.is_empty() {
            return merged;
        }
        if let Some(plane) = merged.plane().copied() {
            let spacing = grids
                .iter()
                .map(|g| g.spacing)
                .fold(f64::INFINITY, f64::min);
            let grid = PlanarGrid::resample(&plane, &merged.centroid, spacing, grids);
            merged.shape = Shape::PlanarGrid(plane, grid);
        }
        merged
    }
}

impl Default for Primitive {
    fn default() -> Self {
        Self::null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fit_falls_back_by_point_count() {
        assert_eq!(Primitive::fit(&[]).primitive_type(), PrimitiveType::Null);

        let one = Primitive::fit(&[Point3::new(1.0, 2.0, 3.0)]);
        assert_eq!(one.primitive_type(), PrimitiveType::Point);
        assert_eq!(one.bbox.diagonal(), 0.0);

        let two = Primitive::fit(&[Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)]);
        assert_eq!(two.primitive_type(), PrimitiveType::Line);
        assert_relative_eq!(two.line().unwrap().direction.x.abs(), 1.0, epsilon = 1e-12);

        let colinear = Primitive::fit(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(3.0, 3.0, 3.0),
        ]);
        assert_eq!(colinear.primitive_type(), PrimitiveType::Line);

        let plane = Primitive::fit(&[
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
        ]);
        assert_eq!(plane.primitive_type(), PrimitiveType::Plane);
        assert_relative_eq!(plane.normal().unwrap().z.abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn distances_by_shape() {
        let plane = Primitive::fit(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
        ]);
        assert_relative_eq!(plane.distance(&Point3::new(5.0, 5.0, -2.0)), 2.0, epsilon = 1e-9);

        let line = Primitive::fit(&[Point3::new(0.0, 0.0, 0.0), Point3::new(0.0, 0.0, 4.0)]);
        assert_relative_eq!(line.distance(&Point3::new(3.0, 4.0, 7.0)), 5.0, epsilon = 1e-9);

        let point = Primitive::fit(&[Point3::new(1.0, 1.0, 1.0)]);
        assert_relative_eq!(point.distance(&Point3::new(1.0, 1.0, 3.0)), 2.0);

        assert!(Primitive::null().distance(&Point3::origin()).is_infinite());
    }

    #[test]
    fn merge_matches_refit_of_union() {
        let left = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.1),
            Point3::new(0.0, 1.0, -0.1),
        ];
        let right = [
            Point3::new(3.0, 2.0, 0.05),
            Point3::new(2.0, 3.0, 0.0),
            Point3::new(4.0, 4.0, 0.02),
            Point3::new(3.0, 5.0, -0.03),
        ];
        let a = Primitive::fit(&left);
        let b = Primitive::fit(&right);
        let merged = Primitive::merge(&a, &b, 3.0, 4.0);

        let all: Vec<_> = left.iter().chain(right.iter()).copied().collect();
        let refit = Primitive::fit(&all);

        let n_merged = merged.normal().unwrap();
        let n_refit = refit.normal().unwrap();
        assert_relative_eq!(n_merged.dot(&n_refit).abs(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(merged.centroid, refit.centroid, epsilon = 1e-12);
        assert_relative_eq!(merged.rms_residual(), refit.rms_residual(), epsilon = 1e-9);
        assert_eq!(merged.bbox, refit.bbox);
    }

    #[test]
    fn merge_of_planes_never_degenerates() {
        let a = Primitive::oriented_point(&Point3::new(0.0, 0.0, 0.0), &Vector3::z(), 1.0);
        let b = Primitive::oriented_point(&Point3::new(1.0, 0.0, 0.0), &Vector3::z(), 1.0);
        assert_eq!(a.primitive_type(), PrimitiveType::Plane);

        let merged = Primitive::merge(&a, &b, 1.0, 1.0);
        assert_eq!(merged.primitive_type(), PrimitiveType::Plane);
        assert_relative_eq!(merged.normal().unwrap().z, 1.0, epsilon = 1e-12);
        assert_relative_eq!(merged.rms_residual(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn merge_with_null_returns_other() {
        let a = Primitive::fit(&[Point3::new(1.0, 0.0, 0.0)]);
        let merged = Primitive::merge(&Primitive::null(), &a, 0.0, 1.0);
        assert_eq!(merged, a);
    }

    #[test]
    fn rms_residual_of_tilted_points() {
        let p = Primitive::oriented_point(&Point3::origin(), &Vector3::z(), 1.0);
        let q = Primitive::oriented_point(&Point3::new(0.0, 0.0, 2.0), &Vector3::z(), 1.0);
        // Both normals run along the segment, so no plane contains it.
        let merged = Primitive::merge(&p, &q, 1.0, 1.0);
        assert_eq!(merged.primitive_type(), PrimitiveType::Line);
        assert_relative_eq!(merged.rms_residual(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn reduce_plane_to_line_and_point() {
        let plane = Primitive::fit(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(4.0, 1.0, 0.0),
        ]);
        let line = plane.clone().reduce_to(PrimitiveType::Line);
        assert_eq!(line.primitive_type(), PrimitiveType::Line);
        assert_relative_eq!(line.line().unwrap().direction.x.abs(), 1.0, epsilon = 1e-9);

        let point = plane.reduce_to(PrimitiveType::Point);
        assert_eq!(point.primitive_type(), PrimitiveType::Point);
    }

    #[test]
    fn planar_grid_penalizes_in_plane_gaps() {
        let points: Vec<_> = (0..5)
            .flat_map(|i| (0..5).map(move |j| Point3::new(i as f64 * 0.1, j as f64 * 0.1, 0.0)))
            .collect();
        let prim = Primitive::fit(&points).with_planar_grid(&points, 0.1);
        assert_eq!(prim.primitive_type(), PrimitiveType::PlanarGrid);
        let on_patch = prim.distance(&Point3::new(0.2, 0.2, 0.05));
        assert!(on_patch >= 0.05 - 1e-9 && on_patch < 0.08);
        assert!(prim.distance(&Point3::new(2.0, 0.2, 0.0)) > 0.3);

        let plain = prim.reduce_to(PrimitiveType::Plane);
        assert_eq!(plain.primitive_type(), PrimitiveType::Plane);
    }

    #[test]
    fn type_names_round_trip() {
        for ty in [
            PrimitiveType::Null,
            PrimitiveType::Point,
            PrimitiveType::Line,
            PrimitiveType::Plane,
            PrimitiveType::PlanarGrid,
        ] {
            assert_eq!(PrimitiveType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(PrimitiveType::parse("cone"), None);
    }

    #[test]
    fn plane_coefficients_normalize() {
        let plane = Plane3::from_coefficients([0.0, 0.0, 2.0, -4.0]).unwrap();
        assert_relative_eq!(plane.d, -2.0);
        assert!(Plane3::from_coefficients([0.0, 0.0, 0.0, 1.0]).is_none());
    }
}
