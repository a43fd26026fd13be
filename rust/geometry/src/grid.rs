// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Occupancy raster in the frame of a plane.
//!
//! A planar grid remembers which square cells of its plane are covered by
//! member points, so that distance queries can penalize points that lie on
//! the plane but far from the occupied region.

use nalgebra::{Point3, Vector3};
use rustc_hash::FxHashSet;

use crate::primitive::Plane3;

/// Number of rings searched around an empty cell before giving up.
pub const GRID_SEARCH_RINGS: i32 = 3;

/// Square occupancy raster laid out on a plane.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarGrid {
    /// Projection of the raster origin onto the plane.
    pub origin: Point3<f64>,
    pub axis_u: Vector3<f64>,
    pub axis_v: Vector3<f64>,
    /// Cell side length.
    pub spacing: f64,
    pub cells: FxHashSet<(i32, i32)>,
}

impl PlanarGrid {
    /// Creates an empty raster on `plane` anchored at the projection of
    /// `origin`.
    pub fn new(plane: &Plane3, origin: &Point3<f64>, spacing: f64) -> Self {
        let (axis_u, axis_v) = plane_axes(&plane.normal);
        Self {
            origin: plane.project(origin),
            axis_u,
            axis_v,
            spacing: spacing.max(f64::EPSILON),
            cells: FxHashSet::default(),
        }
    }

    /// Rasterizes a point set.
    pub fn from_points(plane: &Plane3, origin: &Point3<f64>, spacing: f64, points: &[Point3<f64>]) -> Self {
        let mut grid = Self::new(plane, origin, spacing);
        for p in points {
            grid.insert(p);
        }
        grid
    }

    /// Marks the cell under `p` as occupied.
    pub fn insert(&mut self, p: &Point3<f64>) {
        let cell = self.cell_of(p);
        self.cells.insert(cell);
    }

    /// Cell coordinates of the projection of `p`.
    pub fn cell_of(&self, p: &Point3<f64>) -> (i32, i32) {
        let d = p - self.origin;
        (
            (d.dot(&self.axis_u) / self.spacing).floor() as i32,
            (d.dot(&self.axis_v) / self.spacing).floor() as i32,
        )
    }

    /// World-space center of a cell.
    pub fn cell_center(&self, cell: (i32, i32)) -> Point3<f64> {
        self.origin
            + self.axis_u * ((cell.0 as f64 + 0.5) * self.spacing)
            + self.axis_v * ((cell.1 as f64 + 0.5) * self.spacing)
    }

    /// Number of occupied cells.
    pub fn occupied_count(&self) -> usize {
        self.cells.len()
    }

    /// Area covered by occupied cells.
    pub fn occupied_area(&self) -> f64 {
        self.cells.len() as f64 * self.spacing * self.spacing
    }

    /// In-plane distance from the projection of `p` to the occupied region.
    ///
    /// Zero inside an occupied cell; otherwise approximated by the ring index
    /// of the first occupied cell found, capped at [`GRID_SEARCH_RINGS`].
    pub fn gap(&self, p: &Point3<f64>) -> f64 {
        let (cu, cv) = self.cell_of(p);
        if self.cells.contains(&(cu, cv)) {
            return 0.0;
        }
        for ring in 1..=GRID_SEARCH_RINGS {
            for du in -ring..=ring {
                for dv in -ring..=ring {
                    if du.abs() != ring && dv.abs() != ring {
                        continue;
                    }
                    if self.cells.contains(&(cu + du, cv + dv)) {
                        return (ring as f64 - 0.5) * self.spacing;
                    }
                }
            }
        }
        (GRID_SEARCH_RINGS as f64 + 0.5) * self.spacing
    }

    /// Re-rasterizes the occupied cell centers of `grids` onto a new plane.
    pub fn resample<'a>(
        plane: &Plane3,
        origin: &Point3<f64>,
        spacing: f64,
        grids: impl IntoIterator<Item = &'a PlanarGrid>,
    ) -> Self {
        let mut merged = Self::new(plane, origin, spacing);
        for grid in grids {
            for &cell in &grid.cells {
                merged.insert(&grid.cell_center(cell));
            }
        }
        merged
    }
}

/// Two unit vectors spanning the plane orthogonal to `normal`.
pub fn plane_axes(normal: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let n = normal.normalize();
    let helper = if n.x.abs() <= n.y.abs() && n.x.abs() <= n.z.abs() {
        Vector3::x()
    } else if n.y.abs() <= n.z.abs() {
        Vector3::y()
    } else {
        Vector3::z()
    };
    let u = n.cross(&helper).normalize();
    let v = n.cross(&u);
    (u, v)
}
