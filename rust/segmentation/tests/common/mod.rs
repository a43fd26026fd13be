// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthetic scenes shared by the scenario tests.

#![allow(dead_code)]

use nalgebra::{Point3, Unit, UnitQuaternion, Vector3};
use surfseg::{Connectivity, ElementBuffers, Segmentation, TriangleMesh};

/// Deterministic xorshift64* generator so scenes are reproducible.
pub struct TestRng(u64);

impl TestRng {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Standard normal sample (Box-Muller).
    pub fn gaussian(&mut self) -> f64 {
        let u1 = self.next_f64().max(f64::MIN_POSITIVE);
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
    }
}

/// Tilts `normal` by a Gaussian angle (clamped to `max_angle`) about a random
/// axis perpendicular to it.
pub fn perturb(normal: &Vector3<f64>, rng: &mut TestRng, sigma: f64, max_angle: f64) -> Vector3<f64> {
    let angle = (rng.gaussian() * sigma).clamp(-max_angle, max_angle);
    let helper = if normal.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let u = normal.cross(&helper).normalize();
    let v = normal.cross(&u);
    let phi = std::f64::consts::TAU * rng.next_f64();
    let axis = Unit::new_normalize(u * phi.cos() + v * phi.sin());
    UnitQuaternion::from_axis_angle(&axis, angle) * normal
}

pub const SPACING: f64 = 0.05;

/// A `size × size` image whose left half lies on the floor `z = 0` (normal
/// +z) and whose right half rises as the wall `x = (size/2 - 0.5)·h`
/// (normal -x), with normals perturbed by up to one degree.
pub fn crease_points(size: usize, seed: u64) -> (Vec<Point3<f64>>, Vec<Vector3<f64>>) {
    let mut rng = TestRng::new(seed);
    let half = size / 2;
    let sigma = 0.5_f64.to_radians();
    let max_angle = 1.0_f64.to_radians();
    let mut positions = Vec::with_capacity(size * size);
    let mut normals = Vec::with_capacity(size * size);
    for i in 0..size * size {
        let (u, v) = (i % size, i / size);
        let y = v as f64 * SPACING;
        if u < half {
            positions.push(Point3::new(u as f64 * SPACING, y, 0.0));
            normals.push(perturb(&Vector3::z(), &mut rng, sigma, max_angle));
        } else {
            let wall_x = (half as f64 - 0.5) * SPACING;
            let z = (u as f64 - half as f64 + 0.5) * SPACING;
            positions.push(Point3::new(wall_x, y, z));
            normals.push(perturb(&-Vector3::x(), &mut rng, sigma, max_angle));
        }
    }
    (positions, normals)
}

pub fn crease_image(size: usize, seed: u64) -> ElementBuffers {
    let (positions, normals) = crease_points(size, seed);
    ElementBuffers::new(positions)
        .with_normals(normals)
        .with_connectivity(Connectivity::ImageGrid {
            width: size,
            height: size,
            diagonal: false,
        })
}

/// The same crease as an unstructured cloud with spatial neighbor queries.
pub fn crease_cloud(size: usize, seed: u64) -> ElementBuffers {
    let (positions, normals) = crease_points(size, seed);
    ElementBuffers::new(positions).with_normals(normals)
}

/// A floor grid of `n × n` quads in `z = 0` and a wall grid of `n × n` quads
/// in `x = 0`, sharing the crease edge along the y axis. Floor faces come
/// first.
pub fn folded_mesh(n: usize) -> TriangleMesh {
    let mut vertices = Vec::new();
    // Floor vertices (i, j) for i, j in 0..=n; i = 0 is the crease.
    for j in 0..=n {
        for i in 0..=n {
            vertices.push(Point3::new(i as f64 * SPACING, j as f64 * SPACING, 0.0));
        }
    }
    let floor = |i: usize, j: usize| (j * (n + 1) + i) as u32;
    // Wall vertices (k, j) for k in 1..=n; k = 0 reuses the crease.
    let wall_base = vertices.len();
    for j in 0..=n {
        for k in 1..=n {
            vertices.push(Point3::new(0.0, j as f64 * SPACING, k as f64 * SPACING));
        }
    }
    let wall = |k: usize, j: usize| {
        if k == 0 {
            floor(0, j)
        } else {
            (wall_base + j * n + (k - 1)) as u32
        }
    };

    let mut triangles = Vec::new();
    for j in 0..n {
        for i in 0..n {
            let (a, b, c, d) = (floor(i, j), floor(i + 1, j), floor(i + 1, j + 1), floor(i, j + 1));
            triangles.push([a, b, c]);
            triangles.push([a, c, d]);
        }
    }
    for j in 0..n {
        for k in 0..n {
            let (a, b, c, d) = (wall(k, j), wall(k, j + 1), wall(k + 1, j + 1), wall(k + 1, j));
            triangles.push([a, b, c]);
            triangles.push([a, c, d]);
        }
    }
    TriangleMesh::new(vertices, triangles).expect("valid mesh")
}

/// Checks every point is owned by at most one top-level cluster, that the
/// owner lists it, and that nothing is lost.
pub fn assert_partition(seg: &Segmentation) {
    let mut owners = vec![0usize; seg.n_points()];
    let mut total = 0;
    for (key, cluster) in seg.clusters() {
        total += cluster.points.len();
        assert_eq!(cluster.points.len(), cluster.npoints());
        for &p in &cluster.points {
            owners[p] += 1;
            assert_eq!(seg.points()[p].cluster, Some(key));
        }
    }
    assert!(owners.iter().all(|&n| n <= 1));
    for (p, &n) in owners.iter().enumerate() {
        if n == 0 {
            assert!(seg.points()[p].cluster.is_none());
            assert!(seg.params().allow_outlier_points);
        }
    }
    assert_eq!(total + seg.unassigned_points(), seg.n_points());
}
