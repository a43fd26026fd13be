// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Surfseg Geometry
//!
//! Geometric building blocks for point-cloud segmentation: bounding boxes,
//! weighted moments, primitive fitting (point, line, plane, planar grid) and
//! an R*-tree spatial index over sample positions.

pub mod bbox;
pub mod grid;
pub mod moments;
pub mod primitive;
pub mod spatial;

// Re-export nalgebra types for convenience
pub use nalgebra::{Point3, Vector3};

pub use bbox::Aabb;
pub use grid::PlanarGrid;
pub use moments::{Moments, PrincipalAxes};
pub use primitive::{Line3, Plane3, Primitive, PrimitiveType, Shape};
pub use spatial::SpatialIndex;
