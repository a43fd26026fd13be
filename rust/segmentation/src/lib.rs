// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Surfseg
//!
//! Clustering and primitive-fitting segmentation of oriented point samples.
//!
//! Samples come from RGB-D images (one surfel per pixel), triangle meshes (one
//! sample per face) or plain point clouds. A [`Segmentation`] builds a
//! neighbor graph over them, groups them into clusters that each fit a
//! geometric primitive (point, line, plane, or planar grid), then refines,
//! merges, splits and smooths those clusters until they are stable.
//!
//! ```no_run
//! use surfseg::{ElementBuffers, PrimitiveType, Segmentation, SegmentationParams};
//! # fn run(buffers: ElementBuffers) -> surfseg::Result<()> {
//! let mut segmentation = Segmentation::new(SegmentationParams::default())?;
//! segmentation.load_points(&buffers)?;
//! let summary = segmentation.create_clusters(PrimitiveType::Plane)?;
//! println!("{} clusters", summary.clusters);
//! let labels = segmentation.point_labels();
//! # let _ = labels;
//! # Ok(())
//! # }
//! ```
//!
//! Clusters and pairs live in generational slot maps, so a key to a merged or
//! deleted cluster stops resolving instead of aliasing a newer one.

pub mod affinity;
pub mod boundary;
pub mod cluster;
pub mod element;
pub mod error;
pub mod heap;
mod initialize;
pub mod keys;
pub mod merge;
pub mod mesh;
mod neighbors;
pub mod output;
pub mod params;
pub mod point;
pub mod refine;
pub mod report;
pub mod segmentation;
mod split;

pub use boundary::{refine_labels, BoundaryRefinement};
pub use cluster::{Cluster, Pair};
pub use element::{Connectivity, ElementBuffers, ElementSource};
pub use error::{Error, Result};
pub use keys::{ClusterKey, PairKey, PointIndex};
pub use merge::MergeOutcome;
pub use mesh::{segment_mesh, segment_meshes, MeshSegmentation, TriangleMesh};
pub use output::SurfelGroup;
pub use params::SegmentationParams;
pub use point::{flags, Point};
pub use refine::RefinementOutcome;
pub use report::{
    format_ascii_report, parse_ascii_report, read_ascii_report, write_ascii_report,
    ClusterRecord, SegmentIndexFile,
};
pub use segmentation::{Segmentation, SegmentationState, SegmentationSummary};

pub use surfseg_geometry::{Aabb, Plane3, Primitive, PrimitiveType, Shape};
