// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Triangle mesh input and per-vertex segment labels.
//!
//! Each face becomes one sample: centroid position, unit face normal, the
//! first edge as tangent, and the face area. Candidate neighbors are the
//! faces sharing an edge.

use std::f64::consts::PI;

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use surfseg_geometry::PrimitiveType;
use tracing::debug;

use crate::element::{Connectivity, ElementSource};
use crate::error::{Error, Result};
use crate::params::SegmentationParams;
use crate::report::SegmentIndexFile;
use crate::segmentation::{Segmentation, SegmentationSummary};

/// Indexed triangle mesh.
#[derive(Debug, Clone, Default)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3<f64>>,
    /// Vertex indices, counter-clockwise when seen from the front.
    pub triangles: Vec<[u32; 3]>,
    /// Optional RGB per vertex, channels in `[0, 1]`.
    pub vertex_colors: Vec<Vector3<f64>>,
}

impl TriangleMesh {
    /// Creates a mesh, rejecting triangles that reference missing vertices.
    pub fn new(vertices: Vec<Point3<f64>>, triangles: Vec<[u32; 3]>) -> Result<Self> {
        let n = vertices.len();
        if let Some((face, tri)) = triangles
            .iter()
            .enumerate()
            .find(|(_, tri)| tri.iter().any(|&v| v as usize >= n))
        {
            return Err(Error::InvalidInput(format!(
                "triangle {face} {tri:?} references a vertex beyond {n}"
            )));
        }
        Ok(Self {
            vertices,
            triangles,
            vertex_colors: Vec::new(),
        })
    }

    pub fn with_vertex_colors(mut self, colors: Vec<Vector3<f64>>) -> Result<Self> {
        if colors.len() != self.vertices.len() {
            return Err(Error::InvalidInput(format!(
                "vertex_colors has {} entries, expected {}",
                colors.len(),
                self.vertices.len()
            )));
        }
        self.vertex_colors = colors;
        Ok(self)
    }

    pub fn n_faces(&self) -> usize {
        self.triangles.len()
    }

    #[inline]
    fn corners(&self, face: usize) -> [Point3<f64>; 3] {
        let [a, b, c] = self.triangles[face];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    /// Unit face normal, zero for degenerate faces.
    pub fn face_normal(&self, face: usize) -> Vector3<f64> {
        let [a, b, c] = self.corners(face);
        let n = (b - a).cross(&(c - a));
        let len = n.norm();
        if len > 0.0 && len.is_finite() {
            n / len
        } else {
            Vector3::zeros()
        }
    }

    pub fn face_area(&self, face: usize) -> f64 {
        let [a, b, c] = self.corners(face);
        0.5 * (b - a).cross(&(c - a)).norm()
    }

    pub fn face_centroid(&self, face: usize) -> Point3<f64> {
        let [a, b, c] = self.corners(face);
        Point3::from((a.coords + b.coords + c.coords) / 3.0)
    }

    /// Faces sharing an edge with each face, ascending.
    pub fn face_adjacency(&self) -> Vec<Vec<usize>> {
        let mut edges: FxHashMap<(u32, u32), SmallVec<[usize; 2]>> = FxHashMap::default();
        for (face, &[a, b, c]) in self.triangles.iter().enumerate() {
            for (u, v) in [(a, b), (b, c), (c, a)] {
                if u != v {
                    edges.entry((u.min(v), u.max(v))).or_default().push(face);
                }
            }
        }

        let mut adjacency = vec![Vec::new(); self.triangles.len()];
        for faces in edges.values() {
            for &f in faces {
                for &g in faces {
                    if f != g {
                        adjacency[f].push(g);
                    }
                }
            }
        }
        for list in &mut adjacency {
            list.sort_unstable();
            list.dedup();
        }
        adjacency
    }

    /// Labels every vertex with the label held by most of its incident faces;
    /// ties go to the smallest label. Negative face labels do not vote, and a
    /// vertex without labeled faces gets `-1`.
    pub fn vertex_segments(&self, face_labels: &[i32]) -> Vec<i32> {
        let mut votes: Vec<SmallVec<[i32; 8]>> = vec![SmallVec::new(); self.vertices.len()];
        for (tri, &label) in self.triangles.iter().zip(face_labels) {
            if label < 0 {
                continue;
            }
            for &v in tri {
                votes[v as usize].push(label);
            }
        }

        votes
            .iter_mut()
            .map(|labels| {
                labels.sort_unstable();
                let mut best = -1;
                let mut best_count = 0;
                let mut i = 0;
                while i < labels.len() {
                    let run = labels[i..].iter().take_while(|&&l| l == labels[i]).count();
                    if run > best_count {
                        best = labels[i];
                        best_count = run;
                    }
                    i += run;
                }
                best
            })
            .collect()
    }
}

impl ElementSource for TriangleMesh {
    fn len(&self) -> usize {
        self.triangles.len()
    }

    fn position(&self, i: usize) -> Point3<f64> {
        self.face_centroid(i)
    }

    fn normal(&self, i: usize) -> Vector3<f64> {
        self.face_normal(i)
    }

    fn tangent(&self, i: usize) -> Vector3<f64> {
        let [a, b, _] = self.corners(i);
        (b - a).try_normalize(0.0).unwrap_or_else(Vector3::zeros)
    }

    /// Radius of the disk with the face's area.
    fn radii(&self, i: usize) -> [f64; 2] {
        let r = (self.face_area(i) / PI).sqrt();
        [r, r]
    }

    fn area(&self, i: usize) -> f64 {
        self.face_area(i)
    }

    fn color(&self, i: usize) -> Vector3<f64> {
        if self.vertex_colors.is_empty() {
            return Vector3::zeros();
        }
        let [a, b, c] = self.triangles[i];
        (self.vertex_colors[a as usize] + self.vertex_colors[b as usize] + self.vertex_colors[c as usize])
            / 3.0
    }

    fn connectivity(&self) -> Connectivity {
        Connectivity::Explicit(self.face_adjacency())
    }

    fn validate(&self) -> Result<()> {
        if !self.vertex_colors.is_empty() && self.vertex_colors.len() != self.vertices.len() {
            return Err(Error::InvalidInput(format!(
                "vertex_colors has {} entries, expected {}",
                self.vertex_colors.len(),
                self.vertices.len()
            )));
        }
        Ok(())
    }
}

/// Result of [`segment_mesh`].
#[derive(Debug, Clone)]
pub struct MeshSegmentation {
    pub summary: SegmentationSummary,
    /// Segment id per face, `-1` for unclustered faces.
    pub face_labels: Vec<i32>,
    /// Segment id per vertex by majority of incident faces.
    pub vertex_labels: Vec<i32>,
}

impl MeshSegmentation {
    pub fn to_segment_index_file(&self, scene_id: impl Into<String>) -> SegmentIndexFile {
        SegmentIndexFile::new(scene_id, self.vertex_labels.clone())
    }
}

/// Segments a mesh face by face and votes the face labels onto vertices.
pub fn segment_mesh(
    mesh: &TriangleMesh,
    params: SegmentationParams,
    primitive_type: PrimitiveType,
) -> Result<MeshSegmentation> {
    let mut segmentation = Segmentation::new(params)?;
    segmentation.load_points(mesh)?;
    let summary = segmentation.create_clusters(primitive_type)?;
    let face_labels = segmentation.source_labels(mesh.n_faces());
    let vertex_labels = mesh.vertex_segments(&face_labels);
    debug!(
        faces = mesh.n_faces(),
        vertices = mesh.vertices.len(),
        segments = summary.clusters,
        "segmented mesh"
    );
    Ok(MeshSegmentation {
        summary,
        face_labels,
        vertex_labels,
    })
}

/// Segments several meshes in parallel. Each mesh gets its own
/// [`Segmentation`]; results are returned in input order, and one failing
/// mesh does not affect the others.
pub fn segment_meshes(
    meshes: &[TriangleMesh],
    params: &SegmentationParams,
    primitive_type: PrimitiveType,
) -> Vec<Result<MeshSegmentation>> {
    meshes
        .par_iter()
        .map(|mesh| segment_mesh(mesh, params.clone(), primitive_type))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Two unit squares folded along the y axis: a floor (faces 0, 1) and a
    /// wall (faces 2, 3).
    fn folded_squares() -> TriangleMesh {
        let vertices = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(0.0, 1.0, 1.0),
        ];
        let triangles = vec![[0, 1, 2], [0, 2, 3], [0, 3, 5], [0, 5, 4]];
        TriangleMesh::new(vertices, triangles).unwrap()
    }

    #[test]
    fn out_of_range_vertex_is_rejected() {
        let err = TriangleMesh::new(vec![Point3::origin(); 2], vec![[0, 1, 2]]);
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn face_attributes() {
        let mesh = folded_squares();
        assert_relative_eq!(mesh.face_normal(0), Vector3::z(), epsilon = 1e-12);
        assert_relative_eq!(mesh.face_normal(2), Vector3::x(), epsilon = 1e-12);
        assert_relative_eq!(mesh.face_area(1), 0.5, epsilon = 1e-12);
        assert_relative_eq!(
            mesh.face_centroid(0),
            Point3::new(2.0 / 3.0, 1.0 / 3.0, 0.0),
            epsilon = 1e-12
        );
        let [r1, r2] = mesh.radii(0);
        assert_relative_eq!(PI * r1 * r2, 0.5, epsilon = 1e-12);
        assert_relative_eq!(mesh.tangent(0), Vector3::x(), epsilon = 1e-12);
    }

    #[test]
    fn degenerate_face_has_zero_normal() {
        let mesh = TriangleMesh::new(
            vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)],
            vec![[0, 1, 2]],
        )
        .unwrap();
        assert_eq!(mesh.face_normal(0), Vector3::zeros());
        assert_eq!(mesh.face_area(0), 0.0);
    }

    #[test]
    fn adjacency_follows_shared_edges() {
        let mesh = folded_squares();
        assert_eq!(mesh.face_adjacency(), vec![vec![1], vec![0, 2], vec![1, 3], vec![2]]);
    }

    #[test]
    fn vertex_votes_break_ties_toward_smaller_labels() {
        let mesh = folded_squares();
        let votes = mesh.vertex_segments(&[0, 0, 1, 1]);
        // Vertex 0 touches all four faces; vertex 3 one floor and one wall face.
        assert_eq!(votes, vec![0, 0, 0, 0, 1, 1]);

        let votes = mesh.vertex_segments(&[-1, -1, 1, 1]);
        assert_eq!(votes, vec![1, -1, -1, 1, 1, 1]);
    }

    #[test]
    fn batch_keeps_input_order_and_isolates_failures() {
        let empty = TriangleMesh::default();
        let results = segment_meshes(
            &[folded_squares(), empty],
            &SegmentationParams::default(),
            PrimitiveType::Plane,
        );
        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.face_labels.len(), 4);
        assert!(matches!(results[1], Err(Error::EmptyInput)));
    }

    #[test]
    fn vertex_colors_average_onto_faces() {
        let colors = (0..6).map(|i| Vector3::repeat(i as f64 / 5.0)).collect();
        let mesh = folded_squares().with_vertex_colors(colors).unwrap();
        assert_relative_eq!(mesh.color(0), Vector3::repeat(0.2), epsilon = 1e-12);
        assert!(folded_squares().with_vertex_colors(Vec::new()).is_err());
    }
}
