// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-element attribute input.
//!
//! A segmentation consumes N elements (RGB-D pixels, mesh faces, or free
//! samples) through the [`ElementSource`] trait. Only positions are required;
//! every other attribute has a neutral default. The source also declares how
//! neighbor candidates are found, via [`Connectivity`].

use std::f64::consts::PI;

use nalgebra::{Point3, Vector3};

use crate::error::{Error, Result};

/// How neighbor candidates are enumerated for an element set.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Connectivity {
    /// Pixels of a `width × height` image; source indices are pixel indices.
    /// Candidates are the 4-connected pixels, plus diagonals when `diagonal`.
    ImageGrid {
        width: usize,
        height: usize,
        diagonal: bool,
    },
    /// Explicit candidate lists in element index space (mesh face adjacency).
    Explicit(Vec<Vec<usize>>),
    /// Nearest samples found through the spatial index.
    #[default]
    Spatial,
}

/// Accessors for per-element attributes.
pub trait ElementSource {
    /// Number of elements.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn position(&self, i: usize) -> Point3<f64>;

    fn normal(&self, _i: usize) -> Vector3<f64> {
        Vector3::zeros()
    }

    fn tangent(&self, _i: usize) -> Vector3<f64> {
        Vector3::zeros()
    }

    /// Two principal radii of the sample footprint.
    fn radii(&self, _i: usize) -> [f64; 2] {
        [0.0, 0.0]
    }

    /// Footprint area; defaults to the ellipse spanned by the radii.
    fn area(&self, i: usize) -> f64 {
        let [r1, r2] = self.radii(i);
        PI * r1 * r2
    }

    /// RGB color, channels in `[0, 1]`.
    fn color(&self, _i: usize) -> Vector3<f64> {
        Vector3::zeros()
    }

    fn depth(&self, _i: usize) -> Option<f64> {
        None
    }

    fn timestamp(&self, _i: usize) -> Option<f64> {
        None
    }

    fn category(&self, _i: usize) -> Option<u32> {
        None
    }

    fn category_confidence(&self, _i: usize) -> f64 {
        0.0
    }

    /// Object identifier used for same-identifier partitioning.
    fn identifier(&self, _i: usize) -> Option<u32> {
        None
    }

    /// Boundary/attribute bitmask, see [`crate::point::flags`].
    fn flags(&self, _i: usize) -> u32 {
        0
    }

    /// External index (pixel index or mesh face id).
    fn source_index(&self, i: usize) -> usize {
        i
    }

    fn connectivity(&self) -> Connectivity {
        Connectivity::Spatial
    }

    /// Checks internal consistency before loading.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Parallel attribute arrays.
///
/// Optional arrays may be left empty; a non-empty optional array must have one
/// entry per position.
#[derive(Debug, Clone, Default)]
pub struct ElementBuffers {
    pub positions: Vec<Point3<f64>>,
    pub normals: Vec<Vector3<f64>>,
    pub tangents: Vec<Vector3<f64>>,
    pub radii: Vec<[f64; 2]>,
    pub areas: Vec<f64>,
    pub colors: Vec<Vector3<f64>>,
    pub depths: Vec<f64>,
    pub timestamps: Vec<f64>,
    pub categories: Vec<u32>,
    pub category_confidences: Vec<f64>,
    pub identifiers: Vec<u32>,
    pub flags: Vec<u32>,
    pub source_indices: Vec<usize>,
    pub connectivity: Connectivity,
}

impl ElementBuffers {
    /// Creates buffers holding only positions, with spatial connectivity.
    pub fn new(positions: Vec<Point3<f64>>) -> Self {
        Self {
            positions,
            ..Default::default()
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vector3<f64>>) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_radii(mut self, radii: Vec<[f64; 2]>) -> Self {
        self.radii = radii;
        self
    }

    pub fn with_colors(mut self, colors: Vec<Vector3<f64>>) -> Self {
        self.colors = colors;
        self
    }

    pub fn with_flags(mut self, flags: Vec<u32>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_source_indices(mut self, source_indices: Vec<usize>) -> Self {
        self.source_indices = source_indices;
        self
    }

    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }
}

fn check_len(name: &str, len: usize, expected: usize) -> Result<()> {
    if len != 0 && len != expected {
        return Err(Error::InvalidInput(format!(
            "{name} has {len} entries, expected {expected}"
        )));
    }
    Ok(())
}

impl ElementSource for ElementBuffers {
    fn len(&self) -> usize {
        self.positions.len()
    }

    fn position(&self, i: usize) -> Point3<f64> {
        self.positions[i]
    }

    fn normal(&self, i: usize) -> Vector3<f64> {
        self.normals.get(i).copied().unwrap_or_else(Vector3::zeros)
    }

    fn tangent(&self, i: usize) -> Vector3<f64> {
        self.tangents.get(i).copied().unwrap_or_else(Vector3::zeros)
    }

    fn radii(&self, i: usize) -> [f64; 2] {
        self.radii.get(i).copied().unwrap_or([0.0, 0.0])
    }

    fn area(&self, i: usize) -> f64 {
        match self.areas.get(i) {
            Some(&area) => area,
            None => {
                let [r1, r2] = self.radii(i);
                PI * r1 * r2
            }
        }
    }

    fn color(&self, i: usize) -> Vector3<f64> {
        self.colors.get(i).copied().unwrap_or_else(Vector3::zeros)
    }

    fn depth(&self, i: usize) -> Option<f64> {
        self.depths.get(i).copied()
    }

    fn timestamp(&self, i: usize) -> Option<f64> {
        self.timestamps.get(i).copied()
    }

    fn category(&self, i: usize) -> Option<u32> {
        self.categories.get(i).copied()
    }

    fn category_confidence(&self, i: usize) -> f64 {
        self.category_confidences.get(i).copied().unwrap_or(0.0)
    }

    fn identifier(&self, i: usize) -> Option<u32> {
        self.identifiers.get(i).copied()
    }

    fn flags(&self, i: usize) -> u32 {
        self.flags.get(i).copied().unwrap_or(0)
    }

    fn source_index(&self, i: usize) -> usize {
        self.source_indices.get(i).copied().unwrap_or(i)
    }

    fn connectivity(&self) -> Connectivity {
        self.connectivity.clone()
    }

    fn validate(&self) -> Result<()> {
        let n = self.positions.len();
        check_len("normals", self.normals.len(), n)?;
        check_len("tangents", self.tangents.len(), n)?;
        check_len("radii", self.radii.len(), n)?;
        check_len("areas", self.areas.len(), n)?;
        check_len("colors", self.colors.len(), n)?;
        check_len("depths", self.depths.len(), n)?;
        check_len("timestamps", self.timestamps.len(), n)?;
        check_len("categories", self.categories.len(), n)?;
        check_len("category_confidences", self.category_confidences.len(), n)?;
        check_len("identifiers", self.identifiers.len(), n)?;
        check_len("flags", self.flags.len(), n)?;
        check_len("source_indices", self.source_indices.len(), n)?;
        if let Connectivity::Explicit(lists) = &self.connectivity {
            check_len("adjacency", lists.len(), n)?;
        }
        Ok(())
    }
}
