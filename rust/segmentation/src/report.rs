// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster reports and segment index files.
//!
//! The ascii report is line oriented:
//!
//! ```text
//! # clusters <n>
//! <id> <type> <coefficients...> <npoints> <min x y z> <max x y z> <r g b> <area>
//! ```
//!
//! The coefficient count depends on the type: none for `null`, a position for
//! `point`, a position and a direction for `line`, and `a b c d` for `plane`
//! and `planar_grid`. Floats use shortest round-trip formatting, so parsing a
//! report reproduces the written values exactly.
//!
//! Segment index files are JSON documents `{"sceneId", "segIndices"}` with one
//! segment id per mesh vertex.

use std::fmt::Write as _;
use std::io::{Read, Write};

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use surfseg_geometry::{Aabb, Plane3, PrimitiveType, Shape};

use crate::cluster::Cluster;
use crate::error::{Error, Result};

/// Number of coefficients written for a primitive type.
pub fn coefficient_count(primitive_type: PrimitiveType) -> usize {
    match primitive_type {
        PrimitiveType::Null => 0,
        PrimitiveType::Point => 3,
        PrimitiveType::Line => 6,
        PrimitiveType::Plane | PrimitiveType::PlanarGrid => 4,
    }
}

/// One line of an ascii cluster report.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRecord {
    pub id: usize,
    pub primitive_type: PrimitiveType,
    pub coefficients: Vec<f64>,
    pub npoints: usize,
    pub bbox: Aabb,
    pub color: Vector3<f64>,
    pub area: f64,
}

impl ClusterRecord {
    pub fn from_cluster(id: usize, cluster: &Cluster) -> Self {
        let primitive = &cluster.primitive;
        let coefficients = match &primitive.shape {
            Shape::Null => Vec::new(),
            Shape::Point => primitive.centroid.coords.iter().copied().collect(),
            Shape::Line(line) => line
                .point
                .coords
                .iter()
                .chain(line.direction.iter())
                .copied()
                .collect(),
            Shape::Plane(plane) | Shape::PlanarGrid(plane, _) => plane.coefficients().to_vec(),
        };
        Self {
            id,
            primitive_type: primitive.primitive_type(),
            coefficients,
            npoints: cluster.npoints,
            bbox: primitive.bbox,
            color: cluster.color(),
            area: cluster.area,
        }
    }

    /// The plane of a `plane` or `planar_grid` record.
    pub fn plane(&self) -> Option<Plane3> {
        if !self.primitive_type.is_planar() {
            return None;
        }
        let c: [f64; 4] = self.coefficients.as_slice().try_into().ok()?;
        Plane3::from_coefficients(c)
    }

    fn write_line(&self, out: &mut String) {
        // Writing into a String cannot fail.
        let _ = write!(out, "{} {}", self.id, self.primitive_type);
        for c in &self.coefficients {
            let _ = write!(out, " {c}");
        }
        let _ = write!(out, " {}", self.npoints);
        for v in self
            .bbox
            .min
            .coords
            .iter()
            .chain(self.bbox.max.coords.iter())
            .chain(self.color.iter())
        {
            let _ = write!(out, " {v}");
        }
        let _ = writeln!(out, " {}", self.area);
    }

    fn parse_line(line_no: usize, line: &str) -> Result<Self> {
        let err = |message: String| Error::Parse {
            line: line_no,
            message,
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 2 {
            return Err(err("expected an id and a primitive type".to_string()));
        }
        let id = tokens[0]
            .parse::<usize>()
            .map_err(|e| err(format!("bad cluster id {:?}: {e}", tokens[0])))?;
        let primitive_type = PrimitiveType::parse(tokens[1])
            .ok_or_else(|| err(format!("unknown primitive type {:?}", tokens[1])))?;

        let k = coefficient_count(primitive_type);
        let expected = 2 + k + 1 + 6 + 3 + 1;
        if tokens.len() != expected {
            return Err(err(format!(
                "expected {expected} fields for a {primitive_type} record, found {}",
                tokens.len()
            )));
        }

        let float = |i: usize| -> Result<f64> {
            tokens[i]
                .parse::<f64>()
                .map_err(|e| err(format!("field {}: bad number {:?}: {e}", i + 1, tokens[i])))
        };
        let coefficients = (2..2 + k).map(&float).collect::<Result<Vec<f64>>>()?;
        let npoints = tokens[2 + k]
            .parse::<usize>()
            .map_err(|e| err(format!("bad point count {:?}: {e}", tokens[2 + k])))?;
        let base = 3 + k;
        let min = Point3::new(float(base)?, float(base + 1)?, float(base + 2)?);
        let max = Point3::new(float(base + 3)?, float(base + 4)?, float(base + 5)?);
        let color = Vector3::new(float(base + 6)?, float(base + 7)?, float(base + 8)?);
        let area = float(base + 9)?;

        Ok(Self {
            id,
            primitive_type,
            coefficients,
            npoints,
            bbox: Aabb::new(min, max),
            color,
            area,
        })
    }
}

/// Renders records as an ascii report.
pub fn format_ascii_report(records: &[ClusterRecord]) -> String {
    let mut out = format!("# clusters {}\n", records.len());
    for record in records {
        record.write_line(&mut out);
    }
    out
}

/// Writes records as an ascii report.
pub fn write_ascii_report<W: Write>(mut writer: W, records: &[ClusterRecord]) -> Result<()> {
    writer.write_all(format_ascii_report(records).as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Parses an ascii report. Blank lines are ignored; the header must come
/// first and its count must match the number of records.
pub fn parse_ascii_report(text: &str) -> Result<Vec<ClusterRecord>> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let (header_line, header) = lines.next().ok_or(Error::Parse {
        line: 1,
        message: "missing header".to_string(),
    })?;
    let declared = header
        .strip_prefix('#')
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix("clusters"))
        .and_then(|count| count.trim().parse::<usize>().ok())
        .ok_or_else(|| Error::Parse {
            line: header_line,
            message: format!("expected `# clusters <n>`, found {header:?}"),
        })?;

    let records = lines
        .map(|(line_no, line)| ClusterRecord::parse_line(line_no, line))
        .collect::<Result<Vec<_>>>()?;
    if records.len() != declared {
        return Err(Error::Parse {
            line: header_line,
            message: format!("header declares {declared} clusters, found {}", records.len()),
        });
    }
    Ok(records)
}

/// Reads and parses an ascii report.
pub fn read_ascii_report<R: Read>(mut reader: R) -> Result<Vec<ClusterRecord>> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    parse_ascii_report(&text)
}

/// Per-vertex segment ids of a mesh scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentIndexFile {
    #[serde(rename = "sceneId")]
    pub scene_id: String,
    #[serde(rename = "segIndices")]
    pub seg_indices: Vec<i32>,
}

impl SegmentIndexFile {
    pub fn new(scene_id: impl Into<String>, seg_indices: Vec<i32>) -> Self {
        Self {
            scene_id: scene_id.into(),
            seg_indices,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn read<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}
