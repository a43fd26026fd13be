// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for segmentation operations.

use crate::segmentation::SegmentationState;

/// Result type alias for segmentation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, clustering, or serializing.
///
/// Degenerate geometry is never an error: primitive fits fall back to lower
/// dimensional shapes instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No points were supplied, or every element was filtered out.
    #[error("no usable input points")]
    EmptyInput,

    /// The spatial index could not be built over the point arena.
    #[error("spatial index construction failed for {0} points")]
    IndexBuildFailure(usize),

    /// The point arena or a cluster container could not be allocated.
    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    /// An operation was invoked out of pipeline order.
    #[error("{operation} is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SegmentationState,
    },

    /// A tunable is out of range.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Element buffers or adjacency are inconsistent.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An ascii cluster report could not be parsed.
    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(e: std::collections::TryReserveError) -> Self {
        Error::AllocationFailure(e.to_string())
    }
}
