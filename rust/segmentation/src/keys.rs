// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Key types for arena-based cluster storage.
//!
//! Clusters and pairs are created and destroyed constantly while merging, so
//! they live in `slotmap::SlotMap`s. Keys are generational: a key to a merged
//! or deleted cluster stops resolving instead of aliasing whatever reuses the
//! slot. Points never move once loaded and are addressed by plain index.

use slotmap::new_key_type;

new_key_type! {
    /// Key for a cluster (a node of the merge forest).
    pub struct ClusterKey;

    /// Key for a pair of adjacent clusters.
    pub struct PairKey;
}

/// Index of a point in the segmentation's point arena.
pub type PointIndex = usize;
