// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Addressable max-heap keyed by slotmap keys.
//!
//! `std::collections::BinaryHeap` cannot remove or reprioritize an arbitrary
//! entry, which merging needs every time a cluster disappears. This heap keeps
//! each key's slot in a `SecondaryMap`, so removal and updates are
//! `O(log n)`. Equal priorities pop in insertion order.

use slotmap::{Key, SecondaryMap};

#[derive(Debug, Clone, Copy)]
struct Entry<K> {
    priority: f64,
    sequence: u64,
    key: K,
}

impl<K> Entry<K> {
    fn outranks(&self, other: &Entry<K>) -> bool {
        self.priority > other.priority
            || (self.priority == other.priority && self.sequence < other.sequence)
    }
}

/// Max-heap of keys ordered by an `f64` priority.
#[derive(Debug, Clone)]
pub struct IndexedHeap<K: Key> {
    entries: Vec<Entry<K>>,
    positions: SecondaryMap<K, usize>,
    next_sequence: u64,
}

impl<K: Key> Default for IndexedHeap<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize(priority: f64) -> f64 {
    if priority.is_nan() {
        f64::NEG_INFINITY
    } else {
        priority
    }
}

impl<K: Key> IndexedHeap<K> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            positions: SecondaryMap::new(),
            next_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: K) -> bool {
        self.positions.contains_key(key)
    }

    pub fn priority(&self, key: K) -> Option<f64> {
        self.positions.get(key).map(|&i| self.entries[i].priority)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }

    /// Inserts `key`, or updates its priority if already queued.
    pub fn push(&mut self, key: K, priority: f64) {
        if self.contains(key) {
            self.update(key, priority);
            return;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let index = self.entries.len();
        self.entries.push(Entry {
            priority: sanitize(priority),
            sequence,
            key,
        });
        self.positions.insert(key, index);
        self.sift_up(index);
    }

    /// Highest-priority key without removing it.
    pub fn peek(&self) -> Option<(K, f64)> {
        self.entries.first().map(|e| (e.key, e.priority))
    }

    pub fn pop(&mut self) -> Option<(K, f64)> {
        let (key, _) = self.peek()?;
        self.remove(key).map(|priority| (key, priority))
    }

    /// Changes the priority of a queued key. Returns `false` if absent.
    pub fn update(&mut self, key: K, priority: f64) -> bool {
        let Some(&index) = self.positions.get(key) else {
            return false;
        };
        self.entries[index].priority = sanitize(priority);
        self.sift_up(index);
        if let Some(&index) = self.positions.get(key) {
            self.sift_down(index);
        }
        true
    }

    /// Removes `key`, returning its priority.
    pub fn remove(&mut self, key: K) -> Option<f64> {
        let index = self.positions.remove(key)?;
        let last = self.entries.len() - 1;
        if index != last {
            self.entries.swap(index, last);
            let moved = self.entries[index].key;
            self.positions.insert(moved, index);
        }
        let removed = self.entries.pop()?;
        if index < self.entries.len() {
            let moved = self.entries[index].key;
            self.sift_up(index);
            if let Some(&at) = self.positions.get(moved) {
                self.sift_down(at);
            }
        }
        Some(removed.priority)
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.positions.insert(self.entries[a].key, a);
        self.positions.insert(self.entries[b].key, b);
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.entries[index].outranks(&self.entries[parent]) {
                break;
            }
            self.swap_entries(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut best = index;
            if left < self.entries.len() && self.entries[left].outranks(&self.entries[best]) {
                best = left;
            }
            if right < self.entries.len() && self.entries[right].outranks(&self.entries[best]) {
                best = right;
            }
            if best == index {
                break;
            }
            self.swap_entries(index, best);
            index = best;
        }
    }
}
