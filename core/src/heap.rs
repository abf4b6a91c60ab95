//! Bounded priority queue used as a "keep the K best" accumulator.
//!
//! `Heap` is a binary min-heap over `f64` keys: the smallest key sits at the
//! root. Scores throughout the crate are higher-is-better, so the root is the
//! current worst survivor and pruning a heap back to K entries is a matter of
//! calling [`Heap::remove`] until `count() <= K`. The bound is not stored in
//! the heap itself; callers enforce it (see [`Heap::push_bounded`]).
//!
//! # Example
//! ```
//! use libtranslit_core::Heap;
//!
//! let mut heap = Heap::new();
//! heap.insert(5.0, 'x');
//! heap.insert(2.0, 'y');
//! heap.insert(8.0, 'z');
//! assert_eq!(heap.peek(), Some(&'y'));
//! assert_eq!(heap.remove(), Some('y'));
//! assert_eq!(heap.peek(), Some(&'x'));
//! ```

/// A single heap entry.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapNode<V> {
    pub key: f64,
    pub value: V,
}

/// Binary min-heap keyed by `f64`.
#[derive(Debug, Clone)]
pub struct Heap<V> {
    nodes: Vec<HeapNode<V>>,
}

impl<V> Default for Heap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Heap<V> {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Create an empty heap with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    /// Insert an entry. O(log n).
    pub fn insert(&mut self, key: f64, value: V) {
        self.nodes.push(HeapNode { key, value });
        let last = self.nodes.len() - 1;
        self.sift_up(last);
    }

    /// Insert an entry, then drop roots until at most `bound` entries remain.
    ///
    /// Returns the number of entries dropped.
    pub fn push_bounded(&mut self, key: f64, value: V, bound: usize) -> usize {
        self.insert(key, value);
        self.prune(bound)
    }

    /// Drop roots until at most `bound` entries remain.
    pub fn prune(&mut self, bound: usize) -> usize {
        let mut dropped = 0;
        while self.nodes.len() > bound {
            self.remove();
            dropped += 1;
        }
        dropped
    }

    /// Pop the root value.
    pub fn remove(&mut self) -> Option<V> {
        self.remove_entry().map(|(_, v)| v)
    }

    /// Pop the root as a `(key, value)` pair.
    pub fn remove_entry(&mut self) -> Option<(f64, V)> {
        if self.nodes.is_empty() {
            return None;
        }
        let root = self.nodes.swap_remove(0);
        if !self.nodes.is_empty() {
            self.sift_down(0);
        }
        Some((root.key, root.value))
    }

    /// Root value without removing it.
    pub fn peek(&self) -> Option<&V> {
        self.nodes.first().map(|n| &n.value)
    }

    /// Root key without removing it.
    pub fn peek_key(&self) -> Option<f64> {
        self.nodes.first().map(|n| n.key)
    }

    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Whether any entry carries exactly `key`. O(n).
    pub fn contains_key(&self, key: f64) -> bool {
        self.nodes.iter().any(|n| n.key == key)
    }

    /// All keys in heap (array) order.
    pub fn keys(&self) -> Vec<f64> {
        self.nodes.iter().map(|n| n.key).collect()
    }

    /// All values in heap (array) order.
    pub fn values(&self) -> Vec<&V> {
        self.nodes.iter().map(|n| &n.value).collect()
    }

    /// Iterate entries in heap (array) order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, &V)> {
        self.nodes.iter().map(|n| (n.key, &n.value))
    }

    /// Consume the heap, yielding entries from smallest to largest key.
    pub fn into_sorted_vec(mut self) -> Vec<(f64, V)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        while let Some(entry) = self.remove_entry() {
            out.push(entry);
        }
        out
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.nodes[idx].key < self.nodes[parent].key {
                self.nodes.swap(idx, parent);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.nodes.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut smallest = idx;
            if left < len && self.nodes[left].key < self.nodes[smallest].key {
                smallest = left;
            }
            if right < len && self.nodes[right].key < self.nodes[smallest].key {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.nodes.swap(idx, smallest);
            idx = smallest;
        }
    }

    fn reheapify(&mut self, idx: usize, old_key: f64) {
        if self.nodes[idx].key < old_key {
            self.sift_up(idx);
        } else {
            self.sift_down(idx);
        }
    }
}

impl<V: Clone> Heap<V> {
    /// Bulk merge: insert every entry of `other`.
    pub fn insert_all(&mut self, other: &Heap<V>) {
        self.nodes.reserve(other.nodes.len());
        for node in &other.nodes {
            self.insert(node.key, node.value.clone());
        }
    }
}

impl<V: PartialEq> Heap<V> {
    fn position(&self, value: &V) -> Option<usize> {
        self.nodes.iter().position(|n| &n.value == value)
    }

    /// Whether any entry holds `value`. O(n).
    pub fn contains_value(&self, value: &V) -> bool {
        self.position(value).is_some()
    }

    /// Key currently stored for `value`.
    pub fn key_of(&self, value: &V) -> Option<f64> {
        self.position(value).map(|i| self.nodes[i].key)
    }

    /// Raise the key of `value` to `key` if it is strictly greater than the
    /// stored one. Absent values are inserted.
    pub fn increase(&mut self, key: f64, value: V) {
        match self.position(&value) {
            Some(idx) if key > self.nodes[idx].key => {
                let old = self.nodes[idx].key;
                self.nodes[idx].key = key;
                self.reheapify(idx, old);
            }
            Some(_) => {}
            None => self.insert(key, value),
        }
    }

    /// Lower the key of `value` to `key` if it is strictly smaller than the
    /// stored one. Absent values are inserted.
    pub fn decrease(&mut self, key: f64, value: V) {
        match self.position(&value) {
            Some(idx) if key < self.nodes[idx].key => {
                let old = self.nodes[idx].key;
                self.nodes[idx].key = key;
                self.reheapify(idx, old);
            }
            Some(_) => {}
            None => self.insert(key, value),
        }
    }

    /// Replace the key of `value` unconditionally, inserting if absent.
    pub fn set(&mut self, key: f64, value: V) {
        match self.position(&value) {
            Some(idx) => {
                let old = self.nodes[idx].key;
                self.nodes[idx].key = key;
                self.reheapify(idx, old);
            }
            None => self.insert(key, value),
        }
    }
}
