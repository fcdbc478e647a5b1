//! Merge closure.
//!
//! When a batch contains `(A, B)` and later `(B, C)`, B may already have been
//! absorbed by the time the second pair is handled. [`Forwarding`] is a
//! disjoint-set over record IDs where the representative of every set is the
//! record that currently survives, so both pairs end up on the same record.
//! Each batch seeds it from the `colrev_merged_ids` of the stored records, so
//! the closure also spans earlier batches.

use std::collections::HashMap;

/// Disjoint-set of record IDs with explicitly chosen representatives.
#[derive(Debug, Default, Clone)]
pub struct Forwarding {
    parent: HashMap<String, String>,
}

impl Forwarding {
    pub fn new() -> Self {
        Self::default()
    }

    /// The surviving record for `id`. IDs never forwarded resolve to themselves.
    pub fn resolve(&mut self, id: &str) -> String {
        let mut root = id.to_string();
        while let Some(next) = self.parent.get(&root) {
            root = next.clone();
        }

        // path compression
        let mut current = id.to_string();
        while let Some(next) = self.parent.get(&current).cloned() {
            if next != root {
                self.parent.insert(current, root.clone());
            }
            current = next;
        }
        root
    }

    /// Records that `absorbed` now lives on in `survivor`.
    ///
    /// Both arguments must be representatives (results of [`resolve`](Self::resolve))
    /// and distinct; otherwise the call is ignored.
    pub fn forward(&mut self, absorbed: &str, survivor: &str) {
        if absorbed == survivor || self.parent.contains_key(absorbed) {
            return;
        }
        if self.parent.contains_key(survivor) {
            return;
        }
        self.parent
            .insert(absorbed.to_string(), survivor.to_string());
    }

    pub fn is_absorbed(&self, id: &str) -> bool {
        self.parent.contains_key(id)
    }

    /// All absorbed IDs, including those seeded from earlier batches.
    pub fn absorbed(&self) -> impl Iterator<Item = &str> {
        self.parent.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}
