//! Copy-on-write set of gating sequences.
//!
//! Producers read the gating set on every wrap check, so reads must never
//! take a lock: readers load the current array through an atomic pointer swap
//! and iterate a consistent snapshot. Writers serialize among themselves with
//! a compare-and-swap retry loop.

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::sequence::{self, Sequence};

/// Lock-free-readable collection of dependent consumer cursors.
pub struct SequenceGroup {
    sequences: ArcSwap<Vec<Arc<Sequence>>>,
}

impl SequenceGroup {
    pub fn new() -> Self {
        Self {
            sequences: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Add sequences, initializing each to the owning sequencer's cursor.
    ///
    /// The added sequences are set to the cursor once inside the swap loop and
    /// once more after it succeeds; the second store closes the window where
    /// the cursor advanced while the swap was in flight, which would otherwise
    /// leave a new consumer gating the producer from an ancient position.
    pub fn add(&self, cursor: &Sequence, sequences_to_add: &[Arc<Sequence>]) {
        self.sequences.rcu(|current| {
            let mut updated = Vec::with_capacity(current.len() + sequences_to_add.len());
            updated.extend(current.iter().cloned());
            let cursor_value = cursor.get();
            for sequence in sequences_to_add {
                sequence.set(cursor_value);
                updated.push(Arc::clone(sequence));
            }
            updated
        });

        let cursor_value = cursor.get();
        for sequence in sequences_to_add {
            sequence.set(cursor_value);
        }
    }

    /// Remove every occurrence of `sequence`, compared by identity.
    ///
    /// The same sequence may intentionally appear more than once; one call
    /// removes all of them. Returns `true` if anything was removed.
    pub fn remove(&self, sequence: &Arc<Sequence>) -> bool {
        let mut removed = false;
        self.sequences.rcu(|current| {
            let updated: Vec<Arc<Sequence>> = current
                .iter()
                .filter(|existing| !Arc::ptr_eq(existing, sequence))
                .cloned()
                .collect();
            removed = updated.len() != current.len();
            updated
        });
        removed
    }

    /// Minimum cursor in the group, capped from above by `maximum`.
    pub fn minimum_sequence(&self, maximum: i64) -> i64 {
        let snapshot = self.sequences.load();
        sequence::minimum_sequence_from(&snapshot, maximum)
    }

    pub fn len(&self) -> usize {
        self.sequences.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.load().is_empty()
    }
}

impl Default for SequenceGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SequenceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.sequences.load();
        f.debug_list()
            .entries(snapshot.iter().map(|s| s.get()))
            .finish()
    }
}
