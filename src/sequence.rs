//! Padded atomic sequence counter.
//!
//! A [`Sequence`] tracks progress through the ring and coordinates producers
//! and consumers. The counter is padded to a full cache line on both sides so
//! that two hot sequences updated by different threads never share a line.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{fence, AtomicI64, Ordering};
use std::sync::Arc;

use crate::INITIAL_CURSOR_VALUE;

/// A cache-line padded 64-bit sequence counter.
///
/// Values start at `-1` and grow monotonically; a value is interpreted modulo
/// the ring capacity when used as a slot address.
pub struct Sequence {
    value: CachePadded<AtomicI64>,
}

impl Sequence {
    /// Create a sequence with the given initial value.
    pub fn new(initial_value: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(initial_value)),
        }
    }

    /// Current value, acquire-ordered.
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Store a value, release-ordered.
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Store a value and drain the store buffer before any subsequent load.
    ///
    /// Used where a thread must publish one counter and then observe another
    /// counter written with a release store by a different thread. A plain
    /// release store is not enough there; the following fence is what keeps
    /// the store from being reordered after the load.
    #[inline]
    pub fn set_volatile(&self, value: i64) {
        self.value.store(value, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    /// Compare-and-swap. Returns `true` if the value was `expected` and has
    /// been replaced with `new`.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically add `increment`, returning the value from before the add.
    #[inline]
    pub fn get_and_add(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::AcqRel)
    }

    /// Atomically add `increment`, returning the new value.
    #[inline]
    pub fn add_and_get(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::AcqRel) + increment
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence").field("value", &self.get()).finish()
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Minimum value over `sequences`, or `i64::MAX` when the slice is empty.
pub fn minimum_sequence(sequences: &[Arc<Sequence>]) -> i64 {
    minimum_sequence_from(sequences, i64::MAX)
}

/// Minimum over `sequences` capped from above by `minimum`.
///
/// Producers pass their own position as the cap so that an empty gating set
/// gates on the producer itself and never blocks it.
pub fn minimum_sequence_from(sequences: &[Arc<Sequence>], mut minimum: i64) -> i64 {
    for sequence in sequences {
        minimum = minimum.min(sequence.get());
    }
    minimum
}
