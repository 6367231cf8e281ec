//! Pre-allocated slot storage.
//!
//! The ring buffer is a fixed array of events created once at construction
//! and mutated in place forever after. It knows nothing about coordination;
//! the claim/publish/consume protocol enforced by the sequencers is what
//! makes the aliasing here sound.

use std::cell::UnsafeCell;

use crate::event_factory::EventFactory;
use crate::{is_power_of_two, ExchangeError, Result};

/// Fixed-capacity slot array addressed modulo capacity.
///
/// The slot for sequence `s` is `s & (capacity - 1)`. Slots are never
/// reallocated; ownership of a slot between claim and publish belongs
/// exclusively to the claiming producer, and the slot is read-only for
/// everyone from publish until the slowest consumer moves past it.
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<T>]>,
    index_mask: i64,
}

// SAFETY: slots are UnsafeCell, but every access is serialized by the
// sequencing protocol: a slot has exactly one writer while claimed and no
// writers after publication until it is recycled, with release/acquire
// edges on the cursor or availability buffer ordering the handoff.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send + Sync> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Allocate a buffer of `buffer_size` slots, filling each from `factory`.
    ///
    /// # Errors
    /// Returns [`ExchangeError::InvalidBufferSize`] unless `buffer_size` is a
    /// positive power of two.
    pub fn new<F>(buffer_size: usize, factory: F) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        if !is_power_of_two(buffer_size) {
            return Err(ExchangeError::InvalidBufferSize(buffer_size));
        }

        let slots: Box<[UnsafeCell<T>]> = (0..buffer_size)
            .map(|_| UnsafeCell::new(factory.new_instance()))
            .collect();

        Ok(Self {
            slots,
            index_mask: (buffer_size - 1) as i64,
        })
    }

    /// Read the event at `sequence`.
    ///
    /// Callers must only pass published sequences that no producer can
    /// currently be writing; the sequencer protocol guarantees this for
    /// consumers driven through a barrier.
    #[inline]
    pub fn get(&self, sequence: i64) -> &T {
        let index = (sequence & self.index_mask) as usize;
        // SAFETY: index is masked into bounds; the protocol rules out a
        // concurrent writer for a published sequence.
        unsafe { &*self.slots.get_unchecked(index).get() }
    }

    /// Mutable access to the event at `sequence`.
    ///
    /// # Safety
    /// The caller must hold the claim on `sequence`, i.e. it was returned by
    /// `next`/`try_next` and has not been published yet. Two live references
    /// to the same slot are undefined behavior.
    #[inline]
    pub unsafe fn get_mut_unchecked(&self, sequence: i64) -> &mut T {
        let index = (sequence & self.index_mask) as usize;
        &mut *self.slots.get_unchecked(index).get()
    }

    /// Number of slots.
    pub fn buffer_size(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots as the sequence-typed value used in capacity math.
    pub fn size(&self) -> i64 {
        self.slots.len() as i64
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("buffer_size", &self.slots.len())
            .finish()
    }
}
