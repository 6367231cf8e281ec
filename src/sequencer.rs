//! Claim/publish coordination.
//!
//! A sequencer hands out sequence claims to producers, enforces the wrap
//! constraint against the gating consumers, and tracks which sequences have
//! been published. The single-producer variant keeps its bookkeeping in plain
//! fields and publishes through the cursor; the multi-producer variant claims
//! through fetch-and-add and publishes through a per-slot availability buffer.

use std::cell::Cell;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;
use std::time::Duration;

use crate::sequence::Sequence;
use crate::sequence_barrier::{ProcessingSequenceBarrier, SequenceBarrier};
use crate::sequence_group::SequenceGroup;
use crate::wait_strategy::WaitStrategy;
use crate::{is_power_of_two, ExchangeError, Result};

/// Coordinator for claiming and publishing ring slots.
pub trait Sequencer: Send + Sync + std::fmt::Debug {
    /// The sequencer's cursor. For a single producer this is the highest
    /// published sequence; for multiple producers it is the highest claimed
    /// sequence, and publication is tracked separately.
    fn get_cursor(&self) -> Arc<Sequence>;

    /// Capacity of the ring this sequencer coordinates.
    fn get_buffer_size(&self) -> usize;

    /// Whether `required_capacity` more slots could be claimed right now.
    fn has_available_capacity(&self, required_capacity: i64) -> bool;

    /// Claim the next sequence, blocking while the ring is full.
    fn next(&self) -> Result<i64> {
        self.next_n(1)
    }

    /// Claim the next `n` sequences, blocking while the ring is full.
    /// Returns the highest claimed sequence.
    ///
    /// # Errors
    /// [`ExchangeError::InvalidArgument`] unless `1 <= n <= buffer_size`.
    fn next_n(&self, n: i64) -> Result<i64>;

    /// Claim the next sequence only if capacity is available.
    ///
    /// # Errors
    /// [`ExchangeError::InsufficientCapacity`] when the ring is full.
    fn try_next(&self) -> Result<i64> {
        self.try_next_n(1)
    }

    /// Claim the next `n` sequences only if capacity is available.
    fn try_next_n(&self, n: i64) -> Result<i64>;

    /// Publish a claimed sequence, making its slot visible to consumers.
    fn publish(&self, sequence: i64);

    /// Publish the claimed range `low..=high`.
    fn publish_range(&self, low: i64, high: i64);

    /// Whether `sequence` has been published and not yet lapped.
    fn is_available(&self, sequence: i64) -> bool;

    /// Highest sequence in `[next_sequence, available_sequence]` such that
    /// every sequence up to it is published. Consumers call this after the
    /// wait strategy reports that some cursor moved.
    fn get_highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64;

    /// Administrative cursor reset used when priming a buffer. The caller is
    /// responsible for the consequences if data exists past the new cursor;
    /// that situation is undefined.
    fn claim(&self, sequence: i64);

    /// Register consumer cursors this sequencer must not overrun.
    fn add_gating_sequences(&self, gating_sequences: &[Arc<Sequence>]);

    /// Deregister a gating cursor; removes every occurrence by identity.
    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool;

    /// Minimum of the gating cursors and this sequencer's cursor.
    fn get_minimum_sequence(&self) -> i64;

    /// Slots that could be claimed before a producer would block.
    fn remaining_capacity(&self) -> i64;

    /// Build a barrier for consumers of this sequencer. The given sequences
    /// become the barrier's dependent set; when empty, the barrier follows
    /// the sequencer cursor directly.
    fn new_barrier(self: Arc<Self>, sequences_to_track: Vec<Arc<Sequence>>)
        -> Arc<dyn SequenceBarrier>;
}

/// How long a claim blocked on slow consumers parks between gating polls.
const GATING_PARK: Duration = Duration::from_nanos(1);

/// Sequencer for exactly one producer thread.
///
/// Claim bookkeeping (`next_value`, `cached_gating`) lives in plain fields -
/// there is a single writer, so no atomicity is needed - and the cursor is
/// only touched on publish. Driving this from two threads is a contract
/// violation; debug builds assert against it.
#[derive(Debug)]
pub struct SingleProducerSequencer {
    buffer_size: usize,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    gating_sequences: SequenceGroup,
    /// Highest claimed sequence; single-writer.
    next_value: Cell<i64>,
    /// Last observed minimum gating sequence; single-writer.
    cached_gating: Cell<i64>,
    owning_thread: OnceLock<ThreadId>,
}

// SAFETY: the Cell fields are read and written only by the one producer
// thread the contract permits (asserted in debug builds); everything else is
// atomic or immutable after construction.
unsafe impl Sync for SingleProducerSequencer {}

impl SingleProducerSequencer {
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Self {
        Self {
            buffer_size,
            wait_strategy,
            cursor: Arc::new(Sequence::default()),
            gating_sequences: SequenceGroup::new(),
            next_value: Cell::new(crate::INITIAL_CURSOR_VALUE),
            cached_gating: Cell::new(crate::INITIAL_CURSOR_VALUE),
            owning_thread: OnceLock::new(),
        }
    }

    fn assert_owning_thread(&self) {
        if cfg!(debug_assertions) {
            let current = std::thread::current().id();
            let owner = *self.owning_thread.get_or_init(|| current);
            debug_assert_eq!(
                owner, current,
                "SingleProducerSequencer claimed from two threads; use ProducerType::Multi"
            );
        }
    }

    fn has_capacity(&self, required_capacity: i64, do_store: bool) -> bool {
        let next_value = self.next_value.get();
        let wrap_point = (next_value + required_capacity) - self.buffer_size as i64;
        let cached_gating = self.cached_gating.get();

        if wrap_point > cached_gating || cached_gating > next_value {
            if do_store {
                // publish our position before reading the gating cursors,
                // store-load fenced so neither side misses the other
                self.cursor.set_volatile(next_value);
            }

            let min_sequence = self.gating_sequences.minimum_sequence(next_value);
            self.cached_gating.set(min_sequence);

            if wrap_point > min_sequence {
                return false;
            }
        }

        true
    }
}

impl Sequencer for SingleProducerSequencer {
    fn get_cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    fn get_buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn has_available_capacity(&self, required_capacity: i64) -> bool {
        self.assert_owning_thread();
        self.has_capacity(required_capacity, false)
    }

    fn next_n(&self, n: i64) -> Result<i64> {
        self.assert_owning_thread();

        if n < 1 || n > self.buffer_size as i64 {
            return Err(ExchangeError::InvalidArgument(
                "n must be > 0 and <= the buffer size",
            ));
        }

        let next_value = self.next_value.get();
        let next_sequence = next_value + n;
        let wrap_point = next_sequence - self.buffer_size as i64;
        let cached_gating = self.cached_gating.get();

        if wrap_point > cached_gating || cached_gating > next_value {
            self.cursor.set_volatile(next_value);

            let mut min_sequence = self.gating_sequences.minimum_sequence(next_value);
            while wrap_point > min_sequence {
                std::thread::park_timeout(GATING_PARK);
                min_sequence = self.gating_sequences.minimum_sequence(next_value);
            }

            self.cached_gating.set(min_sequence);
        }

        self.next_value.set(next_sequence);
        Ok(next_sequence)
    }

    fn try_next_n(&self, n: i64) -> Result<i64> {
        self.assert_owning_thread();

        if n < 1 {
            return Err(ExchangeError::InvalidArgument("n must be > 0"));
        }

        if !self.has_capacity(n, true) {
            return Err(ExchangeError::InsufficientCapacity);
        }

        let next_sequence = self.next_value.get() + n;
        self.next_value.set(next_sequence);
        Ok(next_sequence)
    }

    fn publish(&self, sequence: i64) {
        self.cursor.set(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, _low: i64, high: i64) {
        // the cursor is monotonic and every slot below high belongs to this
        // thread, so publishing the top covers the range
        self.publish(high);
    }

    fn is_available(&self, sequence: i64) -> bool {
        let current = self.cursor.get();
        sequence <= current && sequence > current - self.buffer_size as i64
    }

    fn get_highest_published_sequence(&self, _next_sequence: i64, available_sequence: i64) -> i64 {
        // a single producer publishes contiguously; no gaps to scan for
        available_sequence
    }

    fn claim(&self, sequence: i64) {
        self.next_value.set(sequence);
    }

    fn add_gating_sequences(&self, gating_sequences: &[Arc<Sequence>]) {
        self.gating_sequences.add(&self.cursor, gating_sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.gating_sequences.remove(sequence)
    }

    fn get_minimum_sequence(&self) -> i64 {
        self.gating_sequences.minimum_sequence(self.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let next_value = self.next_value.get();
        let consumed = self.gating_sequences.minimum_sequence(next_value);
        self.buffer_size as i64 - (next_value - consumed)
    }

    fn new_barrier(
        self: Arc<Self>,
        sequences_to_track: Vec<Arc<Sequence>>,
    ) -> Arc<dyn SequenceBarrier> {
        let cursor = Arc::clone(&self.cursor);
        let wait_strategy = Arc::clone(&self.wait_strategy);
        Arc::new(ProcessingSequenceBarrier::new(
            self,
            wait_strategy,
            cursor,
            sequences_to_track,
        ))
    }
}

/// Sequencer safe for any number of concurrent producer threads.
///
/// Claims are taken with fetch-and-add on the cursor, so the cursor names the
/// highest *claimed* sequence. Publication is recorded per slot in the
/// availability buffer: slot `s & (N-1)` stores the lap number `s >> log2(N)`,
/// which distinguishes the current occupant from anything the slot held on an
/// earlier lap.
#[derive(Debug)]
pub struct MultiProducerSequencer {
    buffer_size: usize,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    gating_sequences: SequenceGroup,
    gating_sequence_cache: Sequence,
    available_buffer: Box<[AtomicI32]>,
    index_mask: i64,
    index_shift: u32,
}

impl MultiProducerSequencer {
    /// # Panics
    /// Panics if `buffer_size` is not a power of two; the availability
    /// encoding depends on it.
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Self {
        assert!(
            is_power_of_two(buffer_size),
            "buffer size must be a power of 2"
        );

        let available_buffer: Box<[AtomicI32]> =
            (0..buffer_size).map(|_| AtomicI32::new(-1)).collect();

        Self {
            buffer_size,
            wait_strategy,
            cursor: Arc::new(Sequence::default()),
            gating_sequences: SequenceGroup::new(),
            gating_sequence_cache: Sequence::default(),
            available_buffer,
            index_mask: (buffer_size - 1) as i64,
            index_shift: buffer_size.trailing_zeros(),
        }
    }

    #[inline]
    fn calculate_index(&self, sequence: i64) -> usize {
        (sequence & self.index_mask) as usize
    }

    #[inline]
    fn calculate_availability_flag(&self, sequence: i64) -> i32 {
        (sequence >> self.index_shift) as i32
    }

    fn set_available(&self, sequence: i64) {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        self.available_buffer[index].store(flag, Ordering::Release);
    }

    fn has_capacity(&self, required_capacity: i64, cursor_value: i64) -> bool {
        let wrap_point = (cursor_value + required_capacity) - self.buffer_size as i64;
        let cached_gating = self.gating_sequence_cache.get();

        if wrap_point > cached_gating || cached_gating > cursor_value {
            let min_sequence = self.gating_sequences.minimum_sequence(cursor_value);
            self.gating_sequence_cache.set(min_sequence);

            if wrap_point > min_sequence {
                return false;
            }
        }

        true
    }
}

impl Sequencer for MultiProducerSequencer {
    fn get_cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    fn get_buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn has_available_capacity(&self, required_capacity: i64) -> bool {
        self.has_capacity(required_capacity, self.cursor.get())
    }

    fn next_n(&self, n: i64) -> Result<i64> {
        if n < 1 || n > self.buffer_size as i64 {
            return Err(ExchangeError::InvalidArgument(
                "n must be > 0 and <= the buffer size",
            ));
        }

        let current = self.cursor.get_and_add(n);
        let next_sequence = current + n;
        let wrap_point = next_sequence - self.buffer_size as i64;
        let cached_gating = self.gating_sequence_cache.get();

        if wrap_point > cached_gating || cached_gating > current {
            let mut gating_sequence = self.gating_sequences.minimum_sequence(current);
            while wrap_point > gating_sequence {
                std::thread::park_timeout(GATING_PARK);
                gating_sequence = self.gating_sequences.minimum_sequence(current);
            }

            self.gating_sequence_cache.set(gating_sequence);
        }

        Ok(next_sequence)
    }

    fn try_next_n(&self, n: i64) -> Result<i64> {
        if n < 1 {
            return Err(ExchangeError::InvalidArgument("n must be > 0"));
        }

        // CAS against concurrent fetch-and-add claims; may fail spuriously
        // under contention, which callers of try_next accept
        loop {
            let current = self.cursor.get();
            let next_sequence = current + n;

            if !self.has_capacity(n, current) {
                return Err(ExchangeError::InsufficientCapacity);
            }

            if self.cursor.compare_and_set(current, next_sequence) {
                return Ok(next_sequence);
            }
        }
    }

    fn publish(&self, sequence: i64) {
        self.set_available(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, low: i64, high: i64) {
        // each slot must be marked individually: other producers may still
        // hold claims inside the range, so a high-watermark store is unsafe
        for sequence in low..=high {
            self.set_available(sequence);
        }
        self.wait_strategy.signal_all_when_blocking();
    }

    fn is_available(&self, sequence: i64) -> bool {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        self.available_buffer[index].load(Ordering::Acquire) == flag
    }

    fn get_highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64 {
        let mut sequence = next_sequence;
        while sequence <= available_sequence {
            if !self.is_available(sequence) {
                return sequence - 1;
            }
            sequence += 1;
        }
        available_sequence
    }

    fn claim(&self, sequence: i64) {
        self.cursor.set(sequence);
    }

    fn add_gating_sequences(&self, gating_sequences: &[Arc<Sequence>]) {
        self.gating_sequences.add(&self.cursor, gating_sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.gating_sequences.remove(sequence)
    }

    fn get_minimum_sequence(&self) -> i64 {
        self.gating_sequences.minimum_sequence(self.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.cursor.get();
        let consumed = self.gating_sequences.minimum_sequence(produced);
        self.buffer_size as i64 - (produced - consumed)
    }

    fn new_barrier(
        self: Arc<Self>,
        sequences_to_track: Vec<Arc<Sequence>>,
    ) -> Arc<dyn SequenceBarrier> {
        let cursor = Arc::clone(&self.cursor);
        let wait_strategy = Arc::clone(&self.wait_strategy);
        Arc::new(ProcessingSequenceBarrier::new(
            self,
            wait_strategy,
            cursor,
            sequences_to_track,
        ))
    }
}
