//! Consumer-side coordination.
//!
//! A barrier sits between a consumer and the sequencer: it waits (via the
//! configured wait strategy) for sequences to be published, narrows the
//! result to the contiguous published prefix in multi-producer setups, and
//! carries the sticky alert flag that cancels waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::sequence::{self, Sequence};
use crate::sequencer::Sequencer;
use crate::wait_strategy::WaitStrategy;
use crate::{ExchangeError, Result};

/// The cursor a consumer actually follows: the sequencer cursor when it has
/// no upstream consumers, or the composite minimum of the upstream cursors
/// when it does.
#[derive(Debug)]
pub enum DependentSequence {
    Cursor(Arc<Sequence>),
    Composite(Box<[Arc<Sequence>]>),
}

impl DependentSequence {
    pub fn cursor(cursor: Arc<Sequence>) -> Self {
        DependentSequence::Cursor(cursor)
    }

    pub fn composite(sequences: Vec<Arc<Sequence>>) -> Self {
        DependentSequence::Composite(sequences.into_boxed_slice())
    }

    /// Current value: the cursor itself, or the minimum across the group.
    #[inline]
    pub fn get(&self) -> i64 {
        match self {
            DependentSequence::Cursor(cursor) => cursor.get(),
            DependentSequence::Composite(sequences) => sequence::minimum_sequence(sequences),
        }
    }
}

/// Coordination point handed to each consumer.
pub trait SequenceBarrier: Send + Sync {
    /// Wait until `sequence` is available for consumption.
    ///
    /// Returns the highest contiguous published sequence at or above
    /// `sequence`, or a smaller value when an upstream consumer still trails.
    ///
    /// # Errors
    /// [`ExchangeError::Alert`] when the barrier is alerted,
    /// [`ExchangeError::Timeout`] from timing wait strategies.
    fn wait_for(&self, sequence: i64) -> Result<i64>;

    /// Value of the dependent sequence - how far this consumer could go
    /// right now without waiting.
    fn get_cursor(&self) -> i64;

    /// Whether the barrier is in the alerted state.
    fn is_alerted(&self) -> bool;

    /// Alert the barrier: pending and future waits fail until cleared.
    fn alert(&self);

    /// Leave the alerted state.
    fn clear_alert(&self);

    /// Fail with [`ExchangeError::Alert`] if alerted.
    fn check_alert(&self) -> Result<()>;
}

/// Barrier implementation combining the sequencer cursor, an optional set of
/// upstream consumer cursors, a wait strategy, and the alert flag.
pub struct ProcessingSequenceBarrier {
    sequencer: Arc<dyn Sequencer>,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    dependent_sequence: DependentSequence,
    alerted: AtomicBool,
}

impl ProcessingSequenceBarrier {
    pub fn new(
        sequencer: Arc<dyn Sequencer>,
        wait_strategy: Arc<dyn WaitStrategy>,
        cursor: Arc<Sequence>,
        dependent_sequences: Vec<Arc<Sequence>>,
    ) -> Self {
        let dependent_sequence = if dependent_sequences.is_empty() {
            DependentSequence::cursor(Arc::clone(&cursor))
        } else {
            DependentSequence::composite(dependent_sequences)
        };

        Self {
            sequencer,
            wait_strategy,
            cursor,
            dependent_sequence,
            alerted: AtomicBool::new(false),
        }
    }
}

impl SequenceBarrier for ProcessingSequenceBarrier {
    fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.check_alert()?;

        let available_sequence = self.wait_strategy.wait_for(
            sequence,
            &self.cursor,
            &self.dependent_sequence,
            self,
        )?;

        if available_sequence < sequence {
            // early wake behind a trailing dependent; nothing to narrow
            return Ok(available_sequence);
        }

        Ok(self
            .sequencer
            .get_highest_published_sequence(sequence, available_sequence))
    }

    fn get_cursor(&self) -> i64 {
        self.dependent_sequence.get()
    }

    fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    fn check_alert(&self) -> Result<()> {
        if self.is_alerted() {
            Err(ExchangeError::Alert)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sequencer::{MultiProducerSequencer, SingleProducerSequencer};
    use crate::wait_strategy::{BlockingWaitStrategy, BusySpinWaitStrategy};
    use std::thread;
    use std::time::Duration;

    /// Barrier stand-in for exercising wait strategies directly.
    pub(crate) struct StubBarrier {
        alerted: AtomicBool,
    }

    impl StubBarrier {
        pub(crate) fn new() -> Self {
            Self {
                alerted: AtomicBool::new(false),
            }
        }

        pub(crate) fn alerted() -> Self {
            Self {
                alerted: AtomicBool::new(true),
            }
        }
    }

    impl SequenceBarrier for StubBarrier {
        fn wait_for(&self, _sequence: i64) -> Result<i64> {
            unimplemented!("stub")
        }

        fn get_cursor(&self) -> i64 {
            crate::INITIAL_CURSOR_VALUE
        }

        fn is_alerted(&self) -> bool {
            self.alerted.load(Ordering::Acquire)
        }

        fn alert(&self) {
            self.alerted.store(true, Ordering::Release);
        }

        fn clear_alert(&self) {
            self.alerted.store(false, Ordering::Release);
        }

        fn check_alert(&self) -> Result<()> {
            if self.is_alerted() {
                Err(ExchangeError::Alert)
            } else {
                Ok(())
            }
        }
    }

    fn barrier_over_single() -> (Arc<SingleProducerSequencer>, Arc<dyn SequenceBarrier>) {
        let wait_strategy = Arc::new(BusySpinWaitStrategy::new());
        let sequencer = Arc::new(SingleProducerSequencer::new(16, wait_strategy));
        let barrier = Arc::clone(&sequencer).new_barrier(vec![]);
        (sequencer, barrier)
    }

    #[test]
    fn test_wait_for_published_sequence() {
        let (sequencer, barrier) = barrier_over_single();

        for _ in 0..3 {
            let sequence = sequencer.next().unwrap();
            sequencer.publish(sequence);
        }

        assert_eq!(barrier.wait_for(0).unwrap(), 2);
        assert_eq!(barrier.get_cursor(), 2);
    }

    #[test]
    fn test_alert_is_sticky_until_cleared() {
        let (_sequencer, barrier) = barrier_over_single();

        assert!(!barrier.is_alerted());
        barrier.alert();
        assert!(barrier.is_alerted());
        assert!(matches!(barrier.wait_for(0), Err(ExchangeError::Alert)));
        assert!(matches!(barrier.check_alert(), Err(ExchangeError::Alert)));

        barrier.clear_alert();
        assert!(!barrier.is_alerted());
        assert!(barrier.check_alert().is_ok());

        // clearing without an alert is a no-op
        barrier.clear_alert();
        assert!(!barrier.is_alerted());
    }

    #[test]
    fn test_alert_wakes_a_blocked_consumer() {
        let wait_strategy = Arc::new(BlockingWaitStrategy::new());
        let sequencer = Arc::new(SingleProducerSequencer::new(8, wait_strategy));
        let barrier = Arc::clone(&sequencer).new_barrier(vec![]);

        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait_for(0))
        };

        thread::sleep(Duration::from_millis(20));
        barrier.alert();

        assert!(matches!(waiter.join().unwrap(), Err(ExchangeError::Alert)));
    }

    #[test]
    fn test_multi_producer_barrier_stops_at_gaps() {
        let wait_strategy = Arc::new(BusySpinWaitStrategy::new());
        let sequencer = Arc::new(MultiProducerSequencer::new(16, wait_strategy));
        let barrier = Arc::clone(&sequencer).new_barrier(vec![]);

        let s0 = sequencer.next().unwrap();
        let s1 = sequencer.next().unwrap();
        let s2 = sequencer.next().unwrap();
        let s3 = sequencer.next().unwrap();

        // publish with a hole at s1
        sequencer.publish(s0);
        sequencer.publish(s2);
        sequencer.publish(s3);

        assert_eq!(barrier.wait_for(0).unwrap(), 0);

        sequencer.publish(s1);
        assert_eq!(barrier.wait_for(0).unwrap(), 3);
    }

    #[test]
    fn test_dependent_consumers_gate_the_barrier() {
        let wait_strategy = Arc::new(BusySpinWaitStrategy::new());
        let sequencer = Arc::new(SingleProducerSequencer::new(16, wait_strategy));
        let upstream = Arc::new(Sequence::new(1));
        let barrier = Arc::clone(&sequencer).new_barrier(vec![Arc::clone(&upstream)]);

        for _ in 0..8 {
            let sequence = sequencer.next().unwrap();
            sequencer.publish(sequence);
        }

        // the barrier reports the upstream position, not the cursor
        assert_eq!(barrier.wait_for(0).unwrap(), 1);
        assert_eq!(barrier.get_cursor(), 1);

        upstream.set(5);
        assert_eq!(barrier.wait_for(2).unwrap(), 5);
    }
}
