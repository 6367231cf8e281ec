//! The batching consumer loop.
//!
//! A [`BatchEventProcessor`] owns one consumer's cursor and drives it: wait
//! on the barrier, cut a batch, dispatch each event to the handler, advance
//! the cursor, repeat. Timeouts become `on_timeout` callbacks, alerts become
//! a halt check, rewindable failures re-deliver the batch, and anything else
//! goes to the exception handler while the loop skips the faulting sequence
//! and keeps going.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::event_handler::EventHandler;
use crate::exception_handler::{DefaultExceptionHandler, ExceptionHandler};
use crate::rewind::{BatchRewindStrategy, RewindAction};
use crate::ring_buffer::RingBuffer;
use crate::sequence::Sequence;
use crate::sequence_barrier::SequenceBarrier;
use crate::{ExchangeError, Result};

/// Read access to published slots, as seen by consumers.
pub trait DataProvider<T>: Send + Sync {
    /// The event at `sequence`, which must be published.
    fn get(&self, sequence: i64) -> &T;
}

impl<T: Send + Sync> DataProvider<T> for RingBuffer<T> {
    fn get(&self, sequence: i64) -> &T {
        RingBuffer::get(self, sequence)
    }
}

/// A consumer driver owning one cursor.
pub trait EventProcessor: Send + Sync {
    /// The processor's cursor; register it as a gating sequence so producers
    /// and downstream consumers can track it.
    fn get_sequence(&self) -> Arc<Sequence>;

    /// Ask the processor to stop. Cooperative: processing ends at the next
    /// barrier interaction. Idempotent.
    fn halt(&self);

    /// Whether `run` is active (running or halt-pending).
    fn is_running(&self) -> bool;

    /// Drive the processing loop on the calling thread until halted.
    ///
    /// # Errors
    /// [`ExchangeError::AlreadyRunning`] if another thread is inside `run`.
    fn run(&self) -> Result<()>;
}

const IDLE: i32 = 0;
const HALTED: i32 = 1;
const RUNNING: i32 = 2;

/// Batching event processor.
///
/// Construct with [`new`](Self::new) for plain handlers, or
/// [`with_rewind_strategy`](Self::with_rewind_strategy) for handlers that
/// signal [`ExchangeError::Rewindable`]. On exit the state always returns to
/// idle, so a halted processor can be restarted.
pub struct BatchEventProcessor<T> {
    data_provider: Arc<dyn DataProvider<T>>,
    sequence_barrier: Arc<dyn SequenceBarrier>,
    event_handler: Mutex<Box<dyn EventHandler<T>>>,
    exception_handler: Mutex<Arc<dyn ExceptionHandler<T>>>,
    rewind_strategy: Option<Mutex<Box<dyn BatchRewindStrategy>>>,
    sequence: Arc<Sequence>,
    running: AtomicI32,
    batch_limit_offset: i64,
}

impl<T> BatchEventProcessor<T>
where
    T: std::fmt::Debug + Send + Sync + 'static,
{
    /// Processor with unlimited batch size and no rewind policy.
    pub fn new(
        data_provider: Arc<dyn DataProvider<T>>,
        sequence_barrier: Arc<dyn SequenceBarrier>,
        event_handler: Box<dyn EventHandler<T>>,
    ) -> Self {
        Self {
            data_provider,
            sequence_barrier,
            event_handler: Mutex::new(event_handler),
            exception_handler: Mutex::new(Arc::new(DefaultExceptionHandler::new())),
            rewind_strategy: None,
            sequence: Arc::new(Sequence::default()),
            running: AtomicI32::new(IDLE),
            batch_limit_offset: i64::MAX,
        }
    }

    /// Processor that dispatches at most `max_batch_size` events per batch.
    ///
    /// # Errors
    /// [`ExchangeError::InvalidArgument`] unless `max_batch_size >= 1`.
    pub fn with_max_batch_size(
        data_provider: Arc<dyn DataProvider<T>>,
        sequence_barrier: Arc<dyn SequenceBarrier>,
        event_handler: Box<dyn EventHandler<T>>,
        max_batch_size: i64,
    ) -> Result<Self> {
        if max_batch_size < 1 {
            return Err(ExchangeError::InvalidArgument(
                "max batch size must be greater than 0",
            ));
        }

        let mut processor = Self::new(data_provider, sequence_barrier, event_handler);
        processor.batch_limit_offset = max_batch_size - 1;
        Ok(processor)
    }

    /// Processor whose handler may fail batches with
    /// [`ExchangeError::Rewindable`]; `rewind_strategy` arbitrates retries.
    pub fn with_rewind_strategy(
        data_provider: Arc<dyn DataProvider<T>>,
        sequence_barrier: Arc<dyn SequenceBarrier>,
        event_handler: Box<dyn EventHandler<T>>,
        max_batch_size: i64,
        rewind_strategy: Box<dyn BatchRewindStrategy>,
    ) -> Result<Self> {
        let mut processor =
            Self::with_max_batch_size(data_provider, sequence_barrier, event_handler, max_batch_size)?;
        processor.rewind_strategy = Some(Mutex::new(rewind_strategy));
        Ok(processor)
    }

    /// Replace the exception handler. Takes effect for subsequent failures.
    pub fn set_exception_handler(&self, exception_handler: Arc<dyn ExceptionHandler<T>>) {
        *self.exception_handler.lock() = exception_handler;
    }

    /// The barrier this processor waits on.
    pub fn get_barrier(&self) -> Arc<dyn SequenceBarrier> {
        Arc::clone(&self.sequence_barrier)
    }

    fn process_events(&self, handler: &mut dyn EventHandler<T>) {
        let mut next_sequence = self.sequence.get() + 1;
        let mut retries_attempted: i64 = 0;

        loop {
            let start_of_batch = next_sequence;
            match self.process_batch(handler, &mut next_sequence, &mut retries_attempted) {
                Ok(()) => {}
                Err(ExchangeError::Rewindable) => {
                    match self.attempt_rewind(&mut retries_attempted, start_of_batch) {
                        Ok(rewind_to) => next_sequence = rewind_to,
                        Err(error) => {
                            // rewind exhausted or unsupported: sacrifice the
                            // faulting sequence to keep the stream moving
                            self.handle_event_exception(error, next_sequence);
                            self.sequence.set(next_sequence);
                            next_sequence += 1;
                        }
                    }
                }
                Err(ExchangeError::Timeout) => {
                    self.notify_timeout(handler, self.sequence.get());
                }
                Err(ExchangeError::Alert) => {
                    if self.running.load(Ordering::Acquire) != RUNNING {
                        break;
                    }
                }
                Err(error) => {
                    self.handle_event_exception(error, next_sequence);
                    self.sequence.set(next_sequence);
                    next_sequence += 1;
                }
            }
        }
    }

    fn process_batch(
        &self,
        handler: &mut dyn EventHandler<T>,
        next_sequence: &mut i64,
        retries_attempted: &mut i64,
    ) -> Result<()> {
        let available_sequence = self.sequence_barrier.wait_for(*next_sequence)?;
        let end_of_batch_sequence = next_sequence
            .saturating_add(self.batch_limit_offset)
            .min(available_sequence);

        if *next_sequence <= end_of_batch_sequence {
            handler.on_batch_start(
                end_of_batch_sequence - *next_sequence + 1,
                available_sequence - *next_sequence + 1,
            )?;
        }

        while *next_sequence <= end_of_batch_sequence {
            let event = self.data_provider.get(*next_sequence);
            handler.on_event(event, *next_sequence, *next_sequence == end_of_batch_sequence)?;
            *next_sequence += 1;
        }

        *retries_attempted = 0;
        self.sequence.set(end_of_batch_sequence);
        Ok(())
    }

    fn attempt_rewind(&self, retries_attempted: &mut i64, start_of_batch: i64) -> Result<i64> {
        let Some(rewind_strategy) = &self.rewind_strategy else {
            return Err(ExchangeError::UnsupportedRewind);
        };

        *retries_attempted += 1;
        match rewind_strategy
            .lock()
            .handle_rewind_exception(*retries_attempted)
        {
            RewindAction::Rewind => Ok(start_of_batch),
            RewindAction::Throw => {
                *retries_attempted = 0;
                Err(ExchangeError::Rewindable)
            }
        }
    }

    fn notify_timeout(&self, handler: &mut dyn EventHandler<T>, sequence: i64) {
        if let Err(error) = handler.on_timeout(sequence) {
            let exception_handler = Arc::clone(&self.exception_handler.lock());
            exception_handler.handle_event_exception(error, sequence, None);
        }
    }

    fn notify_start(&self, handler: &mut dyn EventHandler<T>) {
        if let Err(error) = handler.on_start() {
            let exception_handler = Arc::clone(&self.exception_handler.lock());
            exception_handler.handle_on_start_exception(error);
        }
    }

    fn notify_shutdown(&self, handler: &mut dyn EventHandler<T>) {
        if let Err(error) = handler.on_shutdown() {
            let exception_handler = Arc::clone(&self.exception_handler.lock());
            exception_handler.handle_on_shutdown_exception(error);
        }
    }

    fn handle_event_exception(&self, error: ExchangeError, sequence: i64) {
        let exception_handler = Arc::clone(&self.exception_handler.lock());
        let event = self.data_provider.get(sequence);
        exception_handler.handle_event_exception(error, sequence, Some(event));
    }
}

impl<T> EventProcessor for BatchEventProcessor<T>
where
    T: std::fmt::Debug + Send + Sync + 'static,
{
    fn get_sequence(&self) -> Arc<Sequence> {
        Arc::clone(&self.sequence)
    }

    fn halt(&self) {
        self.running.store(HALTED, Ordering::SeqCst);
        self.sequence_barrier.alert();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) != IDLE
    }

    fn run(&self) -> Result<()> {
        match self
            .running
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                self.sequence_barrier.clear_alert();

                let mut handler = self.event_handler.lock();
                tracing::debug!(sequence = self.sequence.get(), "event processor starting");
                self.notify_start(&mut **handler);
                if self.running.load(Ordering::Acquire) == RUNNING {
                    self.process_events(&mut **handler);
                }
                self.notify_shutdown(&mut **handler);
                tracing::debug!(sequence = self.sequence.get(), "event processor stopped");

                self.running.store(IDLE, Ordering::Release);
                Ok(())
            }
            Err(witness) if witness == RUNNING => Err(ExchangeError::AlreadyRunning),
            Err(_) => {
                // halted before processing began: run the lifecycle
                // notifications, touch nothing else, return to idle
                let mut handler = self.event_handler.lock();
                self.notify_start(&mut **handler);
                self.notify_shutdown(&mut **handler);
                self.running.store(IDLE, Ordering::Release);
                Ok(())
            }
        }
    }
}
