//! Wiring DSL.
//!
//! [`EventExchange`] assembles the moving parts - ring buffer, sequencer,
//! barriers, processors, threads - into a running graph. Handlers chained
//! with [`then`](ExchangeBuilder::then) see every event only after the
//! previous stage's cursor has passed it.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::event_factory::EventFactory;
use crate::event_handler::EventHandler;
use crate::event_processor::{BatchEventProcessor, DataProvider, EventProcessor};
use crate::event_translator::EventTranslator;
use crate::ring_buffer::RingBuffer;
use crate::sequence::Sequence;
use crate::sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
use crate::thread::ThreadContext;
use crate::wait_strategy::{BlockingWaitStrategy, WaitStrategy};
use crate::{ExchangeError, Result};

/// Which claim/publish protocol the exchange runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerType {
    /// One exclusive producer thread; fastest claims, no availability buffer.
    Single,
    /// Any number of producer threads; claims via fetch-and-add, per-slot
    /// publication tracking.
    Multi,
}

/// An assembled exchange: storage, sequencing, and the consumer graph.
pub struct EventExchange<T>
where
    T: std::fmt::Debug + Send + Sync + 'static,
{
    ring_buffer: Arc<RingBuffer<T>>,
    sequencer: Arc<dyn Sequencer>,
    processors: Vec<Arc<BatchEventProcessor<T>>>,
    threads: Vec<JoinHandle<()>>,
    thread_context: ThreadContext,
    started: bool,
}

impl<T> EventExchange<T>
where
    T: std::fmt::Debug + Send + Sync + 'static,
{
    /// Build an exchange over a fresh ring of `buffer_size` slots.
    ///
    /// # Errors
    /// [`ExchangeError::InvalidBufferSize`] unless `buffer_size` is a
    /// positive power of two.
    pub fn new<F>(
        event_factory: F,
        buffer_size: usize,
        producer_type: ProducerType,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        let ring_buffer = Arc::new(RingBuffer::new(buffer_size, event_factory)?);

        let sequencer: Arc<dyn Sequencer> = match producer_type {
            ProducerType::Single => {
                Arc::new(SingleProducerSequencer::new(buffer_size, wait_strategy))
            }
            ProducerType::Multi => {
                Arc::new(MultiProducerSequencer::new(buffer_size, wait_strategy))
            }
        };

        Ok(Self {
            ring_buffer,
            sequencer,
            processors: Vec::new(),
            threads: Vec::new(),
            thread_context: ThreadContext::new(),
            started: false,
        })
    }

    /// Single producer over a blocking wait strategy.
    pub fn with_defaults<F>(event_factory: F, buffer_size: usize) -> Result<Self>
    where
        F: EventFactory<T>,
    {
        Self::new(
            event_factory,
            buffer_size,
            ProducerType::Single,
            Arc::new(BlockingWaitStrategy::new()),
        )
    }

    /// Replace the thread naming/pinning configuration.
    pub fn with_thread_context(mut self, thread_context: ThreadContext) -> Self {
        self.thread_context = thread_context;
        self
    }

    /// Attach the first consumer stage. Its barrier follows the sequencer
    /// cursor directly.
    pub fn handle_events_with<H>(mut self, event_handler: H) -> ExchangeBuilder<T>
    where
        H: EventHandler<T> + 'static,
    {
        let barrier = Arc::clone(&self.sequencer).new_barrier(vec![]);
        let processor = Arc::new(BatchEventProcessor::new(
            Arc::clone(&self.ring_buffer) as Arc<dyn DataProvider<T>>,
            barrier,
            Box::new(event_handler),
        ));

        let processor_sequence = processor.get_sequence();
        self.sequencer
            .add_gating_sequences(&[Arc::clone(&processor_sequence)]);
        self.processors.push(processor);

        ExchangeBuilder {
            exchange: self,
            last_sequences: vec![processor_sequence],
        }
    }

    /// Start one dedicated thread per processor.
    ///
    /// # Errors
    /// [`ExchangeError::AlreadyRunning`] if already started.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ExchangeError::AlreadyRunning);
        }

        for processor in &self.processors {
            let processor = Arc::clone(processor);
            let handle = self
                .thread_context
                .spawn(move || {
                    if let Err(error) = processor.run() {
                        tracing::error!(%error, "event processor exited with error");
                    }
                })
                .map_err(ExchangeError::handler)?;
            self.threads.push(handle);
        }

        self.started = true;
        tracing::debug!(processors = self.processors.len(), "exchange started");
        Ok(())
    }

    /// Ask every processor to stop at its next barrier interaction.
    pub fn halt(&self) {
        for processor in &self.processors {
            processor.halt();
        }
    }

    /// Halt every processor and join the consumer threads.
    ///
    /// Events published but not yet consumed are abandoned; publish-side
    /// draining is the caller's business.
    pub fn shutdown(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.halt();
        while let Some(handle) = self.threads.pop() {
            if handle.join().is_err() {
                tracing::error!("event processor thread panicked during shutdown");
            }
        }

        self.started = false;
        tracing::debug!("exchange stopped");
        Ok(())
    }

    /// Claim, translate, publish. Blocks while the ring is full.
    pub fn publish_event(&self, translator: &dyn EventTranslator<T>) -> Result<i64> {
        let sequence = self.sequencer.next()?;
        // SAFETY: the claim grants this thread exclusive access to the slot
        // until it is published below.
        unsafe {
            translator.translate_to(self.ring_buffer.get_mut_unchecked(sequence), sequence);
        }
        self.sequencer.publish(sequence);
        Ok(sequence)
    }

    /// Claim, translate, publish without blocking.
    ///
    /// # Errors
    /// [`ExchangeError::InsufficientCapacity`] when the ring is full.
    pub fn try_publish_event(&self, translator: &dyn EventTranslator<T>) -> Result<i64> {
        let sequence = self.sequencer.try_next()?;
        // SAFETY: as in publish_event.
        unsafe {
            translator.translate_to(self.ring_buffer.get_mut_unchecked(sequence), sequence);
        }
        self.sequencer.publish(sequence);
        Ok(sequence)
    }

    /// Closure flavor of [`publish_event`](Self::publish_event).
    pub fn publish_with<F>(&self, update: F) -> Result<i64>
    where
        F: FnOnce(&mut T, i64),
    {
        let sequence = self.sequencer.next()?;
        // SAFETY: as in publish_event.
        unsafe {
            update(self.ring_buffer.get_mut_unchecked(sequence), sequence);
        }
        self.sequencer.publish(sequence);
        Ok(sequence)
    }

    /// Closure flavor of [`try_publish_event`](Self::try_publish_event).
    pub fn try_publish_with<F>(&self, update: F) -> Result<i64>
    where
        F: FnOnce(&mut T, i64),
    {
        let sequence = self.sequencer.try_next()?;
        // SAFETY: as in publish_event.
        unsafe {
            update(self.ring_buffer.get_mut_unchecked(sequence), sequence);
        }
        self.sequencer.publish(sequence);
        Ok(sequence)
    }

    pub fn get_ring_buffer(&self) -> &Arc<RingBuffer<T>> {
        &self.ring_buffer
    }

    pub fn get_sequencer(&self) -> &Arc<dyn Sequencer> {
        &self.sequencer
    }

    pub fn get_cursor(&self) -> Arc<Sequence> {
        self.sequencer.get_cursor()
    }

    pub fn get_buffer_size(&self) -> usize {
        self.ring_buffer.buffer_size()
    }

    pub fn get_remaining_capacity(&self) -> i64 {
        self.sequencer.remaining_capacity()
    }

    /// The processors in attachment order.
    pub fn processors(&self) -> &[Arc<BatchEventProcessor<T>>] {
        &self.processors
    }
}

impl<T> Drop for EventExchange<T>
where
    T: std::fmt::Debug + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Continues the consumer-graph DSL started by
/// [`EventExchange::handle_events_with`].
pub struct ExchangeBuilder<T>
where
    T: std::fmt::Debug + Send + Sync + 'static,
{
    exchange: EventExchange<T>,
    last_sequences: Vec<Arc<Sequence>>,
}

impl<T> ExchangeBuilder<T>
where
    T: std::fmt::Debug + Send + Sync + 'static,
{
    /// Attach a stage that processes each event only after the previous
    /// stage has.
    pub fn then<H>(mut self, event_handler: H) -> Self
    where
        H: EventHandler<T> + 'static,
    {
        let barrier = Arc::clone(&self.exchange.sequencer)
            .new_barrier(self.last_sequences.clone());
        let processor = Arc::new(BatchEventProcessor::new(
            Arc::clone(&self.exchange.ring_buffer) as Arc<dyn DataProvider<T>>,
            barrier,
            Box::new(event_handler),
        ));

        let processor_sequence = processor.get_sequence();
        self.exchange
            .sequencer
            .add_gating_sequences(&[Arc::clone(&processor_sequence)]);
        // only the tail of the chain needs to gate the producer
        for upstream in &self.last_sequences {
            self.exchange.sequencer.remove_gating_sequence(upstream);
        }

        self.exchange.processors.push(processor);
        self.last_sequences = vec![processor_sequence];
        self
    }

    /// Finish wiring.
    pub fn build(self) -> EventExchange<T> {
        self.exchange
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_factory::DefaultEventFactory;
    use crate::event_handler::{ClosureEventHandler, NoOpEventHandler};
    use crate::event_translator::ClosureEventTranslator;
    use parking_lot::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Debug, Default)]
    struct Trade {
        quantity: i64,
    }

    #[test]
    fn test_rejects_invalid_buffer_size() {
        let result = EventExchange::<Trade>::with_defaults(DefaultEventFactory::new(), 1000);
        assert!(matches!(
            result,
            Err(ExchangeError::InvalidBufferSize(1000))
        ));
    }

    #[test]
    fn test_builder_chains_processors() {
        let exchange = EventExchange::<Trade>::with_defaults(DefaultEventFactory::new(), 64)
            .unwrap()
            .handle_events_with(NoOpEventHandler::new())
            .then(NoOpEventHandler::new())
            .build();

        assert_eq!(exchange.processors().len(), 2);
        assert_eq!(exchange.get_buffer_size(), 64);
    }

    #[test]
    fn test_publish_and_consume_round_trip() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = Arc::clone(&seen);
            ClosureEventHandler::new(move |event: &Trade, sequence, _eob| {
                seen.lock().push((sequence, event.quantity));
                Ok(())
            })
        };

        let mut exchange = EventExchange::<Trade>::with_defaults(DefaultEventFactory::new(), 8)
            .unwrap()
            .handle_events_with(handler)
            .build();
        exchange.start().unwrap();

        let translator =
            ClosureEventTranslator::new(|event: &mut Trade, sequence| event.quantity = sequence * 3);
        for _ in 0..4 {
            exchange.publish_event(&translator).unwrap();
        }
        exchange.publish_with(|event, _| event.quantity = 99).unwrap();

        let consumer = exchange.processors()[0].get_sequence();
        let deadline = Instant::now() + Duration::from_secs(5);
        while consumer.get() < 4 {
            assert!(Instant::now() < deadline, "consumer never caught up");
            thread::yield_now();
        }

        exchange.shutdown().unwrap();
        assert_eq!(
            *seen.lock(),
            vec![(0, 0), (1, 3), (2, 6), (3, 9), (4, 99)]
        );
    }

    #[test]
    fn test_try_publish_fails_when_ring_is_full() {
        // consumer attached but never started, so nothing drains the ring
        let exchange = EventExchange::<Trade>::with_defaults(DefaultEventFactory::new(), 4)
            .unwrap()
            .handle_events_with(NoOpEventHandler::new())
            .build();

        for _ in 0..4 {
            exchange
                .try_publish_with(|event, _| event.quantity = 1)
                .unwrap();
        }

        assert!(matches!(
            exchange.try_publish_with(|event, _| event.quantity = 1),
            Err(ExchangeError::InsufficientCapacity)
        ));
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut exchange = EventExchange::<Trade>::with_defaults(DefaultEventFactory::new(), 8)
            .unwrap()
            .handle_events_with(NoOpEventHandler::new())
            .build();

        exchange.start().unwrap();
        assert!(matches!(exchange.start(), Err(ExchangeError::AlreadyRunning)));
        exchange.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_without_start_is_a_no_op() {
        let mut exchange = EventExchange::<Trade>::with_defaults(DefaultEventFactory::new(), 8)
            .unwrap()
            .handle_events_with(NoOpEventHandler::new())
            .build();
        exchange.shutdown().unwrap();
    }

    #[test]
    fn test_chained_stages_observe_prior_stage_order() {
        let first_done = Arc::new(Mutex::new(Vec::new()));
        let second_sees = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let first_done = Arc::clone(&first_done);
            ClosureEventHandler::new(move |_: &Trade, sequence, _eob| {
                // give the downstream stage every chance to overtake if the
                // dependency wiring were broken
                thread::sleep(Duration::from_millis(1));
                first_done.lock().push(sequence);
                Ok(())
            })
        };
        let second = {
            let first_done = Arc::clone(&first_done);
            let second_sees = Arc::clone(&second_sees);
            ClosureEventHandler::new(move |_: &Trade, sequence, _eob| {
                assert!(
                    first_done.lock().contains(&sequence),
                    "stage two saw {sequence} before stage one finished it"
                );
                second_sees.lock().push(sequence);
                Ok(())
            })
        };

        let mut exchange = EventExchange::<Trade>::with_defaults(DefaultEventFactory::new(), 16)
            .unwrap()
            .handle_events_with(first)
            .then(second)
            .build();
        exchange.start().unwrap();

        for _ in 0..8 {
            exchange.publish_with(|event, sequence| event.quantity = sequence).unwrap();
        }

        let tail = exchange.processors()[1].get_sequence();
        let deadline = Instant::now() + Duration::from_secs(5);
        while tail.get() < 7 {
            assert!(Instant::now() < deadline, "chain never completed");
            thread::yield_now();
        }

        exchange.shutdown().unwrap();
        assert_eq!(*second_sees.lock(), (0..8).collect::<Vec<i64>>());
    }
}
