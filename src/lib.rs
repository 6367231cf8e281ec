//! `ringbolt` - in-process event exchange over a pre-allocated ring buffer
//!
//! Producers claim slots in a fixed-capacity, power-of-two ring, fill them in
//! place, and publish; consumers follow behind on their own cursors. All
//! coordination happens through padded atomic sequence counters and explicit
//! memory fences. The hot path takes no locks, allocates nothing, and never
//! copies an event.
//!
//! ## Quick start
//!
//! ```rust
//! use ringbolt::{
//!     BlockingWaitStrategy, DefaultEventFactory, EventExchange, EventHandler,
//!     ProducerType, Result,
//! };
//! use std::sync::Arc;
//!
//! #[derive(Debug, Default)]
//! struct Tick {
//!     price: i64,
//! }
//!
//! struct PricePrinter;
//!
//! impl EventHandler<Tick> for PricePrinter {
//!     fn on_event(&mut self, event: &Tick, sequence: i64, _end_of_batch: bool) -> Result<()> {
//!         println!("tick {sequence}: {}", event.price);
//!         Ok(())
//!     }
//! }
//!
//! let factory = DefaultEventFactory::<Tick>::new();
//! let mut exchange = EventExchange::new(
//!     factory,
//!     1024,
//!     ProducerType::Single,
//!     Arc::new(BlockingWaitStrategy::new()),
//! )
//! .unwrap()
//! .handle_events_with(PricePrinter)
//! .build();
//!
//! exchange.start().unwrap();
//! exchange.publish_with(|event, _sequence| event.price = 42).unwrap();
//! exchange.shutdown().unwrap();
//! ```
//!
//! ## Components
//!
//! - [`Sequence`]: cache-line padded atomic counter naming positions in the ring
//! - [`RingBuffer`]: pre-allocated slot storage addressed modulo capacity
//! - [`Sequencer`]: claim/publish coordination ([`SingleProducerSequencer`],
//!   [`MultiProducerSequencer`])
//! - [`SequenceBarrier`]: consumer-side gate combining a wait strategy with an
//!   alert flag
//! - [`WaitStrategy`]: pluggable wait policies from busy-spin to blocking
//! - [`BatchEventProcessor`]: the consumer driver loop with batching, rewind,
//!   and exception routing
//! - [`EventExchange`]: wiring DSL that builds the graph and owns the consumer
//!   threads

pub mod event_factory;
pub mod event_handler;
pub mod event_processor;
pub mod event_translator;
pub mod exception_handler;
pub mod exchange;
pub mod rewind;
pub mod ring_buffer;
pub mod sequence;
pub mod sequence_barrier;
pub mod sequence_group;
pub mod sequencer;
pub mod thread;
pub mod wait_strategy;

#[cfg(test)]
mod property_tests;

pub use event_factory::{ClosureEventFactory, DefaultEventFactory, EventFactory};
pub use event_handler::{ClosureEventHandler, EventHandler, NoOpEventHandler};
pub use event_processor::{BatchEventProcessor, DataProvider, EventProcessor};
pub use event_translator::{
    ClosureEventTranslator, EventTranslator, EventTranslatorOneArg, EventTranslatorTwoArg,
};
pub use exception_handler::{
    DefaultExceptionHandler, ExceptionHandler, FatalExceptionHandler, IgnoreExceptionHandler,
};
pub use exchange::{EventExchange, ExchangeBuilder, ProducerType};
pub use rewind::{
    BatchRewindStrategy, EventuallyGiveUpBatchRewindStrategy, RewindAction,
    SimpleBatchRewindStrategy,
};
pub use ring_buffer::RingBuffer;
pub use sequence::Sequence;
pub use sequence_barrier::{DependentSequence, ProcessingSequenceBarrier, SequenceBarrier};
pub use sequence_group::SequenceGroup;
pub use sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
pub use thread::ThreadContext;
pub use wait_strategy::{
    BlockingWaitStrategy, BusySpinWaitStrategy, LiteBlockingWaitStrategy,
    LiteTimeoutBlockingWaitStrategy, PhasedBackoffWaitStrategy, SleepingWaitStrategy,
    TimeoutBlockingWaitStrategy, WaitStrategy, YieldingWaitStrategy,
};

/// The value every sequence starts from before anything has been claimed.
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Errors produced by the exchange.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// A `try_next` claim could not be satisfied without blocking.
    #[error("insufficient capacity in the ring buffer")]
    InsufficientCapacity,

    /// Buffer capacity must be a positive power of two.
    #[error("buffer size must be a power of 2, got: {0}")]
    InvalidBufferSize(usize),

    /// A claim count or batch size was outside its permitted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The barrier was alerted while a consumer was waiting on it.
    #[error("sequence barrier alerted")]
    Alert,

    /// A timing wait strategy gave up before the target sequence arrived.
    #[error("timed out waiting for sequence")]
    Timeout,

    /// The waiting thread was interrupted. Stock wait strategies never raise
    /// this; the variant exists for custom strategies that park on
    /// interruptible primitives.
    #[error("interrupted while waiting for sequence")]
    Interrupted,

    /// A handler requested that the current batch be re-processed from its
    /// first sequence.
    #[error("handler requested batch rewind")]
    Rewindable,

    /// A rewind was requested on a processor that has no rewind strategy.
    #[error("rewind requested from a processor without a rewind strategy")]
    UnsupportedRewind,

    /// `run()` was called on a processor that is already running.
    #[error("event processor is already running")]
    AlreadyRunning,

    /// An event handler failed with an application error.
    #[error("event handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ExchangeError {
    /// Wrap an application error for routing through the exception handler.
    pub fn handler<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ExchangeError::Handler(error.into())
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Utility function to check if a number is a power of 2
pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && (n & (n - 1)) == 0
}
