//! Batch rewind policies.
//!
//! A handler on a rewindable processor can fail a batch with
//! [`ExchangeError::Rewindable`](crate::ExchangeError::Rewindable); the
//! processor then asks its rewind strategy whether to re-deliver the batch
//! from its first sequence or to give up and escalate.

/// Verdict from a rewind strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindAction {
    /// Re-process the batch from its first sequence.
    Rewind,
    /// Stop rewinding; the error escalates to the exception handler.
    Throw,
}

/// Decides what to do with a rewindable failure.
pub trait BatchRewindStrategy: Send {
    /// `attempts` counts consecutive rewindable failures of the same batch,
    /// starting at 1.
    fn handle_rewind_exception(&mut self, attempts: i64) -> RewindAction;
}

/// Rewinds every time, forever.
#[derive(Debug, Default)]
pub struct SimpleBatchRewindStrategy;

impl SimpleBatchRewindStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl BatchRewindStrategy for SimpleBatchRewindStrategy {
    fn handle_rewind_exception(&mut self, _attempts: i64) -> RewindAction {
        RewindAction::Rewind
    }
}

/// Rewinds until the batch has failed `max_attempts` times, then throws.
#[derive(Debug)]
pub struct EventuallyGiveUpBatchRewindStrategy {
    max_attempts: i64,
}

impl EventuallyGiveUpBatchRewindStrategy {
    pub fn new(max_attempts: i64) -> Self {
        Self { max_attempts }
    }
}

impl BatchRewindStrategy for EventuallyGiveUpBatchRewindStrategy {
    fn handle_rewind_exception(&mut self, attempts: i64) -> RewindAction {
        if attempts >= self.max_attempts {
            RewindAction::Throw
        } else {
            RewindAction::Rewind
        }
    }
}
