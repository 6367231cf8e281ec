//! Consumer callbacks.

use crate::Result;

/// Callbacks a consumer supplies to a
/// [`BatchEventProcessor`](crate::BatchEventProcessor).
///
/// `on_event` is the only required method. A handler that wants its batches
/// re-delivered after a transient failure returns
/// [`ExchangeError::Rewindable`](crate::ExchangeError::Rewindable) from
/// `on_event` and runs on a processor built with a rewind strategy; any other
/// error is routed to the exception handler and the faulting sequence is
/// skipped.
pub trait EventHandler<T>: Send {
    /// Called for every published event, in sequence order. `end_of_batch`
    /// is true on the last event of the current batch - the natural point to
    /// flush any accumulated state.
    fn on_event(&mut self, event: &T, sequence: i64, end_of_batch: bool) -> Result<()>;

    /// Called once before each batch. `batch_size` is what this batch will
    /// deliver; `queue_depth` is how much was available when the batch was
    /// cut, a cheap congestion signal.
    fn on_batch_start(&mut self, batch_size: i64, queue_depth: i64) -> Result<()> {
        let _ = (batch_size, queue_depth);
        Ok(())
    }

    /// Called once on the processor thread before the first event.
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once on the processor thread after processing stops.
    fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when a timing wait strategy expires with nothing to process.
    /// `sequence` is the handler's current position.
    fn on_timeout(&mut self, sequence: i64) -> Result<()> {
        let _ = sequence;
        Ok(())
    }
}

/// Handler that does nothing; useful for wiring and throughput tests.
pub struct NoOpEventHandler<T> {
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T> NoOpEventHandler<T> {
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Default for NoOpEventHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventHandler<T> for NoOpEventHandler<T> {
    fn on_event(&mut self, _event: &T, _sequence: i64, _end_of_batch: bool) -> Result<()> {
        Ok(())
    }
}

/// Handler backed by a closure.
pub struct ClosureEventHandler<T, F>
where
    F: FnMut(&T, i64, bool) -> Result<()> + Send,
{
    handler_fn: F,
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T, F> ClosureEventHandler<T, F>
where
    F: FnMut(&T, i64, bool) -> Result<()> + Send,
{
    pub fn new(handler_fn: F) -> Self {
        Self {
            handler_fn,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, F> EventHandler<T> for ClosureEventHandler<T, F>
where
    F: FnMut(&T, i64, bool) -> Result<()> + Send,
{
    fn on_event(&mut self, event: &T, sequence: i64, end_of_batch: bool) -> Result<()> {
        (self.handler_fn)(event, sequence, end_of_batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_handler_sees_events() {
        let mut seen = Vec::new();
        {
            let mut handler = ClosureEventHandler::new(|event: &i64, sequence, _eob| {
                seen.push((*event, sequence));
                Ok(())
            });
            handler.on_event(&10, 0, false).unwrap();
            handler.on_event(&20, 1, true).unwrap();
        }
        assert_eq!(seen, vec![(10, 0), (20, 1)]);
    }

    #[test]
    fn test_default_callbacks_are_no_ops() {
        let mut handler = NoOpEventHandler::<i64>::new();
        handler.on_batch_start(4, 9).unwrap();
        handler.on_start().unwrap();
        handler.on_shutdown().unwrap();
        handler.on_timeout(3).unwrap();
    }
}
