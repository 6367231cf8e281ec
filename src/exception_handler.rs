//! Exception routing for event processors.
//!
//! Errors escaping a handler callback never kill the processor silently:
//! they are delivered here, and the processor moves on past the faulting
//! sequence to preserve liveness.

use std::fmt::Debug;

use crate::ExchangeError;

/// Receives errors raised by handler callbacks.
pub trait ExceptionHandler<T>: Send + Sync {
    /// An error from `on_event` (or `on_batch_start`/`on_timeout`).
    /// `event` is absent when the failure was not tied to a slot.
    fn handle_event_exception(&self, error: ExchangeError, sequence: i64, event: Option<&T>);

    /// An error from the handler's `on_start` callback.
    fn handle_on_start_exception(&self, error: ExchangeError);

    /// An error from the handler's `on_shutdown` callback.
    fn handle_on_shutdown_exception(&self, error: ExchangeError);
}

/// Logs every error and carries on. The processor default.
#[derive(Debug, Default)]
pub struct DefaultExceptionHandler<T> {
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T> DefaultExceptionHandler<T> {
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> ExceptionHandler<T> for DefaultExceptionHandler<T>
where
    T: Debug,
{
    fn handle_event_exception(&self, error: ExchangeError, sequence: i64, event: Option<&T>) {
        tracing::error!(sequence, ?event, %error, "exception processing event");
    }

    fn handle_on_start_exception(&self, error: ExchangeError) {
        tracing::error!(%error, "exception during processor start");
    }

    fn handle_on_shutdown_exception(&self, error: ExchangeError) {
        tracing::error!(%error, "exception during processor shutdown");
    }
}

/// Swallows every error. Mostly useful for overhead measurements.
#[derive(Debug, Default)]
pub struct IgnoreExceptionHandler;

impl IgnoreExceptionHandler {
    pub fn new() -> Self {
        Self
    }
}

impl<T> ExceptionHandler<T> for IgnoreExceptionHandler {
    fn handle_event_exception(&self, _error: ExchangeError, _sequence: i64, _event: Option<&T>) {}

    fn handle_on_start_exception(&self, _error: ExchangeError) {}

    fn handle_on_shutdown_exception(&self, _error: ExchangeError) {}
}

/// Logs and panics the processor thread. For setups where a failed event
/// must never be skipped.
#[derive(Debug, Default)]
pub struct FatalExceptionHandler;

impl FatalExceptionHandler {
    pub fn new() -> Self {
        Self
    }
}

impl<T> ExceptionHandler<T> for FatalExceptionHandler {
    fn handle_event_exception(&self, error: ExchangeError, sequence: i64, _event: Option<&T>) {
        tracing::error!(sequence, %error, "fatal exception processing event");
        panic!("fatal exception processing event at sequence {sequence}: {error}");
    }

    fn handle_on_start_exception(&self, error: ExchangeError) {
        tracing::error!(%error, "fatal exception during processor start");
        panic!("fatal exception during processor start: {error}");
    }

    fn handle_on_shutdown_exception(&self, error: ExchangeError) {
        tracing::error!(%error, "fatal exception during processor shutdown");
        panic!("fatal exception during processor shutdown: {error}");
    }
}
