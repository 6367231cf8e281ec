//! Wait strategies for consumers.
//!
//! A wait strategy decides how a consumer thread spends its time while the
//! sequence it wants has not been published. The variants trade CPU for
//! latency: busy-spin burns a core for the fastest wake, blocking parks on a
//! condition variable and costs a syscall, and the rest sit in between.
//!
//! Every strategy checks the barrier's alert flag at each point where it
//! could otherwise stay asleep, and none of them ever holds a lock while
//! user code runs.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::sequence::Sequence;
use crate::sequence_barrier::{DependentSequence, SequenceBarrier};
use crate::{ExchangeError, Result};

/// Policy for a consumer waiting on a target sequence.
pub trait WaitStrategy: Send + Sync + std::fmt::Debug {
    /// Block until `dependent` reaches `sequence`, the barrier is alerted, or
    /// a strategy-specific timeout elapses.
    ///
    /// Returns the dependent sequence value, which may be greater than
    /// `sequence`; the caller uses it as the upper bound of a batch. A value
    /// below `sequence` is returned only when a trailing dependent cursor is
    /// involved - timing strategies signal expiry with
    /// [`ExchangeError::Timeout`] instead of a truncated result.
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64>;

    /// Wake any parked waiters. Called by the sequencer after every publish.
    fn signal_all_when_blocking(&self);
}

/// Spin on the dependent cursor until it reaches `sequence`, checking the
/// alert flag each turn. Shared tail of every blocking-family strategy.
#[inline]
fn spin_for_dependent(
    sequence: i64,
    dependent: &DependentSequence,
    barrier: &dyn SequenceBarrier,
) -> Result<i64> {
    let mut available_sequence = dependent.get();
    while available_sequence < sequence {
        barrier.check_alert()?;
        std::hint::spin_loop();
        available_sequence = dependent.get();
    }
    Ok(available_sequence)
}

/// Park on a condition variable until the producer cursor catches up.
///
/// CPU-frugal and the right default when latency is not critical.
#[derive(Debug, Default)]
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl BlockingWaitStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                barrier.check_alert()?;
                self.condvar.wait(&mut guard);
            }
        }

        spin_for_dependent(sequence, dependent, barrier)
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// Blocking strategy that skips the wakeup syscall when nobody is parked.
///
/// A `signal_needed` flag is raised just before a waiter parks; `signal_all`
/// only takes the lock when the flag was up. Cuts producer-side overhead when
/// the consumer is usually keeping pace.
#[derive(Debug, Default)]
pub struct LiteBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    signal_needed: AtomicBool,
}

impl LiteBlockingWaitStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WaitStrategy for LiteBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let mut guard = self.mutex.lock();
            loop {
                self.signal_needed.swap(true, Ordering::SeqCst);
                if cursor.get() >= sequence {
                    break;
                }
                barrier.check_alert()?;
                self.condvar.wait(&mut guard);
                if cursor.get() >= sequence {
                    break;
                }
            }
        }

        spin_for_dependent(sequence, dependent, barrier)
    }

    fn signal_all_when_blocking(&self) {
        if self.signal_needed.swap(false, Ordering::SeqCst) {
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }
    }
}

/// Blocking strategy with a deadline; fails with [`ExchangeError::Timeout`]
/// when the producer stays quiet, letting consumers act on idle periods.
#[derive(Debug)]
pub struct TimeoutBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    timeout: Duration,
}

impl TimeoutBlockingWaitStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            timeout,
        }
    }
}

impl WaitStrategy for TimeoutBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let deadline = Instant::now() + self.timeout;
            let mut guard = self.mutex.lock();
            while cursor.get() < sequence {
                barrier.check_alert()?;
                if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                    return Err(ExchangeError::Timeout);
                }
            }
        }

        let mut available_sequence = dependent.get();
        while available_sequence < sequence {
            barrier.check_alert()?;
            available_sequence = dependent.get();
        }
        Ok(available_sequence)
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// [`TimeoutBlockingWaitStrategy`] with the lite wakeup-elision optimization.
#[derive(Debug)]
pub struct LiteTimeoutBlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    signal_needed: AtomicBool,
    timeout: Duration,
}

impl LiteTimeoutBlockingWaitStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            signal_needed: AtomicBool::new(false),
            timeout,
        }
    }
}

impl WaitStrategy for LiteTimeoutBlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        if cursor.get() < sequence {
            let deadline = Instant::now() + self.timeout;
            let mut guard = self.mutex.lock();
            loop {
                self.signal_needed.swap(true, Ordering::SeqCst);
                if cursor.get() >= sequence {
                    break;
                }
                barrier.check_alert()?;
                if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                    return Err(ExchangeError::Timeout);
                }
                if cursor.get() >= sequence {
                    break;
                }
            }
        }

        let mut available_sequence = dependent.get();
        while available_sequence < sequence {
            barrier.check_alert()?;
            available_sequence = dependent.get();
        }
        Ok(available_sequence)
    }

    fn signal_all_when_blocking(&self) {
        if self.signal_needed.swap(false, Ordering::SeqCst) {
            let _guard = self.mutex.lock();
            self.condvar.notify_all();
        }
    }
}

/// Spin, then yield, then sleep in short parks.
///
/// The default tuning (200 retries, 100 ns park) keeps latency reasonable
/// without pinning a core.
#[derive(Debug)]
pub struct SleepingWaitStrategy {
    retries: i32,
    sleep_nanos: u64,
}

const SLEEPING_SPIN_THRESHOLD: i32 = 100;
const SLEEPING_DEFAULT_RETRIES: i32 = 200;
const SLEEPING_DEFAULT_SLEEP_NANOS: u64 = 100;

impl SleepingWaitStrategy {
    pub fn new() -> Self {
        Self::with_retries(SLEEPING_DEFAULT_RETRIES, SLEEPING_DEFAULT_SLEEP_NANOS)
    }

    pub fn with_retries(retries: i32, sleep_nanos: u64) -> Self {
        Self {
            retries,
            sleep_nanos,
        }
    }

    fn apply_wait_method(&self, barrier: &dyn SequenceBarrier, counter: i32) -> Result<i32> {
        barrier.check_alert()?;

        if counter > SLEEPING_SPIN_THRESHOLD {
            Ok(counter - 1)
        } else if counter > 0 {
            std::thread::yield_now();
            Ok(counter - 1)
        } else {
            std::thread::sleep(Duration::from_nanos(self.sleep_nanos));
            Ok(0)
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        let mut counter = self.retries;
        let mut available_sequence = dependent.get();
        while available_sequence < sequence {
            counter = self.apply_wait_method(barrier, counter)?;
            available_sequence = dependent.get();
        }
        Ok(available_sequence)
    }

    fn signal_all_when_blocking(&self) {}
}

/// Spin a bounded number of times, then yield forever after.
///
/// Low latency at the cost of sustained CPU; suited to cores with spare
/// siblings rather than dedicated ones.
#[derive(Debug, Default)]
pub struct YieldingWaitStrategy;

const YIELDING_SPIN_TRIES: i32 = 100;

impl YieldingWaitStrategy {
    pub fn new() -> Self {
        Self
    }

    fn apply_wait_method(&self, barrier: &dyn SequenceBarrier, counter: i32) -> Result<i32> {
        barrier.check_alert()?;

        if counter == 0 {
            std::thread::yield_now();
            Ok(0)
        } else {
            Ok(counter - 1)
        }
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        let mut counter = YIELDING_SPIN_TRIES;
        let mut available_sequence = dependent.get();
        while available_sequence < sequence {
            counter = self.apply_wait_method(barrier, counter)?;
            available_sequence = dependent.get();
        }
        Ok(available_sequence)
    }

    fn signal_all_when_blocking(&self) {}
}

/// Pure busy-spin. Lowest latency; dedicates a core to the consumer.
#[derive(Debug, Default)]
pub struct BusySpinWaitStrategy;

impl BusySpinWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        let mut available_sequence = dependent.get();
        while available_sequence < sequence {
            barrier.check_alert()?;
            std::hint::spin_loop();
            available_sequence = dependent.get();
        }
        Ok(available_sequence)
    }

    fn signal_all_when_blocking(&self) {}
}

/// Spin for a while, yield for a while, then hand off to a fallback strategy.
///
/// The clock is only consulted once per spin batch to keep `Instant::now`
/// off the fast path.
#[derive(Debug)]
pub struct PhasedBackoffWaitStrategy {
    spin_timeout: Duration,
    yield_timeout: Duration,
    fallback: Box<dyn WaitStrategy>,
}

const PHASED_SPIN_TRIES: i32 = 10_000;

impl PhasedBackoffWaitStrategy {
    pub fn new(
        spin_timeout: Duration,
        yield_timeout: Duration,
        fallback: Box<dyn WaitStrategy>,
    ) -> Self {
        Self {
            spin_timeout,
            // measured from the end of the spin phase, matching the single
            // elapsed-time comparison in wait_for
            yield_timeout: spin_timeout + yield_timeout,
            fallback,
        }
    }

    /// Back off into a [`BlockingWaitStrategy`].
    pub fn with_lock(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(
            spin_timeout,
            yield_timeout,
            Box::new(BlockingWaitStrategy::new()),
        )
    }

    /// Back off into a [`LiteBlockingWaitStrategy`].
    pub fn with_lite_lock(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(
            spin_timeout,
            yield_timeout,
            Box::new(LiteBlockingWaitStrategy::new()),
        )
    }

    /// Back off into a [`SleepingWaitStrategy`].
    pub fn with_sleep(spin_timeout: Duration, yield_timeout: Duration) -> Self {
        Self::new(
            spin_timeout,
            yield_timeout,
            Box::new(SleepingWaitStrategy::new()),
        )
    }
}

impl WaitStrategy for PhasedBackoffWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependent: &DependentSequence,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        let mut counter = PHASED_SPIN_TRIES;
        let mut start: Option<Instant> = None;

        loop {
            let available_sequence = dependent.get();
            if available_sequence >= sequence {
                return Ok(available_sequence);
            }

            barrier.check_alert()?;
            std::hint::spin_loop();

            counter -= 1;
            if counter == 0 {
                match start {
                    None => start = Some(Instant::now()),
                    Some(started) => {
                        let elapsed = started.elapsed();
                        if elapsed > self.yield_timeout {
                            return self.fallback.wait_for(sequence, cursor, dependent, barrier);
                        }
                        if elapsed > self.spin_timeout {
                            std::thread::yield_now();
                        }
                    }
                }
                counter = PHASED_SPIN_TRIES;
            }
        }
    }

    fn signal_all_when_blocking(&self) {
        self.fallback.signal_all_when_blocking();
    }
}
