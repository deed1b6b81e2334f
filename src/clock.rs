//! Strictly monotonic timestamp source for call records.
//!
//! Raw OS clocks can report identical or even regressing readings across
//! cores, and trace consumers break on ties: two records with the same
//! timestamp have no defined order. [`TraceClock`] forces strict global
//! monotonicity over any [`TimeSource`]: every call to [`TraceClock::now`]
//! returns a value strictly greater than every previously returned one.
//!
//! # Tie handling
//!
//! When the raw reading does not beat the last issued timestamp, the clock
//! issues `last + TICK_EPSILON_NANOS` instead. The raw source is not
//! re-read; a burst of calls inside one clock granule simply climbs in
//! epsilon steps until real time catches up.
//!
//! # Example
//!
//! ```
//! use huella::clock::TraceClock;
//!
//! let clock = TraceClock::new();
//! let t1 = clock.now();
//! let t2 = clock.now();
//! assert!(t2 > t1);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Step added to the last issued timestamp when the raw reading ties or
/// regresses.
pub const TICK_EPSILON_NANOS: u64 = 20;

/// Source of raw, possibly non-monotonic nanosecond readings.
pub trait TimeSource: Send + Sync {
    fn raw_nanos(&self) -> u64;
}

/// Default source: nanoseconds elapsed since construction, measured with
/// [`Instant`].
#[derive(Debug)]
pub struct MonotonicSource {
    origin: Instant,
}

impl MonotonicSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicSource {
    fn raw_nanos(&self) -> u64 {
        // u64 nanoseconds cover ~584 years of uptime, so the narrowing
        // cast cannot wrap in practice.
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Thread-safe strictly monotonic clock.
///
/// Concurrent callers each receive a distinct timestamp: the issue step is
/// a compare-and-swap loop over the last issued value, so two threads that
/// observe the same raw reading still come away with different results.
pub struct TraceClock {
    source: Box<dyn TimeSource>,
    last: AtomicU64,
}

impl TraceClock {
    /// Clock over the default [`MonotonicSource`].
    pub fn new() -> Self {
        Self::with_source(Box::new(MonotonicSource::new()))
    }

    /// Clock over a caller-supplied source. Tests inject scripted sources
    /// that tie or regress to exercise the epsilon path.
    pub fn with_source(source: Box<dyn TimeSource>) -> Self {
        Self {
            source,
            last: AtomicU64::new(0),
        }
    }

    /// Issue the next timestamp.
    ///
    /// # Returns
    ///
    /// A nanosecond value strictly greater than every value this clock has
    /// returned before, regardless of what the raw source reports.
    pub fn now(&self) -> u64 {
        let raw = self.source.raw_nanos();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = if raw > prev {
                raw
            } else {
                prev + TICK_EPSILON_NANOS
            };
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(observed) => prev = observed,
            }
        }
    }

    /// Last timestamp issued, 0 if none yet.
    pub fn last_issued(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

impl Default for TraceClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TraceClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceClock")
            .field("last", &self.last_issued())
            .finish()
    }
}
