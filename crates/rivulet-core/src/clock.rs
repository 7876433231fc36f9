//! Logical time: comparable timestamps and stopwatches.
//!
//! Every scheduler exposes "current time" through the same [`Timestamp`] type,
//! whether the backing clock is the wall clock or a simulated one. A timestamp
//! is the offset from a process-wide epoch that is initialized exactly once,
//! on first use. The epoch is owned here; nothing else in the process needs to
//! agree on an origin for two timestamps to be comparable.

use once_cell::sync::Lazy;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::time::{Duration, Instant};

/// Process-wide epoch that wall-clock timestamps are measured from.
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Returns the current wall-clock time as a [`Timestamp`].
///
/// Virtual-time schedulers never consult this; they fabricate their own
/// timestamps from the simulated clock.
pub fn now() -> Timestamp {
    Timestamp(EPOCH.elapsed())
}

/// A comparable absolute point in time, stored as the offset from the epoch.
///
/// `Duration` is unsigned, so a timestamp can never sit before the epoch and
/// "negative delay" cannot be expressed; elapsed due times normalize to "now"
/// through [`Timestamp::saturating_since`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// The epoch itself.
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    /// Creates a timestamp at the given offset from the epoch.
    pub const fn from_offset(offset: Duration) -> Self {
        Timestamp(offset)
    }

    /// Returns the offset from the epoch.
    pub const fn as_offset(self) -> Duration {
        self.0
    }

    /// Returns `self - earlier`, or zero if `earlier` is in the future.
    ///
    /// This is the normalization rule for relative scheduling: a due time
    /// that has already passed yields a zero delay, never a panic.
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}

impl AddAssign<Duration> for Timestamp {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs;
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{:?}", self.0)
    }
}

/// A monotonic elapsed-time measurement decoupled from any particular clock.
pub trait Stopwatch: Send {
    /// Time elapsed since the stopwatch was started.
    fn elapsed(&self) -> Duration;
}

/// Stopwatch backed by the wall clock.
#[derive(Debug)]
pub struct ClockStopwatch {
    started: Instant,
}

impl ClockStopwatch {
    /// Starts a new wall-clock stopwatch.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Stopwatch for ClockStopwatch {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        let a = Timestamp::from_offset(Duration::from_millis(10));
        let b = Timestamp::from_offset(Duration::from_millis(20));
        assert!(a < b);
        assert_eq!(a, Timestamp::ZERO + Duration::from_millis(10));
    }

    #[test]
    fn test_saturating_since_never_negative() {
        let a = Timestamp::from_offset(Duration::from_millis(10));
        let b = Timestamp::from_offset(Duration::from_millis(20));
        assert_eq!(b.saturating_since(a), Duration::from_millis(10));
        assert_eq!(a.saturating_since(b), Duration::ZERO);
    }

    #[test]
    fn test_now_is_monotonic() {
        let a = now();
        let b = now();
        assert!(b >= a);
    }

    #[test]
    fn test_clock_stopwatch_advances() {
        let sw = ClockStopwatch::start();
        std::thread::sleep(Duration::from_millis(5));
        assert!(sw.elapsed() >= Duration::from_millis(5));
    }
}
