//! Monotonic time helpers.
//!
//! Tick timestamps are nanoseconds since a per-run origin taken from
//! `Instant`, so they are monotonic and cheap to copy through the tick channel.

use std::time::{Duration, Instant};

/// Monotonic timestamp, in nanoseconds since the run's clock origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TickInstant(pub u64);

impl TickInstant {
    /// Build from raw nanoseconds.
    #[must_use]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Raw nanoseconds since the clock origin.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: TickInstant) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

/// Monotonic clock anchored at construction time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Start a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Current time relative to the origin.
    #[must_use]
    pub fn now(&self) -> TickInstant {
        TickInstant(u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(1));
        let b = clock.now();
        assert!(b > a);
        assert!(b.saturating_duration_since(a) >= Duration::from_millis(1));
    }

    #[test]
    fn test_saturating_duration() {
        let early = TickInstant::from_nanos(1_000);
        let late = TickInstant::from_nanos(9_341);
        assert_eq!(late.saturating_duration_since(early), Duration::from_nanos(8_341));
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }
}
