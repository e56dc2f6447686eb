//! Jitter recorder for diagnostic runs.
//!
//! Captures tick timestamps into a buffer whose capacity is fixed at setup.
//! Once full, further samples are discarded silently. After the run,
//! [`JitterRecorder::analyze`] turns the timestamps into inter-tick
//! intervals and summarises them against the nominal timer interval.

use pulse_common::metrics::JitterStats;
use pulse_common::time::TickInstant;
use std::time::Duration;

/// Bounded timestamp buffer.
#[derive(Debug, Clone)]
pub struct JitterRecorder {
    timestamps: Vec<TickInstant>,
    capacity: usize,
    /// Samples offered after the buffer filled up.
    discarded: u64,
}

impl JitterRecorder {
    /// Create a recorder that keeps at most `capacity` timestamps.
    ///
    /// The buffer is allocated up front so recording never allocates.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(capacity),
            capacity,
            discarded: 0,
        }
    }

    /// Append a timestamp if capacity remains. Returns whether it was kept.
    #[inline]
    pub fn record(&mut self, at: TickInstant) -> bool {
        if self.timestamps.len() < self.capacity {
            self.timestamps.push(at);
            true
        } else {
            self.discarded += 1;
            false
        }
    }

    /// Maximum number of timestamps.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of timestamps recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Returns true once no more samples will be kept.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.timestamps.len() >= self.capacity
    }

    /// Samples dropped because the buffer was full.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Recorded timestamps in capture order.
    #[must_use]
    pub fn timestamps(&self) -> &[TickInstant] {
        &self.timestamps
    }

    /// Intervals between consecutive timestamps.
    pub fn intervals(&self) -> impl Iterator<Item = Duration> + '_ {
        self.timestamps
            .windows(2)
            .map(|pair| pair[1].saturating_duration_since(pair[0]))
    }

    /// Summarise the recorded intervals against `nominal`.
    ///
    /// The first `prefix` intervals are kept verbatim for display.
    #[must_use]
    pub fn analyze(&self, nominal: Duration, prefix: usize) -> JitterReport {
        JitterReport {
            prefix: self.intervals().take(prefix).collect(),
            stats: JitterStats::from_intervals(nominal, self.intervals()),
            recorded: self.len(),
            capacity: self.capacity,
            discarded: self.discarded,
        }
    }
}

/// Result of the post-run jitter analysis.
#[derive(Debug, Clone)]
pub struct JitterReport {
    /// Leading intervals, in order.
    pub prefix: Vec<Duration>,
    /// Statistics over all intervals.
    pub stats: JitterStats,
    /// Timestamps recorded.
    pub recorded: usize,
    /// Buffer capacity.
    pub capacity: usize,
    /// Samples discarded after the buffer filled.
    pub discarded: u64,
}
