//! Jitter statistics over inter-tick intervals.
//!
//! Fed with the deltas between consecutive tick timestamps after a
//! diagnostic run and summarised against the nominal half-period.

use std::time::Duration;

/// Summary statistics for a sequence of tick intervals.
#[derive(Debug, Clone)]
pub struct JitterStats {
    /// Recorded intervals in nanoseconds, in arrival order.
    samples: Vec<u64>,
    /// Minimum observed interval in nanoseconds.
    min_ns: u64,
    /// Maximum observed interval in nanoseconds.
    max_ns: u64,
    /// Sum of all intervals for mean calculation.
    sum_ns: u128,
    /// Sum of squared intervals for the standard deviation.
    sum_sq_ns: u128,
    /// Largest absolute distance from the nominal interval.
    max_deviation_ns: u64,
    /// Intervals long enough to hide at least one missing tick.
    missed_count: u64,
    /// Nominal interval in nanoseconds.
    nominal_ns: u64,
}

impl JitterStats {
    /// Create an empty collector for the given nominal interval.
    #[must_use]
    pub fn new(nominal: Duration, capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            sum_sq_ns: 0,
            max_deviation_ns: 0,
            missed_count: 0,
            nominal_ns: u64::try_from(nominal.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    /// Build from an iterator of intervals.
    pub fn from_intervals<I>(nominal: Duration, intervals: I) -> Self
    where
        I: IntoIterator<Item = Duration>,
    {
        let iter = intervals.into_iter();
        let mut stats = Self::new(nominal, iter.size_hint().0);
        for interval in iter {
            stats.record(interval);
        }
        stats
    }

    /// Record one interval.
    pub fn record(&mut self, interval: Duration) {
        self.record_ns(u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX));
    }

    /// Record one interval in nanoseconds.
    pub fn record_ns(&mut self, ns: u64) {
        self.samples.push(ns);
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns += u128::from(ns);
        self.sum_sq_ns += u128::from(ns) * u128::from(ns);
        self.max_deviation_ns = self.max_deviation_ns.max(ns.abs_diff(self.nominal_ns));

        // 1.5x nominal: the timer fired late enough to swallow a tick
        if self.nominal_ns > 0 && u128::from(ns) * 2 >= u128::from(self.nominal_ns) * 3 {
            self.missed_count += 1;
        }
    }

    /// Number of recorded intervals.
    #[must_use]
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Nominal interval.
    #[must_use]
    pub fn nominal(&self) -> Duration {
        Duration::from_nanos(self.nominal_ns)
    }

    /// Minimum observed interval.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (!self.samples.is_empty()).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Maximum observed interval.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (!self.samples.is_empty()).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Mean interval.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        self.mean_ns().map(|ns| Duration::from_nanos(ns as u64))
    }

    fn mean_ns(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.sum_ns as f64 / self.samples.len() as f64)
        }
    }

    /// Population standard deviation of the intervals.
    #[must_use]
    pub fn std_dev(&self) -> Option<Duration> {
        let mean = self.mean_ns()?;
        let n = self.samples.len() as f64;
        let variance = (self.sum_sq_ns as f64 / n - mean * mean).max(0.0);
        Some(Duration::from_nanos(variance.sqrt() as u64))
    }

    /// Largest absolute deviation from the nominal interval.
    #[must_use]
    pub fn max_deviation(&self) -> Option<Duration> {
        (!self.samples.is_empty()).then(|| Duration::from_nanos(self.max_deviation_ns))
    }

    /// Number of intervals at least 1.5x the nominal interval.
    #[must_use]
    pub fn missed_count(&self) -> u64 {
        self.missed_count
    }

    /// Compute a percentile of the recorded intervals.
    ///
    /// Returns `None` if nothing was recorded or `percentile` is outside 0..=100.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if !(0.0..=100.0).contains(&percentile) {
            return None;
        }
        self.percentiles(&[percentile]).first().map(|&(_, d)| d)
    }

    /// Compute multiple percentiles with a single sort.
    ///
    /// Invalid percentiles (< 0, > 100, or NaN) are skipped.
    #[must_use]
    pub fn percentiles(&self, percentiles: &[f64]) -> Vec<(f64, Duration)> {
        if self.samples.is_empty() {
            return vec![];
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        percentiles
            .iter()
            .filter(|p| (0.0..=100.0).contains(*p))
            .map(|&p| {
                let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
                let idx = idx.min(sorted.len() - 1);
                (p, Duration::from_nanos(sorted[idx]))
            })
            .collect()
    }

    /// Recorded intervals in arrival order.
    #[must_use]
    pub fn samples(&self) -> &[u64] {
        &self.samples
    }

    /// Get a snapshot of the summary.
    #[must_use]
    pub fn snapshot(&self) -> JitterSnapshot {
        let has = !self.samples.is_empty();
        JitterSnapshot {
            sample_count: self.samples.len(),
            nominal_ns: self.nominal_ns,
            min_ns: has.then_some(self.min_ns),
            max_ns: has.then_some(self.max_ns),
            mean_ns: self.mean_ns().map(|m| m as u64),
            std_dev_ns: self.std_dev().map(|d| d.as_nanos() as u64),
            max_deviation_ns: has.then_some(self.max_deviation_ns),
            missed_count: self.missed_count,
        }
    }
}

/// Immutable snapshot of jitter statistics for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct JitterSnapshot {
    /// Number of intervals summarised.
    pub sample_count: usize,
    /// Nominal interval in nanoseconds.
    pub nominal_ns: u64,
    /// Minimum interval in nanoseconds.
    pub min_ns: Option<u64>,
    /// Maximum interval in nanoseconds.
    pub max_ns: Option<u64>,
    /// Mean interval in nanoseconds.
    pub mean_ns: Option<u64>,
    /// Standard deviation in nanoseconds.
    pub std_dev_ns: Option<u64>,
    /// Largest deviation from nominal in nanoseconds.
    pub max_deviation_ns: Option<u64>,
    /// Intervals that likely hide a missing tick.
    pub missed_count: u64,
}

impl JitterSnapshot {
    /// Peak-to-peak jitter (max - min) in nanoseconds.
    #[must_use]
    pub fn jitter_ns(&self) -> Option<u64> {
        match (self.min_ns, self.max_ns) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}
