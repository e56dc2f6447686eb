//! Post-run reporting.
//!
//! Turns the context handed back by the driver into a run summary and, in
//! diagnostic mode, a jitter report. Both render as text for the terminal
//! and serialize to JSON for scripting.

use pulse_common::metrics::JitterSnapshot;
use pulse_common::state::{EngineState, PatternPhase};
use pulse_common::time::TickInstant;
use pulse_runtime::{JitterReport, TimerStats};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

use crate::signals::ShutdownReason;

/// Percentiles listed in the jitter report.
pub const REPORT_PERCENTILES: [f64; 4] = [50.0, 90.0, 99.0, 99.9];

/// Overall verdict on a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunHealth {
    /// Every tick reached the output.
    Healthy,
    /// More than 1% of ticks were lost to overruns or a full channel.
    Degraded,
    /// Output writes failed.
    Unhealthy,
}

impl std::fmt::Display for RunHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunHealth::Healthy => write!(f, "healthy"),
            RunHealth::Degraded => write!(f, "degraded"),
            RunHealth::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// What happened during one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Final lifecycle state.
    #[serde(serialize_with = "display")]
    pub state: EngineState,
    /// Why the run ended.
    #[serde(serialize_with = "display")]
    pub reason: ShutdownReason,
    /// Output identifier.
    pub output: String,
    /// Armed time.
    #[serde(serialize_with = "micros")]
    pub elapsed: Duration,
    /// Timer firing interval.
    #[serde(serialize_with = "micros")]
    pub interval: Duration,
    /// Ticks processed by the engine.
    pub ticks: u64,
    /// Pattern sub-state after the last tick.
    #[serde(serialize_with = "display")]
    pub phase: PatternPhase,
    /// Last level driven.
    pub level: bool,
    /// Timer delivery statistics.
    pub timer: TimerStats,
    /// Sequence gaps seen by the engine.
    pub lost_ticks: u64,
    /// Failed output writes.
    pub write_errors: u64,
    /// Whether a real-time scheduling class was in effect.
    pub realtime: bool,
}

impl RunSummary {
    /// Classify the run.
    #[must_use]
    pub fn health(&self) -> RunHealth {
        if self.write_errors > 0 {
            return RunHealth::Unhealthy;
        }
        let lost = self.timer.dropped + self.timer.overruns;
        let generated = self.timer.fired + self.timer.overruns;
        if generated > 0 && lost as f64 / generated as f64 > 0.01 {
            RunHealth::Degraded
        } else {
            RunHealth::Healthy
        }
    }

    /// Effective tick rate over the armed time.
    #[must_use]
    pub fn tick_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.ticks as f64 / secs
        } else {
            0.0
        }
    }
}

/// Machine-readable report printed with `--json`.
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    /// Run verdict.
    pub health: RunHealth,
    /// Run summary.
    pub summary: &'a RunSummary,
    /// Jitter statistics, in diagnostic mode.
    pub jitter: Option<JitterJson>,
}

/// Jitter statistics flattened for JSON.
#[derive(Debug, Serialize)]
pub struct JitterJson {
    /// Timestamps recorded.
    pub recorded: usize,
    /// Buffer capacity.
    pub capacity: usize,
    /// Samples discarded after the buffer filled.
    pub discarded: u64,
    /// Summary statistics.
    pub stats: JitterSnapshot,
    /// `(percentile, nanoseconds)` pairs.
    pub percentiles: Vec<(f64, u64)>,
    /// Leading intervals in nanoseconds.
    pub prefix_ns: Vec<u64>,
}

impl From<&JitterReport> for JitterJson {
    fn from(report: &JitterReport) -> Self {
        Self {
            recorded: report.recorded,
            capacity: report.capacity,
            discarded: report.discarded,
            stats: report.stats.snapshot(),
            percentiles: report
                .stats
                .percentiles(&REPORT_PERCENTILES)
                .into_iter()
                .map(|(p, d)| (p, nanos(d)))
                .collect(),
            prefix_ns: report.prefix.iter().copied().map(nanos).collect(),
        }
    }
}

/// Render the run summary.
pub fn format_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run summary ({})", summary.health());
    let _ = writeln!(out, "  output          {}", summary.output);
    let _ = writeln!(out, "  stopped by      {}", summary.reason);
    let _ = writeln!(out, "  state           {}", summary.state);
    let _ = writeln!(
        out,
        "  armed for       {:.3} s",
        summary.elapsed.as_secs_f64()
    );
    let _ = writeln!(
        out,
        "  interval        {:.3} us",
        us(summary.interval)
    );
    let _ = writeln!(
        out,
        "  ticks           {} ({:.1}/s)",
        summary.ticks,
        summary.tick_rate()
    );
    let _ = writeln!(
        out,
        "  final phase     {} (level {})",
        summary.phase,
        u8::from(summary.level)
    );
    let _ = writeln!(
        out,
        "  timer           fired {}, dropped {}, overruns {}",
        summary.timer.fired, summary.timer.dropped, summary.timer.overruns
    );
    let _ = writeln!(out, "  lost ticks      {}", summary.lost_ticks);
    let _ = writeln!(out, "  write errors    {}", summary.write_errors);
    let _ = write!(
        out,
        "  scheduling      {}",
        if summary.realtime {
            "real-time"
        } else {
            "default"
        }
    );
    out
}

/// Render the jitter report.
pub fn format_jitter_report(report: &JitterReport) -> String {
    let stats = &report.stats;
    let nominal = stats.nominal();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Jitter report: {} timestamps (capacity {}, {} discarded)",
        report.recorded, report.capacity, report.discarded
    );

    if stats.count() == 0 {
        let _ = write!(out, "  not enough samples for analysis");
        return out;
    }

    let _ = writeln!(
        out,
        "First {} intervals (nominal {:.3} us):",
        report.prefix.len(),
        us(nominal)
    );
    for (i, interval) in report.prefix.iter().enumerate() {
        let _ = writeln!(
            out,
            "  [{i:>4}] {:>12.3} us  ({:+.3})",
            us(*interval),
            us_signed(*interval, nominal)
        );
    }

    let _ = writeln!(out, "Over {} intervals:", stats.count());
    let rows = [
        ("min", stats.min()),
        ("max", stats.max()),
        ("mean", stats.mean()),
        ("std dev", stats.std_dev()),
        ("worst deviation", stats.max_deviation()),
    ];
    for (label, value) in rows {
        if let Some(d) = value {
            let _ = writeln!(out, "  {label:<16}{:>12.3} us", us(d));
        }
    }
    for (p, d) in stats.percentiles(&REPORT_PERCENTILES) {
        let _ = writeln!(out, "  {:<16}{:>12.3} us", format!("p{p}"), us(d));
    }
    let _ = write!(out, "  {:<16}{:>12}", "missed ticks", stats.missed_count());
    out
}

/// Write raw timestamps, in nanoseconds, one per line.
pub fn write_timestamps(path: &Path, timestamps: &[TickInstant]) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    for ts in timestamps {
        writeln!(writer, "{}", ts.as_nanos())?;
    }
    writer.flush()
}

fn us(d: Duration) -> f64 {
    d.as_secs_f64() * 1e6
}

fn us_signed(d: Duration, nominal: Duration) -> f64 {
    us(d) - us(nominal)
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn display<T: std::fmt::Display, S: serde::Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn micros<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(us(*value))
}
