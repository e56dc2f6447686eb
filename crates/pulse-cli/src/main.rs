//! pulse-train entry point.
//!
//! Resolves configuration, prepares real-time scheduling, claims the output
//! line, then runs the pulse driver until the operator stops it.

mod diagnostics;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use pulse_common::config::{OutputDriver, PulseConfig};
use pulse_runtime::{
    init_realtime, open_output, DigitalOutput, PulseDriver, PulseRun, StartMode, ThreadTimer,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

use crate::diagnostics::{
    format_jitter_report, format_summary, write_timestamps, JitterJson, RunReport, RunSummary,
};
use crate::signals::ShutdownHandler;

/// Exit status for configuration errors.
const EXIT_CONFIG: u8 = 2;
/// Exit status for resource, timer and other runtime failures.
const EXIT_RUNTIME: u8 = 1;

/// Environment variable naming a configuration file.
const CONFIG_ENV: &str = "PULSE_CONFIG_PATH";
/// System-wide configuration file.
const SYSTEM_CONFIG: &str = "/etc/pulse-train/config.toml";

/// pulse-train command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "pulse-train",
    about = "Generate a precisely timed square wave on a GPIO line",
    version,
    long_about = None
)]
struct Args {
    /// Full output period in microseconds.
    #[arg(long, short = 'p', value_name = "US")]
    period: Option<u64>,

    /// Output line offset on the GPIO chip.
    #[arg(long, short = 'g', value_name = "LINE")]
    pin: Option<u32>,

    /// GPIO character device.
    #[arg(long, value_name = "PATH")]
    chip: Option<PathBuf>,

    /// Hold the output for a skip episode every N output pulses.
    #[arg(long, short = 's', value_name = "N")]
    skip_every: Option<u32>,

    /// Output pulses held per skip episode.
    #[arg(long, short = 'n', value_name = "N")]
    skip_count: Option<u32>,

    /// Insert an extra short pulse every N output pulses.
    #[arg(long, short = 'i', value_name = "N")]
    insert_every: Option<u32>,

    /// Start at this Unix time (seconds) instead of immediately.
    #[arg(long, short = 'e', value_name = "SECS")]
    start_epoch: Option<u64>,

    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use an in-memory output instead of a GPIO line.
    #[arg(long)]
    simulated: bool,

    /// Measure timer jitter instead of running the pattern.
    #[arg(long, short = 'd')]
    diagnostics: bool,

    /// Jitter measurement window (e.g. "10s").
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    diag_duration: Option<Duration>,

    /// Stop automatically after this long (e.g. "5m").
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Write raw diagnostic timestamps (ns) to this file.
    #[arg(long, value_name = "FILE")]
    dump_timestamps: Option<PathBuf>,

    /// Skip real-time scheduling and memory locking.
    #[arg(long)]
    no_realtime: bool,

    /// Print the run report as JSON.
    #[arg(long)]
    json: bool,

    /// Print the resolved configuration and exit.
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting pulse-train");

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if args.dry_run {
        return match print_dry_run(&config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e:#}");
                ExitCode::from(EXIT_CONFIG)
            }
        };
    }

    match run(&args, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("pulse_train={level},pulse_runtime={level},pulse_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `PULSE_CONFIG_PATH` environment variable
/// 3. `/etc/pulse-train/config.toml`
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<PulseConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return PulseConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from {CONFIG_ENV}");
            return PulseConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {CONFIG_ENV}={env_path}"));
        }
        warn!(
            path = %env_path,
            "{CONFIG_ENV} set but file does not exist, checking other locations"
        );
    }

    let system_path = PathBuf::from(SYSTEM_CONFIG);
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return PulseConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {SYSTEM_CONFIG}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(PulseConfig::default())
}

/// Load configuration, apply command-line overrides and validate.
fn resolve_config(args: &Args) -> Result<PulseConfig> {
    let mut config = load_config(args)?;
    apply_overrides(&mut config, args);

    if config.pattern.is_conflicting() {
        warn!(
            skip_every = ?config.pattern.skip_every,
            insert_every = ?config.pattern.insert_every,
            skip_count = config.pattern.skip_count,
            "Both skip and insert configured, insert takes precedence and the skip settings are ignored"
        );
    }

    config.validate().context("Invalid configuration")?;

    info!(
        period_us = config.period.as_micros(),
        pin = config.pin,
        output = ?config.output,
        mode = ?config.pattern_mode(),
        interval_us = config.timer_interval().as_micros(),
        "Configuration resolved"
    );
    Ok(config)
}

/// Command-line values take precedence over the file.
fn apply_overrides(config: &mut PulseConfig, args: &Args) {
    if let Some(period) = args.period {
        config.period = Duration::from_micros(period);
    }
    if let Some(pin) = args.pin {
        config.pin = pin;
    }
    if let Some(chip) = &args.chip {
        config.chip.clone_from(chip);
    }
    if args.skip_every.is_some() {
        config.pattern.skip_every = args.skip_every;
    }
    if let Some(count) = args.skip_count {
        config.pattern.skip_count = count;
    }
    if args.insert_every.is_some() {
        config.pattern.insert_every = args.insert_every;
    }
    if let Some(epoch) = args.start_epoch {
        config.start_epoch = epoch;
    }
    if args.simulated {
        config.output = OutputDriver::Simulated;
    }
    if args.diagnostics {
        config.diagnostics.enabled = true;
    }
    if let Some(duration) = args.diag_duration {
        config.diagnostics.duration = duration;
    }
    if args.no_realtime {
        config.realtime.enabled = false;
    }
}

fn print_dry_run(config: &PulseConfig) -> Result<()> {
    let toml = config.to_toml().context("Failed to render configuration")?;
    println!("{toml}");
    println!("# pattern:  {:?}", config.pattern_mode());
    println!("# interval: {:?}", config.timer_interval());
    match config.start_at() {
        Some(at) => println!("# start:    absolute {}", humantime::format_rfc3339(at)),
        None => println!("# start:    relative +{:?}", config.initial_delay),
    }
    if config.diagnostics.enabled {
        println!("# samples:  {}", config.diagnostic_capacity());
    }
    Ok(())
}

/// How long to run before stopping by ourselves.
///
/// An explicit `--duration` wins. Diagnostic runs otherwise end once the
/// timestamp buffer is full: the wait until the first tick plus the
/// measurement window plus one interval of slack.
fn run_limit(
    duration: Option<Duration>,
    config: &PulseConfig,
    now: SystemTime,
) -> Option<Duration> {
    if duration.is_some() || !config.diagnostics.enabled {
        return duration;
    }
    let until_first_tick = match config.start_at() {
        Some(at) => at.duration_since(now).unwrap_or_default(),
        None => config.initial_delay,
    };
    Some(until_first_tick + config.diagnostics.duration + config.timer_interval())
}

/// Run one pulse train from setup to report.
fn run(args: &Args, config: &PulseConfig) -> Result<()> {
    let realtime = init_realtime(&config.realtime).context("Real-time setup failed")?;

    let output = open_output(config).context("Failed to acquire output line")?;
    let output_name = output.describe();

    let shutdown = ShutdownHandler::new().context("Failed to set up signal handlers")?;
    shutdown
        .watch_stdin()
        .context("Failed to watch stdin for ENTER")?;

    let mut driver = PulseDriver::from_config(output, config);
    let mut timer = ThreadTimer::default();
    driver
        .start(&mut timer)
        .context("Failed to start pulse timer")?;

    if let StartMode::Absolute(at) = driver.start_mode() {
        info!(start = %humantime::format_rfc3339(at), "Waiting for absolute start");
    }
    info!(output = %output_name, "Pulse train running, press ENTER to stop");

    let limit = run_limit(args.duration, config, SystemTime::now());
    let reason = shutdown.wait(limit);

    let PulseRun {
        mut context,
        timer_stats,
        elapsed,
    } = driver.stop().context("Failed to stop pulse train")?;

    if let Err(e) = context.output_mut().release() {
        warn!(error = %e, "Failed to drive output low on release");
    }

    let summary = RunSummary {
        state: driver.state(),
        reason,
        output: output_name,
        elapsed,
        interval: driver.interval(),
        ticks: context.tick_count(),
        phase: context.phase(),
        level: context.level(),
        timer: timer_stats,
        lost_ticks: context.lost_ticks(),
        write_errors: context.write_errors(),
        realtime: realtime.is_realtime(),
    };
    info!(
        health = %summary.health(),
        ticks = summary.ticks,
        %reason,
        "Run complete"
    );

    let jitter = context.recorder().map(|recorder| {
        (
            recorder.analyze(config.timer_interval(), config.diagnostics.report_prefix),
            recorder,
        )
    });

    if let (Some(path), Some((_, recorder))) = (&args.dump_timestamps, &jitter) {
        write_timestamps(path, recorder.timestamps())
            .with_context(|| format!("Failed to write timestamps to {}", path.display()))?;
        info!(path = %path.display(), samples = recorder.len(), "Timestamps written");
    } else if args.dump_timestamps.is_some() {
        warn!("--dump-timestamps ignored outside diagnostic mode");
    }

    if args.json {
        let report = RunReport {
            health: summary.health(),
            summary: &summary,
            jitter: jitter.as_ref().map(|(report, _)| JitterJson::from(report)),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        println!("{}", format_summary(&summary));
        if let Some((report, _)) = &jitter {
            println!("{}", format_jitter_report(report));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::config::PatternMode;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["pulse-train", "--simulated", "-p", "20000", "-g", "17"]);
        assert!(args.simulated);
        assert_eq!(args.period, Some(20_000));
        assert_eq!(args.pin, Some(17));
        assert!(args.config.is_none());
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_args_durations() {
        let args = Args::parse_from(["pulse-train", "--diag-duration", "2s", "--duration", "1m"]);
        assert_eq!(args.diag_duration, Some(Duration::from_secs(2)));
        assert_eq!(args.duration, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_rejects_malformed_option() {
        let err = Args::try_parse_from(["pulse-train", "--period", "fast"]).unwrap_err();
        assert_eq!(err.exit_code(), i32::from(EXIT_CONFIG));
    }

    #[test]
    fn test_overrides_apply() {
        let args = Args::parse_from([
            "pulse-train",
            "--skip-every",
            "3",
            "--skip-count",
            "1",
            "--start-epoch",
            "1700000000",
            "--simulated",
            "--no-realtime",
        ]);
        let mut config = PulseConfig::default();
        apply_overrides(&mut config, &args);

        assert_eq!(config.output, OutputDriver::Simulated);
        assert!(!config.realtime.enabled);
        assert_eq!(config.start_epoch, 1_700_000_000);
        assert_eq!(
            config.pattern_mode(),
            PatternMode::Skip {
                modulus: 7,
                length: 2
            }
        );
    }

    #[test]
    fn test_overrides_keep_file_values() {
        let args = Args::parse_from(["pulse-train"]);
        let mut config = PulseConfig::default();
        config.pattern.insert_every = Some(4);
        config.pin = 5;
        apply_overrides(&mut config, &args);

        assert_eq!(config.pin, 5);
        assert_eq!(config.pattern_mode(), PatternMode::Insert { modulus: 16 });
    }

    #[test]
    fn test_run_limit_counts_from_first_tick() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let mut config = PulseConfig::default();
        assert_eq!(run_limit(None, &config, now), None);

        config.diagnostics.enabled = true;
        config.diagnostics.duration = Duration::from_secs(2);
        let interval = config.timer_interval();
        assert_eq!(
            run_limit(None, &config, now),
            Some(config.initial_delay + Duration::from_secs(2) + interval)
        );

        // Absolute start 30 s out: the window opens only then
        config.start_epoch = 1_700_000_030;
        assert_eq!(
            run_limit(None, &config, now),
            Some(Duration::from_secs(32) + interval)
        );

        // Start already passed
        config.start_epoch = 1_699_999_000;
        assert_eq!(
            run_limit(None, &config, now),
            Some(Duration::from_secs(2) + interval)
        );

        let explicit = Some(Duration::from_secs(5));
        assert_eq!(run_limit(explicit, &config, now), explicit);
    }

    #[test]
    fn test_huge_start_epoch_is_config_error() {
        let args = Args::parse_from([
            "pulse-train",
            "--simulated",
            "--start-epoch",
            "18446744073709551615",
        ]);
        let mut config = PulseConfig::default();
        apply_overrides(&mut config, &args);
        assert!(config.validate().is_err());
        assert!(config.start_at().is_none());
    }

    #[test]
    fn test_resolve_rejects_zero_period() {
        let args = Args::parse_from(["pulse-train", "--config", "/nonexistent/pulse.toml"]);
        assert!(resolve_config(&args).is_err());

        let mut config = PulseConfig::default();
        let args = Args::parse_from(["pulse-train", "--period", "0"]);
        apply_overrides(&mut config, &args);
        assert!(config.validate().is_err());
    }
}
