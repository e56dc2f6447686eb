//! Pattern acceptance tests.
//!
//! Drive the whole pipeline with synthetic ticks: configuration resolves the
//! pattern, the driver hands ticks to the context on its consumer thread, and
//! the simulated output records every level written.

use super::common::{levels, run_manual, simulated_config};
use pulse_common::config::PatternMode;
use pulse_common::state::EngineState;
use std::time::Duration;

#[test]
fn test_plain_end_to_end() {
    let config = simulated_config();
    let run = run_manual(&config, 120);

    let expected: Vec<bool> = (1..=120).map(|n| n % 2 == 1).collect();
    assert_eq!(levels(&run), expected);
    assert_eq!(run.context.output().transitions(), 120);
    assert_eq!(run.timer_stats.fired, 120);
    assert_eq!(run.context.lost_ticks(), 0);
}

#[test]
fn test_skip_episode_end_to_end() {
    let mut config = simulated_config();
    config.pattern.skip_every = Some(2);
    config.pattern.skip_count = 2;
    assert_eq!(
        config.pattern_mode(),
        PatternMode::Skip {
            modulus: 5,
            length: 4
        }
    );

    let run = run_manual(&config, 16);

    // Ticks 1-4 and 9 and 14 are written; 5-8, 10-13, 15-16 are held
    assert_eq!(levels(&run), [true, false, true, false, true, false]);
    assert_eq!(run.context.tick_count(), 16);
    assert_eq!(run.context.skipped_count(), 2);
}

#[test]
fn test_insert_window_end_to_end() {
    let mut config = simulated_config();
    config.pattern.insert_every = Some(2);
    assert_eq!(config.timer_interval(), Duration::from_nanos(4_170_500));

    let run = run_manual(&config, 16);

    assert_eq!(run.context.insert_modulus(), 8);
    assert_eq!(
        levels(&run),
        [
            false, true, true, false, false, true, true, // normal
            false, true, false, true, // window opened at tick 8
            false, false, true, true, // normal
            false, // next window at tick 16
        ]
    );
}

#[test]
fn test_insert_takes_precedence_over_skip() {
    let mut config = simulated_config();
    config.pattern.skip_every = Some(3);
    config.pattern.insert_every = Some(3);
    assert!(config.pattern.is_conflicting());

    let run = run_manual(&config, 24);
    assert_eq!(run.context.skip_modulus(), 0);
    assert_eq!(run.context.insert_modulus(), 12);
    // Insert mode writes every tick
    assert_eq!(run.context.output().writes(), 24);
}

#[test]
fn test_zero_counts_fall_back_to_plain() {
    let mut config = simulated_config();
    config.pattern.skip_every = Some(0);
    config.pattern.insert_every = Some(0);

    let run = run_manual(&config, 10);
    assert_eq!(run.context.skip_modulus(), 0);
    assert_eq!(run.context.insert_modulus(), 0);
    assert_eq!(run.context.output().transitions(), 10);
}

#[test]
fn test_identical_runs_identical_output() {
    let mut config = simulated_config();
    config.pattern.skip_every = Some(7);
    config.pattern.skip_count = 3;

    let first = run_manual(&config, 1_000);
    let second = run_manual(&config, 1_000);
    assert_eq!(levels(&first), levels(&second));
    assert_eq!(first.context.level(), second.context.level());
}

#[test]
fn test_diagnostic_buffer_bounded() {
    let mut config = simulated_config();
    config.pattern.skip_every = Some(2);
    config.diagnostics.enabled = true;
    config.diagnostics.duration = Duration::from_millis(100);

    // 100 ms at 8341 us per tick
    assert_eq!(config.diagnostic_capacity(), 12);

    let run = run_manual(&config, 50);
    let recorder = run.context.recorder().expect("diagnostic mode records");
    assert_eq!(recorder.len(), 12);
    assert_eq!(recorder.discarded(), 38);

    // Pattern is bypassed: every tick toggles
    assert_eq!(run.context.output().transitions(), 50);

    let report = recorder.analyze(config.timer_interval(), 5);
    assert_eq!(report.prefix, vec![Duration::from_micros(8_341); 5]);
    assert_eq!(report.stats.mean(), Some(Duration::from_micros(8_341)));
    assert!(recorder.intervals().all(|d| !d.is_zero()));
}

#[test]
fn test_stopped_after_run() {
    let config = simulated_config();
    let mut driver = pulse_runtime::PulseDriver::from_config(
        pulse_runtime::SimulatedOutput::new(),
        &config,
    );
    let mut timer = pulse_runtime::ManualTimer::new();
    driver.start(&mut timer).unwrap();
    timer.fire_n(3);
    let run = driver.stop().unwrap();

    assert_eq!(driver.state(), EngineState::Stopped);
    assert_eq!(run.context.tick_count(), 3);
    // Timer is gone once stopped
    assert!(!timer.fire());
}
