//! Common utilities for integration tests.
//!
//! Provides helpers for:
//! - Building simulated-output configurations
//! - Running the driver with manual or real timers
//! - Checking real-time prerequisites

#![allow(dead_code)]

use pulse_common::config::{OutputDriver, PulseConfig};
use pulse_runtime::{
    check_rt_capabilities, ManualTimer, PulseDriver, PulseRun, SimulatedOutput, ThreadTimer,
};
use std::thread;
use std::time::Duration;

/// Default configuration with a simulated output and no RT setup.
pub fn simulated_config() -> PulseConfig {
    let mut config = PulseConfig {
        output: OutputDriver::Simulated,
        ..Default::default()
    };
    config.realtime.enabled = false;
    config
}

/// Run `ticks` synthetic ticks through a driver built from `config`.
pub fn run_manual(config: &PulseConfig, ticks: usize) -> PulseRun<SimulatedOutput> {
    let mut config = config.clone();
    config.channel_capacity = config.channel_capacity.max(ticks);

    let mut driver = PulseDriver::from_config(SimulatedOutput::new(), &config);
    let mut timer = ManualTimer::new();
    driver.start(&mut timer).expect("manual timer arms");
    assert_eq!(timer.fire_n(ticks), ticks);
    driver.stop().expect("driver stops")
}

/// Run a driver on the real thread timer for `duration`.
pub fn run_threaded(config: &PulseConfig, duration: Duration) -> PulseRun<SimulatedOutput> {
    let mut driver = PulseDriver::from_config(SimulatedOutput::new(), config);
    let mut timer = ThreadTimer::default();
    driver.start(&mut timer).expect("thread timer arms");
    thread::sleep(duration);
    driver.stop().expect("driver stops")
}

/// Output levels written during a run.
pub fn levels(run: &PulseRun<SimulatedOutput>) -> Vec<bool> {
    run.context.output().history().to_vec()
}

/// Check the process can get real-time scheduling.
pub fn check_rt_prerequisites() -> Result<(), String> {
    let caps = check_rt_capabilities();

    if !caps.preempt_rt {
        eprintln!("WARNING: PREEMPT_RT kernel not detected - timing results may be unreliable");
    }

    if caps.can_use_rt_scheduling() {
        Ok(())
    } else {
        Err("no RT scheduling privileges (run as root or grant CAP_SYS_NICE)".into())
    }
}

/// Acceptance criteria for strict timing tests.
pub struct TimingCriteria {
    /// Allowed difference from the expected transition count.
    pub transition_slack: u64,
    /// Maximum acceptable 99th percentile deviation from nominal, in microseconds.
    pub max_p99_deviation_us: u64,
    /// Maximum acceptable dropped plus overrun ticks.
    pub max_lost: u64,
}

impl Default for TimingCriteria {
    fn default() -> Self {
        Self {
            transition_slack: 2,
            max_p99_deviation_us: 100,
            max_lost: 0,
        }
    }
}
