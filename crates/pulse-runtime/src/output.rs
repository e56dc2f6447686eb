//! Digital output abstraction.
//!
//! The tick path only ever calls [`DigitalOutput::write`]; acquiring and
//! configuring the line happens before arming, in [`open_output`].
//!
//! - [`SimulatedOutput`] keeps levels in memory for tests and dry runs
//! - `GpioOutput` drives a GPIO character-device line (feature `gpio`, Linux)

use pulse_common::config::{OutputDriver, PulseConfig};
use pulse_common::error::PulseResult;
use tracing::info;

/// Capability to drive a single previously-acquired output line.
pub trait DigitalOutput: Send {
    /// Drive the line to `level`.
    fn write(&mut self, level: bool) -> PulseResult<()>;

    /// Return the line to a safe (inactive) level before it is dropped.
    fn release(&mut self) -> PulseResult<()> {
        self.write(false)
    }

    /// Human-readable identifier for logs.
    fn describe(&self) -> String;
}

impl<O: DigitalOutput + ?Sized> DigitalOutput for Box<O> {
    fn write(&mut self, level: bool) -> PulseResult<()> {
        (**self).write(level)
    }

    fn release(&mut self) -> PulseResult<()> {
        (**self).release()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Default number of writes a [`SimulatedOutput`] remembers.
pub const DEFAULT_HISTORY: usize = 1 << 16;

/// In-memory output that records what it was told to do.
#[derive(Debug, Clone)]
pub struct SimulatedOutput {
    level: bool,
    writes: u64,
    transitions: u64,
    history: Vec<bool>,
    history_capacity: usize,
}

impl Default for SimulatedOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedOutput {
    /// Create an output starting low, remembering up to [`DEFAULT_HISTORY`] writes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY)
    }

    /// Create an output remembering up to `capacity` writes.
    #[must_use]
    pub fn with_history(capacity: usize) -> Self {
        Self {
            level: false,
            writes: 0,
            transitions: 0,
            history: Vec::with_capacity(capacity.min(DEFAULT_HISTORY)),
            history_capacity: capacity,
        }
    }

    /// Current line level.
    #[must_use]
    pub fn level(&self) -> bool {
        self.level
    }

    /// Total writes, including writes of the current level.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Number of writes that changed the level.
    #[must_use]
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// The first writes, in order, up to the history capacity.
    #[must_use]
    pub fn history(&self) -> &[bool] {
        &self.history
    }
}

impl DigitalOutput for SimulatedOutput {
    fn write(&mut self, level: bool) -> PulseResult<()> {
        if level != self.level {
            self.transitions += 1;
        }
        self.level = level;
        self.writes += 1;
        if self.history.len() < self.history_capacity {
            self.history.push(level);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        String::from("simulated")
    }
}

#[cfg(all(feature = "gpio", target_os = "linux"))]
pub use gpio::GpioOutput;

#[cfg(all(feature = "gpio", target_os = "linux"))]
mod gpio {
    use super::DigitalOutput;
    use gpiocdev::line::Value;
    use gpiocdev::Request;
    use pulse_common::error::{PulseError, PulseResult};
    use std::path::{Path, PathBuf};
    use tracing::{debug, info};

    /// Output line claimed through the GPIO character device.
    pub struct GpioOutput {
        request: Request,
        chip: PathBuf,
        line: u32,
    }

    impl GpioOutput {
        /// Claim `line` on `chip` as an output, initially inactive.
        ///
        /// # Errors
        ///
        /// Returns [`PulseError::ResourceAcquisition`] if the chip cannot be
        /// opened or the line is already claimed.
        pub fn open(chip: &Path, line: u32, consumer: &str) -> PulseResult<Self> {
            debug!(chip = %chip.display(), line, consumer, "Requesting GPIO line");

            let request = Request::builder()
                .on_chip(chip)
                .with_consumer(consumer)
                .with_line(line)
                .as_output(Value::Inactive)
                .request()
                .map_err(|e| PulseError::ResourceAcquisition {
                    chip: chip.display().to_string(),
                    line,
                    reason: e.to_string(),
                })?;

            info!(chip = %chip.display(), line, "GPIO line claimed as output");
            Ok(Self {
                request,
                chip: chip.to_path_buf(),
                line,
            })
        }
    }

    impl DigitalOutput for GpioOutput {
        fn write(&mut self, level: bool) -> PulseResult<()> {
            let value = if level { Value::Active } else { Value::Inactive };
            self.request
                .set_value(self.line, value)
                .map(|_| ())
                .map_err(|e| PulseError::OutputWrite(e.to_string()))
        }

        fn describe(&self) -> String {
            format!("{}:{}", self.chip.display(), self.line)
        }
    }
}

/// Acquire the output selected by the configuration.
///
/// # Errors
///
/// Returns [`pulse_common::error::PulseError::ResourceAcquisition`] if the line cannot be claimed
/// or the binary was built without GPIO support.
pub fn open_output(config: &PulseConfig) -> PulseResult<Box<dyn DigitalOutput>> {
    match config.output {
        OutputDriver::Simulated => {
            info!("Using simulated output");
            Ok(Box::new(SimulatedOutput::new()))
        }
        OutputDriver::Gpio => open_gpio(config),
    }
}

#[cfg(all(feature = "gpio", target_os = "linux"))]
fn open_gpio(config: &PulseConfig) -> PulseResult<Box<dyn DigitalOutput>> {
    let output = GpioOutput::open(&config.chip, config.pin, &config.consumer)?;
    Ok(Box::new(output))
}

#[cfg(not(all(feature = "gpio", target_os = "linux")))]
fn open_gpio(config: &PulseConfig) -> PulseResult<Box<dyn DigitalOutput>> {
    tracing::debug!("GPIO output requested but support is not compiled in");
    Err(pulse_common::error::PulseError::ResourceAcquisition {
        chip: config.chip.display().to_string(),
        line: config.pin,
        reason: "built without the `gpio` feature".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_counts_transitions() {
        let mut out = SimulatedOutput::new();
        for level in [true, true, false, true] {
            out.write(level).unwrap();
        }
        assert_eq!(out.writes(), 4);
        assert_eq!(out.transitions(), 3);
        assert!(out.level());
        assert_eq!(out.history(), &[true, true, false, true]);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut out = SimulatedOutput::with_history(2);
        for _ in 0..10 {
            out.write(true).unwrap();
        }
        assert_eq!(out.history().len(), 2);
        assert_eq!(out.writes(), 10);
    }

    #[test]
    fn test_release_drives_low() {
        let mut out: Box<dyn DigitalOutput> = Box::new(SimulatedOutput::new());
        out.write(true).unwrap();
        out.release().unwrap();
        assert_eq!(out.describe(), "simulated");
    }

    #[test]
    fn test_open_simulated_output() {
        let config = PulseConfig {
            output: OutputDriver::Simulated,
            ..Default::default()
        };
        let out = open_output(&config).unwrap();
        assert_eq!(out.describe(), "simulated");
    }

    #[cfg(not(feature = "gpio"))]
    #[test]
    fn test_gpio_without_feature_is_resource_error() {
        let config = PulseConfig::default();
        let err = open_output(&config).err().unwrap();
        assert!(matches!(err, pulse_common::error::PulseError::ResourceAcquisition { line: 23, .. }));
    }
}
