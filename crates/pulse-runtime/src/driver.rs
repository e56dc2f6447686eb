//! Tick bridge between a periodic timer and the tick context.
//!
//! The timer thread is the only producer and pushes [`Tick`]s into a bounded
//! channel. A dedicated consumer thread owns the [`TickContext`] for the
//! whole run and is the only place it is mutated. The controlling thread
//! never touches the context while toggling. It gets the context back from
//! [`PulseDriver::stop`] once the consumer has drained the channel.
//!
//! ```text
//!  timer thread ──Tick──▶ [bounded channel] ──▶ consumer thread
//!                                                  │ TickContext::on_tick
//!                                                  ▼
//!                                             DigitalOutput
//! ```

use crate::context::TickContext;
use crate::output::DigitalOutput;
use crate::timer::{PeriodicTimer, StartMode, TickSender, TimerHandle, TimerStats};
use crossbeam_channel::bounded;
use pulse_common::config::PulseConfig;
use pulse_common::error::{PulseError, PulseResult};
use pulse_common::state::{EngineState, StateMachine};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Everything left over after a run.
#[derive(Debug)]
pub struct PulseRun<O> {
    /// The context as the consumer left it.
    pub context: TickContext<O>,
    /// Timer delivery statistics at disarm.
    pub timer_stats: TimerStats,
    /// Wall time between arming and disarming.
    pub elapsed: Duration,
}

struct Running<O> {
    timer: Box<dyn TimerHandle>,
    consumer: JoinHandle<TickContext<O>>,
    started: Instant,
}

/// Owns the lifecycle of one pulse train: Idle → Toggling → Stopped.
pub struct PulseDriver<O> {
    /// Engine lifecycle state machine.
    state: StateMachine,
    /// Context while idle; moved into the consumer thread while toggling.
    context: Option<TickContext<O>>,
    /// Timer firing interval.
    interval: Duration,
    /// First-tick policy.
    start: StartMode,
    /// Tick channel capacity.
    channel_capacity: usize,
    running: Option<Running<O>>,
}

impl<O: DigitalOutput + 'static> PulseDriver<O> {
    /// Create an idle driver for `context`.
    pub fn new(
        context: TickContext<O>,
        interval: Duration,
        start: StartMode,
        channel_capacity: usize,
    ) -> Self {
        Self {
            state: StateMachine::new(),
            context: Some(context),
            interval,
            start,
            channel_capacity: channel_capacity.max(1),
            running: None,
        }
    }

    /// Create an idle driver from resolved configuration.
    pub fn from_config(output: O, config: &PulseConfig) -> Self {
        let start = config
            .start_at()
            .map_or(StartMode::Relative(config.initial_delay), StartMode::Absolute);
        Self::new(
            TickContext::from_config(output, config),
            config.timer_interval(),
            start,
            config.channel_capacity,
        )
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state.state()
    }

    /// Timer firing interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// First-tick policy.
    pub fn start_mode(&self) -> StartMode {
        self.start
    }

    /// Live timer statistics while toggling.
    pub fn timer_stats(&self) -> Option<TimerStats> {
        self.running.as_ref().map(|r| r.timer.stats())
    }

    /// Hand the context to a consumer thread and arm `timer`.
    ///
    /// Transitions IDLE → TOGGLING. On failure the driver ends up STOPPED.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::InvalidStateTransition`] unless idle,
    /// [`PulseError::TimerArm`] if the consumer thread cannot be spawned, or
    /// whatever error the timer reports while arming.
    pub fn start(&mut self, timer: &mut dyn PeriodicTimer) -> PulseResult<()> {
        self.state.transition(EngineState::Toggling)?;
        let Some(context) = self.context.take() else {
            self.state.transition(EngineState::Stopped)?;
            return Err(PulseError::Fault("tick context lost".into()));
        };

        let (tx, rx) = bounded(self.channel_capacity);
        let consumer = thread::Builder::new()
            .name("pulse-engine".into())
            .spawn(move || {
                let mut context = context;
                debug!("Tick consumer started");
                for tick in rx {
                    context.on_tick(tick);
                }
                debug!(ticks = context.tick_count(), "Tick consumer drained");
                context
            });
        let consumer = match consumer {
            Ok(handle) => handle,
            Err(e) => {
                self.state.transition(EngineState::Stopped)?;
                return Err(PulseError::TimerArm(format!(
                    "failed to spawn tick consumer: {e}"
                )));
            }
        };

        info!(
            interval_us = self.interval.as_micros(),
            start = ?self.start,
            channel_capacity = self.channel_capacity,
            "Arming pulse timer"
        );

        match timer.arm(self.interval, self.start, TickSender::new(tx)) {
            Ok(handle) => {
                self.running = Some(Running {
                    timer: handle,
                    consumer,
                    started: Instant::now(),
                });
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Timer arming failed");
                // The sender was dropped with the failed arm, so the consumer exits
                match consumer.join() {
                    Ok(context) => self.context = Some(context),
                    Err(_) => warn!("Tick consumer panicked during failed start"),
                }
                self.state.transition(EngineState::Stopped)?;
                Err(e)
            }
        }
    }

    /// Disarm the timer and take the context back.
    ///
    /// Transitions TOGGLING → STOPPED. Ticks already queued when the timer
    /// is disarmed are processed before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::InvalidStateTransition`] unless toggling, or
    /// [`PulseError::Fault`] if the consumer thread panicked.
    pub fn stop(&mut self) -> PulseResult<PulseRun<O>> {
        let Some(running) = self.running.take() else {
            return Err(PulseError::InvalidStateTransition {
                from: self.state.state().to_string(),
                to: EngineState::Stopped.to_string(),
            });
        };

        info!("Disarming pulse timer");
        let timer_stats = running.timer.disarm();
        let elapsed = running.started.elapsed();
        self.state.transition(EngineState::Stopped)?;

        let context = running
            .consumer
            .join()
            .map_err(|_| PulseError::Fault("tick consumer panicked".into()))?;

        if timer_stats.dropped > 0 || timer_stats.overruns > 0 {
            warn!(
                dropped = timer_stats.dropped,
                overruns = timer_stats.overruns,
                "Ticks were lost during the run"
            );
        }
        info!(
            ticks = context.tick_count(),
            elapsed_ms = elapsed.as_millis(),
            "Pulse train stopped"
        );

        Ok(PulseRun {
            context,
            timer_stats,
            elapsed,
        })
    }
}

impl<O> Drop for PulseDriver<O> {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            warn!("Pulse driver dropped while toggling, disarming");
            running.timer.disarm();
            let _ = running.consumer.join();
        }
    }
}

/// Builder for [`PulseDriver`].
pub struct PulseDriverBuilder<O> {
    context: TickContext<O>,
    interval: Duration,
    start: StartMode,
    channel_capacity: usize,
}

impl<O: DigitalOutput + 'static> PulseDriverBuilder<O> {
    /// Start from a context, using a half-period of the default period.
    pub fn new(context: TickContext<O>) -> Self {
        let defaults = PulseConfig::default();
        Self {
            context,
            interval: defaults.timer_interval(),
            start: StartMode::Relative(defaults.initial_delay),
            channel_capacity: defaults.channel_capacity,
        }
    }

    /// Set the timer firing interval.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the first-tick policy.
    #[must_use]
    pub fn start(mut self, start: StartMode) -> Self {
        self.start = start;
        self
    }

    /// Set the tick channel capacity.
    #[must_use]
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Build the driver.
    pub fn build(self) -> PulseDriver<O> {
        PulseDriver::new(
            self.context,
            self.interval,
            self.start,
            self.channel_capacity,
        )
    }
}
