//! Tick context: the state owned by the tick processing path.
//!
//! Configuration (the pattern mode and the recorder capacity) is fixed when
//! the context is built. After that only [`TickContext::on_tick`] mutates it,
//! and it runs on exactly one thread at a time, so no locking is needed.

use crate::engine::{PulsePatternEngine, TickAction};
use crate::output::DigitalOutput;
use crate::recorder::JitterRecorder;
use crate::timer::Tick;
use pulse_common::config::{PatternMode, PulseConfig};
use pulse_common::state::PatternPhase;
use tracing::{trace, warn};

/// Shared state between successive ticks.
#[derive(Debug)]
pub struct TickContext<O> {
    /// Output line driven by the engine.
    output: O,
    /// Pattern state machine.
    engine: PulsePatternEngine,
    /// Timestamp capture, present only in diagnostic mode.
    recorder: Option<JitterRecorder>,
    /// Last driven level.
    level: bool,
    /// Failed output writes.
    write_errors: u64,
    /// Sequence number of the last tick seen.
    last_seq: u64,
    /// Ticks the timer generated that never reached this context.
    lost_ticks: u64,
}

impl<O: DigitalOutput> TickContext<O> {
    /// Build a context running `mode` on `output`.
    pub fn new(output: O, mode: PatternMode) -> Self {
        Self {
            output,
            engine: PulsePatternEngine::new(mode),
            recorder: None,
            level: false,
            write_errors: 0,
            last_seq: 0,
            lost_ticks: 0,
        }
    }

    /// Enable diagnostic mode with a timestamp buffer of `capacity` samples.
    ///
    /// In diagnostic mode the pattern is bypassed and the output simply toggles.
    #[must_use]
    pub fn with_recorder(mut self, capacity: usize) -> Self {
        self.recorder = Some(JitterRecorder::new(capacity));
        self
    }

    /// Build a context from resolved configuration.
    pub fn from_config(output: O, config: &PulseConfig) -> Self {
        let ctx = Self::new(output, config.pattern_mode());
        if config.diagnostics.enabled {
            ctx.with_recorder(config.diagnostic_capacity())
        } else {
            ctx
        }
    }

    /// Process one tick: decide, then drive the output or record a sample.
    pub fn on_tick(&mut self, tick: Tick) -> TickAction {
        if self.last_seq != 0 && tick.seq > self.last_seq + 1 {
            self.lost_ticks += tick.seq - self.last_seq - 1;
        }
        self.last_seq = tick.seq;

        let action = match self.recorder.as_mut() {
            Some(recorder) => {
                recorder.record(tick.at);
                self.engine.toggle()
            }
            None => self.engine.on_tick(),
        };

        if let TickAction::Drive(level) = action {
            self.level = level;
            if let Err(e) = self.output.write(level) {
                self.write_errors += 1;
                if self.write_errors == 1 {
                    warn!(error = %e, tick = self.engine.tick_count(), "Output write failed");
                }
            }
        }

        trace!(
            seq = tick.seq,
            tick = self.engine.tick_count(),
            ?action,
            "Tick processed"
        );
        action
    }

    /// Ticks processed so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.engine.tick_count()
    }

    /// Skip trigger period in ticks (0 = disabled).
    #[must_use]
    pub fn skip_modulus(&self) -> u64 {
        match self.engine.mode() {
            PatternMode::Skip { modulus, .. } => modulus,
            _ => 0,
        }
    }

    /// Skip episode length in ticks.
    #[must_use]
    pub fn pulses_to_skip(&self) -> u64 {
        match self.engine.mode() {
            PatternMode::Skip { length, .. } => length,
            _ => 0,
        }
    }

    /// Skip episode progress (0 = not skipping).
    #[must_use]
    pub fn skipped_count(&self) -> u64 {
        self.engine.skipped_count()
    }

    /// Insert window period in ticks (0 = disabled).
    #[must_use]
    pub fn insert_modulus(&self) -> u64 {
        match self.engine.mode() {
            PatternMode::Insert { modulus } => modulus,
            _ => 0,
        }
    }

    /// Insert window phase (0 = inactive).
    #[must_use]
    pub fn insert_phase(&self) -> u8 {
        self.engine.insert_phase()
    }

    /// Sub-state after the most recent tick.
    #[must_use]
    pub fn phase(&self) -> PatternPhase {
        self.engine.phase()
    }

    /// Last level driven onto the output.
    #[must_use]
    pub fn level(&self) -> bool {
        self.level
    }

    /// Number of failed output writes.
    #[must_use]
    pub fn write_errors(&self) -> u64 {
        self.write_errors
    }

    /// Ticks lost between the timer and this context.
    #[must_use]
    pub fn lost_ticks(&self) -> u64 {
        self.lost_ticks
    }

    /// True when running in diagnostic mode.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        self.recorder.is_some()
    }

    /// Timestamp recorder, in diagnostic mode.
    #[must_use]
    pub fn recorder(&self) -> Option<&JitterRecorder> {
        self.recorder.as_ref()
    }

    /// The output being driven.
    #[must_use]
    pub fn output(&self) -> &O {
        &self.output
    }

    /// Mutable access to the output, e.g. to release it after a run.
    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}
