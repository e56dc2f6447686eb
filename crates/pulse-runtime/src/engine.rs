//! Pulse pattern engine.
//!
//! Pure tick-driven decision logic. Each call to
//! [`PulsePatternEngine::on_tick`] advances the tick counter and returns
//! what the output should do:
//!
//! - **Plain**: level = `tick_count mod 2`
//! - **Skip**: every `modulus` ticks, hold the level for `length` ticks
//! - **Insert**: every `modulus` ticks, run a 4-tick window that produces
//!   one extra short pulse; otherwise level = `(tick_count >> 1) mod 2`
//!
//! The engine has no failure path and no clock; the same mode and the same
//! number of ticks always produce the same sequence of actions.
//!
//! # Timing Diagram (insert, modulus 8)
//!
//! ```text
//! tick   1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16
//! phase  - - - - - - - 1 2 3  4  -  -  -  -  1
//! level  0 1 1 0 0 1 1 0 1 0  1  0  0  1  1  0
//! ```

use pulse_common::config::PatternMode;
use pulse_common::state::PatternPhase;

/// Output decision for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Drive the output to this level.
    Drive(bool),
    /// Leave the output at its previous level.
    Hold,
}

impl TickAction {
    /// The driven level, if any.
    #[must_use]
    pub fn level(self) -> Option<bool> {
        match self {
            Self::Drive(level) => Some(level),
            Self::Hold => None,
        }
    }
}

/// Number of ticks in an insert window.
pub const INSERT_WINDOW: u8 = 4;

/// Tick-driven pattern state machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PulsePatternEngine {
    /// Pattern selected at setup.
    mode: PatternMode,
    /// Ticks seen since arming.
    tick_count: u64,
    /// Skip episode progress; 0 when not skipping.
    skipped_count: u64,
    /// Insert window phase 1..=4; 0 when inactive.
    insert_phase: u8,
}

impl PulsePatternEngine {
    /// Create an engine for `mode` with all counters at zero.
    #[must_use]
    pub fn new(mode: PatternMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Pattern selected at setup.
    #[must_use]
    pub fn mode(&self) -> PatternMode {
        self.mode
    }

    /// Ticks processed so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Skip episode progress (0 = not skipping).
    #[must_use]
    pub fn skipped_count(&self) -> u64 {
        self.skipped_count
    }

    /// Insert window phase (0 = inactive).
    #[must_use]
    pub fn insert_phase(&self) -> u8 {
        self.insert_phase
    }

    /// Sub-state after the most recent tick.
    #[must_use]
    pub fn phase(&self) -> PatternPhase {
        if self.skipped_count != 0 {
            PatternPhase::Skipping
        } else if self.insert_phase != 0 {
            PatternPhase::Inserting
        } else {
            PatternPhase::Normal
        }
    }

    /// Advance by one tick and decide the output.
    pub fn on_tick(&mut self) -> TickAction {
        self.tick_count += 1;

        match self.mode {
            PatternMode::Insert { modulus } if modulus != 0 => self.insert(modulus),
            PatternMode::Skip { modulus, length } if modulus != 0 => self.skip(modulus, length),
            _ => TickAction::Drive(self.parity()),
        }
    }

    /// Advance by one tick with plain alternation, ignoring the mode.
    ///
    /// Used by the jitter recorder, which measures the raw timer.
    pub fn toggle(&mut self) -> TickAction {
        self.tick_count += 1;
        TickAction::Drive(self.parity())
    }

    fn parity(&self) -> bool {
        self.tick_count % 2 == 1
    }

    fn skip(&mut self, modulus: u64, length: u64) -> TickAction {
        if self.skipped_count == 0 {
            if self.tick_count % modulus == 0 {
                self.skipped_count = 1;
                return TickAction::Hold;
            }
            return TickAction::Drive(self.parity());
        }

        self.skipped_count += 1;
        // `>=` so a length below 2 still ends the episode
        if self.skipped_count >= length {
            self.skipped_count = 0;
        }
        TickAction::Hold
    }

    fn insert(&mut self, modulus: u64) -> TickAction {
        if self.tick_count % modulus == 0 {
            self.insert_phase = 1;
        }

        if self.insert_phase == 0 {
            return TickAction::Drive((self.tick_count >> 1) % 2 == 1);
        }

        let level = matches!(self.insert_phase, 2 | 4);
        self.insert_phase += 1;
        if self.insert_phase > INSERT_WINDOW {
            self.insert_phase = 0;
        }
        TickAction::Drive(level)
    }
}
