//! Engine lifecycle state machine.
//!
//! IDLE → TOGGLING → STOPPED
//!
//! STOPPED is terminal: a disarmed engine is not re-armed, a fresh
//! context is built instead.

use crate::error::{PulseError, PulseResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of the pulse engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    /// Context built, timer not yet armed.
    #[default]
    Idle,
    /// Timer armed, ticks are being processed.
    Toggling,
    /// Timer disarmed by the controller.
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Toggling => write!(f, "TOGGLING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

impl EngineState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: EngineState) -> bool {
        use EngineState::{Idle, Stopped, Toggling};

        matches!(
            (self, target),
            (Idle, Toggling)
                | (Toggling, Stopped)
                // Arming failed or the operator quit before arming
                | (Idle, Stopped)
        )
    }

    /// Returns true while ticks are being processed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Toggling)
    }
}

/// Transient sub-state of a toggling engine, derived from the tick context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PatternPhase {
    /// Plain alternation.
    #[default]
    Normal,
    /// Inside a skip episode; the output holds its level.
    Skipping,
    /// Inside an insert window.
    Inserting,
}

impl fmt::Display for PatternPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Skipping => write!(f, "skipping"),
            Self::Inserting => write!(f, "inserting"),
        }
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: EngineState,
    previous: Option<EngineState>,
    transition_count: u64,
}

impl StateMachine {
    /// Create a new state machine starting in IDLE.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<EngineState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::InvalidStateTransition`] if `target` is not
    /// reachable from the current state.
    pub fn transition(&mut self, target: EngineState) -> PulseResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(PulseError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }
}
