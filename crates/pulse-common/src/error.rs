use thiserror::Error;

/// Error types covering configuration, output resources, timers, and scheduling.
///
/// The pulse pattern engine itself is total and never produces one of these;
/// they all originate in the collaborators around it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PulseError {
    /// Configuration or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The output line could not be opened or claimed.
    #[error("failed to acquire output line {line} on {chip}: {reason}")]
    ResourceAcquisition {
        /// Chip or controller identifier.
        chip: String,
        /// Line offset on the chip.
        line: u32,
        /// Underlying failure.
        reason: String,
    },

    /// Writing a level to an already acquired output failed.
    #[error("output write failed: {0}")]
    OutputWrite(String),

    /// The periodic timer could not be created.
    #[error("timer creation failed: {0}")]
    TimerCreation(String),

    /// The periodic timer could not be started.
    #[error("timer arm failed: {0}")]
    TimerArm(String),

    /// Elevated scheduling could not be applied.
    ///
    /// Callers treat this as a warning unless fail-fast was requested.
    #[error("scheduling warning: {0}")]
    Scheduling(String),

    /// The tick processing path failed unexpectedly.
    #[error("tick path fault: {0}")]
    Fault(String),

    /// Invalid engine lifecycle transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl PulseError {
    /// Returns true for errors that must stop the process.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Scheduling(_))
    }
}

/// Convenience type alias for pulse-train operations.
pub type PulseResult<T> = Result<T, PulseError>;
