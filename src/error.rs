//! Error types for motion synthesis.
//!
//! Configuration problems are reported before any optimization step runs;
//! numerical failures during optimization abort the run.

use thiserror::Error;

/// Main error type for motion synthesis operations.
#[derive(Error, Debug)]
pub enum SynthesisError {
    /// Configuration validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input data validation errors.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Two sequences that must share a layout do not.
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Sequence is too short for the requested operation.
    #[error("Sequence too short: need at least {min} frames, got {actual}")]
    SequenceTooShort { min: usize, actual: usize },

    /// Velocity profile name is not one of the supported curves.
    #[error(
        "Unknown profile type: {name}. Supported types: linear_decel, linear_accel, \
         smooth_decel, smooth_accel, constant, ease_in_out"
    )]
    UnknownProfileType { name: String },

    /// Two keyframe ranges cover the same output frames.
    #[error("Keyframe ranges overlap: {first} and {second}")]
    KeyframeOverlap { first: String, second: String },

    /// A keyframe range does not fit inside the output sequence.
    #[error("Keyframe range [{start}, {end}) out of range for {frames} frames")]
    KeyframeOutOfRange {
        start: usize,
        end: usize,
        frames: usize,
    },

    /// Numerical computation resulted in NaN or Inf.
    #[error("Numerical instability: {context}")]
    NumericalInstability { context: String },

    /// Writing debug output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for motion synthesis operations.
pub type Result<T> = std::result::Result<T, SynthesisError>;

impl SynthesisError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a sequence too short error.
    #[must_use]
    pub const fn sequence_too_short(min: usize, actual: usize) -> Self {
        Self::SequenceTooShort { min, actual }
    }

    /// Create an unknown profile type error.
    #[must_use]
    pub fn unknown_profile_type(name: impl Into<String>) -> Self {
        Self::UnknownProfileType { name: name.into() }
    }

    /// Create a numerical instability error.
    #[must_use]
    pub fn numerical_instability(context: impl Into<String>) -> Self {
        Self::NumericalInstability {
            context: context.into(),
        }
    }

    /// Whether this error was raised by configuration validation.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::UnknownProfileType { .. }
                | Self::KeyframeOverlap { .. }
                | Self::KeyframeOutOfRange { .. }
        )
    }
}
