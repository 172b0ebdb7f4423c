// src/error.rs
//! Unified error handling for the decomposition engine
//!
//! Every numeric stage reports failures through [`DecompError`]. The variants
//! follow the engine's taxonomy: some are fatal to the call that raised them
//! (`InvalidShape`), some tell the caller to skip a grid or window
//! (`DegenerateCovariance`), and some are informational only
//! (`MaxIterExceeded`, `EmptyDischargeSet`). Batch operations use
//! [`DecompError::is_recoverable`] to decide whether to continue.

use thiserror::Error;

/// Result type alias for engine operations
pub type DecompResult<T> = Result<T, DecompError>;

/// Errors raised by the decomposition and editing engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecompError {
    /// Malformed channel/sample dimensions
    #[error("Invalid shape for {what}: {reason}")]
    InvalidShape { what: String, reason: String },

    /// Whitening failed because no eigenvalue survived the rank guard
    #[error("Degenerate covariance: {retained} of {total} eigenvalues above threshold")]
    DegenerateCovariance { retained: usize, total: usize },

    /// Fixed-point iteration hit its cap; the last weights are still usable
    #[error("Fixed-point iteration did not converge after {iterations} iterations (last delta {delta:.3e})")]
    MaxIterExceeded { iterations: usize, delta: f64 },

    /// Too few discharge times for the requested operation
    #[error("Discharge set too small: {count} discharge times, at least {required} required")]
    EmptyDischargeSet { count: usize, required: usize },

    /// Grid index out of range
    #[error("Grid {0} not found")]
    GridNotFound(usize),

    /// Motor unit index out of range
    #[error("Motor unit {unit} not found in grid {grid}")]
    UnitNotFound { grid: usize, unit: usize },

    /// Sample window empty, reversed or outside the signal
    #[error("Invalid window {start}..{end} for a signal of {len} samples")]
    InvalidWindow { start: usize, end: usize, len: usize },

    /// Filter refinement requested on a grid without channel data
    #[error("No channel data attached to grid {0}")]
    SignalNotAttached(usize),

    /// Invalid engine parameters
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DecompError {
    /// Shorthand for [`DecompError::InvalidShape`]
    pub fn invalid_shape(what: &str, reason: impl Into<String>) -> Self {
        DecompError::InvalidShape {
            what: what.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether a batch loop may log this error and move on to the next unit
    pub fn is_recoverable(&self) -> bool {
        match self {
            DecompError::DegenerateCovariance { .. }
            | DecompError::MaxIterExceeded { .. }
            | DecompError::EmptyDischargeSet { .. }
            | DecompError::InvalidWindow { .. }
            | DecompError::SignalNotAttached(_) => true,
            DecompError::InvalidShape { .. }
            | DecompError::GridNotFound(_)
            | DecompError::UnitNotFound { .. }
            | DecompError::Configuration(_) => false,
        }
    }
}
