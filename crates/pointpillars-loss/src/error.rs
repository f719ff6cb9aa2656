//! Error types for the PointPillars loss.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while configuring or evaluating the detection loss.
#[derive(Debug, Error)]
pub enum PointPillarsLossError {
    /// A target/prediction pair, or a head output, does not match the expected layout.
    #[error("shape mismatch for {tensor}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Name of the offending tensor.
        tensor: &'static str,
        /// Shape implied by the occupancy grid or the paired tensor.
        expected: Vec<usize>,
        /// Shape actually received.
        actual: Vec<usize>,
    },

    /// A hyperparameter is outside its meaningful range.
    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        parameter: &'static str,
        reason: String,
    },

    /// The configuration file could not be read or parsed.
    #[error("failed to load loss configuration from {path}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    /// Loss values could not be read back from the device.
    #[error("failed to read back loss values: {reason}")]
    Readback { reason: String },
}

/// A specialized `Result` type for loss configuration and evaluation.
pub type PointPillarsLossResult<T> = Result<T, PointPillarsLossError>;
