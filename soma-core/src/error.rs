//! Error types for soma-core

use thiserror::Error;

/// Terminal outcome of a failed detection submission.
///
/// Cloneable: a worker failure is broadcast to every submission of the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    #[error("invalid frame size {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    InvalidFrameSize {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("detection failed: {0}")]
    Worker(String),

    #[error("detector returned {actual} results for a batch of {expected} frames")]
    ResultCountMismatch { expected: usize, actual: usize },

    #[error("detector is shutting down")]
    ShuttingDown,
}

impl DetectError {
    pub fn worker<S: Into<String>>(msg: S) -> Self {
        Self::Worker(msg.into())
    }

    /// Whether the error was raised before the frame entered a batch.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidFrameSize { .. })
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
