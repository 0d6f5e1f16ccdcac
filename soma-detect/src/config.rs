//! Batch scheduler configuration

use soma_core::{ConfigError, FrameSize, StreamerConfig};
use std::time::Duration;

/// Batching limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Size every submitted frame must have
    pub frame_size: FrameSize,
    /// A batch is dispatched as soon as it holds this many frames
    pub max_batch_size: usize,
    /// A batch is dispatched this long after its first frame at the latest
    pub max_wait: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            frame_size: FrameSize::new(1280, 720),
            max_batch_size: 4,
            max_wait: Duration::from_millis(100),
        }
    }
}

impl BatchConfig {
    pub fn new(frame_size: FrameSize, max_batch_size: usize, max_wait: Duration) -> Self {
        Self {
            frame_size,
            max_batch_size,
            max_wait,
        }
    }

    /// Batching limits of a streamer deployment
    pub fn from_streamer_config(config: &StreamerConfig) -> Self {
        Self {
            frame_size: config.detector.frame_size,
            max_batch_size: config.effective_batch_size(),
            max_wait: config.detector.batch_wait(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max_batch_size must be greater than 0".to_string()));
        }
        if self.max_wait.is_zero() {
            return Err(ConfigError::Invalid("max_wait must be greater than 0".to_string()));
        }
        if self.frame_size.is_empty() {
            return Err(ConfigError::Invalid("frame_size must be non-zero".to_string()));
        }
        Ok(())
    }
}
