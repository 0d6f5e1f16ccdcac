//! Configuration for the soma streamer

use crate::error::ConfigError;
use crate::frame::FrameSize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shortest stall a stream may be considered stuck after
pub const MIN_STUCK_THRESHOLD: Duration = Duration::from_secs(1);

/// Batch detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Path to the face detection model
    pub model_path: PathBuf,
    /// Frame size every stream must deliver
    pub frame_size: FrameSize,
    /// Maximum frames per detection call; defaults to the number of streams
    pub batch_size: Option<usize>,
    /// How long a partial batch waits for more frames (milliseconds)
    pub batch_wait_ms: u64,
    /// Minimum confidence for a detection to be reported
    pub score_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./models/face_detection_yunet.onnx"),
            frame_size: FrameSize::new(1280, 720),
            batch_size: None,
            batch_wait_ms: 100,
            score_threshold: 0.8,
        }
    }
}

impl DetectorConfig {
    pub fn batch_wait(&self) -> Duration {
        Duration::from_millis(self.batch_wait_ms)
    }
}

/// One camera stream watching a passage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Source URI (rtsp://..., file path, device)
    pub uri: String,
    /// Passage the camera watches; used as the stream id
    pub passage_id: String,
    /// Nominal frame rate of the source
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Time without a successful read before the connection is recycled (milliseconds)
    #[serde(default = "default_stuck_threshold_ms")]
    pub stuck_threshold_ms: u64,
    /// Delay between failed connection attempts (milliseconds)
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    /// Delay after a failed read (milliseconds)
    #[serde(default = "default_read_retry_ms")]
    pub read_retry_ms: u64,
}

fn default_frame_rate() -> u32 {
    25
}

fn default_stuck_threshold_ms() -> u64 {
    10_000
}

fn default_reconnect_backoff_ms() -> u64 {
    3_000
}

fn default_read_retry_ms() -> u64 {
    1_000
}

impl StreamConfig {
    pub fn new(uri: impl Into<String>, passage_id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            passage_id: passage_id.into(),
            frame_rate: default_frame_rate(),
            stuck_threshold_ms: default_stuck_threshold_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            read_retry_ms: default_read_retry_ms(),
        }
    }

    /// Time budget of one frame at the nominal frame rate
    pub fn frame_interval(&self) -> Duration {
        let rate = self.frame_rate.max(1);
        Duration::from_secs(1) / rate
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_millis(self.stuck_threshold_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn read_retry(&self) -> Duration {
        Duration::from_millis(self.read_retry_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.uri.trim().is_empty() {
            return Err("uri is empty".to_string());
        }
        if self.passage_id.trim().is_empty() {
            return Err("passage_id is empty".to_string());
        }
        if self.frame_rate == 0 || self.frame_rate > 120 {
            return Err("frame_rate must be between 1 and 120".to_string());
        }
        if self.stuck_threshold() < MIN_STUCK_THRESHOLD {
            return Err("stuck_threshold_ms is too small (min 1000)".to_string());
        }
        Ok(())
    }
}

/// Detected face publishing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Directory to store face photos in; photos are not stored when unset
    pub photo_dir: Option<PathBuf>,
    /// JPEG quality of face crops (1-100)
    pub jpeg_quality: u8,
    /// Log every detected face
    pub log_faces: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            photo_dir: None,
            jpeg_quality: 90,
            log_faces: true,
        }
    }
}

/// Streamer configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamerConfig {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

impl StreamerConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_str(&content)
    }

    /// Load configuration from string, trying JSON, TOML, then YAML
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(config) = serde_json::from_str::<StreamerConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = toml::from_str::<StreamerConfig>(content) {
            return Ok(config);
        }

        serde_yaml::from_str::<StreamerConfig>(content)
            .map_err(|e| ConfigError::Parse(format!("not valid JSON, TOML or YAML: {}", e)))
    }

    /// Batch size actually used by the detector
    pub fn effective_batch_size(&self) -> usize {
        self.detector
            .batch_size
            .unwrap_or(self.streams.len())
            .max(1)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detector.model_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("detector.model_path is empty".to_string()));
        }
        if self.detector.frame_size.is_empty() {
            return Err(ConfigError::Invalid("detector.frame_size must be non-zero".to_string()));
        }
        if self.detector.batch_size == Some(0) {
            return Err(ConfigError::Invalid("detector.batch_size must be greater than 0".to_string()));
        }
        if self.detector.batch_wait_ms == 0 {
            return Err(ConfigError::Invalid("detector.batch_wait_ms must be greater than 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.detector.score_threshold) {
            return Err(ConfigError::Invalid(
                "detector.score_threshold must be between 0 and 1".to_string(),
            ));
        }
        if self.streams.is_empty() {
            return Err(ConfigError::Invalid("streams is empty".to_string()));
        }
        for (i, stream) in self.streams.iter().enumerate() {
            stream
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("stream #{}: {}", i, e)))?;
        }
        for (i, stream) in self.streams.iter().enumerate() {
            if self.streams[..i].iter().any(|s| s.passage_id == stream.passage_id) {
                return Err(ConfigError::Invalid(format!(
                    "stream #{}: duplicate passage_id '{}'",
                    i, stream.passage_id
                )));
            }
        }
        if self.publisher.jpeg_quality == 0 || self.publisher.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(
                "publisher.jpeg_quality must be between 1 and 100".to_string(),
            ));
        }
        Ok(())
    }
}
