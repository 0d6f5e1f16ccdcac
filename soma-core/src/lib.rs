//! soma-core: shared vocabulary of the soma face pipeline
//!
//! Provides:
//! - Frames, pixel buffers and detections exchanged between stream readers
//!   and the batch detector
//! - The collaborator traits the pipeline is assembled from
//! - Streamer configuration loading and validation
//! - Error types shared across crates

pub mod error;
pub mod frame;
pub mod detection;
pub mod traits;
pub mod config;

pub use error::{ConfigError, DetectError};
pub use frame::{Frame, FrameSize, PixelBuffer, PixelFormat};
pub use detection::{DetectedFace, DetectedFrame, Detection, Rect};
pub use traits::{DetectedFacePublisher, DetectionWorker, FrameHandler};
pub use config::{DetectorConfig, PublisherConfig, StreamConfig, StreamerConfig};
