//! soma-stream: camera stream ingestion for the soma face pipeline
//!
//! Provides:
//! - A stream reader that owns one live source, reconnects after stalls and
//!   skips buffered frames to keep pace with detection latency
//! - A frame handler that runs frames through the batch detector and
//!   publishes cropped faces
//! - Detected face publishers (logs, channels, photo directory)
//! - A streamer service wiring many readers to one shared detector

pub mod error;
pub mod source;
pub mod reader;
pub mod crop;
pub mod handler;
pub mod publisher;
pub mod service;
pub mod backends;

pub use error::StreamError;
pub use source::{SourceOpener, VideoSource};
pub use reader::{frames_to_skip, StreamReader, StreamStats};
pub use handler::FaceFrameHandler;
pub use publisher::{
    publisher_from_config, ChannelPublisher, FanoutPublisher, PhotoDirPublisher, TracingPublisher,
};
pub use service::Streamer;
