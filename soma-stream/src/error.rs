//! Error types for soma-stream

use soma_core::{ConfigError, DetectError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to open stream {uri}: {reason}")]
    Open { uri: String, reason: String },

    #[error("Read error: {0}")]
    Read(String),

    #[error("Close error: {0}")]
    Close(String),

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Detection error: {0}")]
    Detect(#[from] DetectError),

    #[error("OpenCV error: {0}")]
    OpenCv(String),
}

impl StreamError {
    pub fn open<U: Into<String>, R: ToString>(uri: U, reason: R) -> Self {
        Self::Open {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for StreamError {
    fn from(err: opencv::Error) -> Self {
        StreamError::OpenCv(err.message)
    }
}
