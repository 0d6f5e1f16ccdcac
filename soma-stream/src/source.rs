//! Live video source abstraction

use crate::error::StreamError;
use soma_core::PixelBuffer;

/// An open connection to a live video source.
///
/// Owned exclusively by one stream reader thread.
pub trait VideoSource: Send {
    /// Discard up to `frames` buffered frames without decoding them.
    fn grab(&mut self, frames: usize);

    /// Read the next frame; `None` when no frame could be read.
    fn read(&mut self) -> Option<PixelBuffer>;

    /// Release the connection.
    fn close(&mut self) -> Result<(), StreamError>;
}

/// Opens video sources by URI
pub trait SourceOpener: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn VideoSource>, StreamError>;
}
