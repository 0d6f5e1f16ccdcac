//! Collaborator traits the pipeline is assembled from

use crate::detection::{DetectedFace, Detection};
use crate::frame::Frame;
use std::sync::Arc;

/// Native face detector.
///
/// Called with an ordered batch of frames, returns one list of detections per
/// frame in the same order, or fails the whole call. Implementations block for
/// the full duration of the batch and are never called concurrently.
pub trait DetectionWorker: Send + 'static {
    fn detect(&mut self, frames: &[Frame]) -> anyhow::Result<Vec<Vec<Detection>>>;
}

impl<F> DetectionWorker for F
where
    F: FnMut(&[Frame]) -> anyhow::Result<Vec<Vec<Detection>>> + Send + 'static,
{
    fn detect(&mut self, frames: &[Frame]) -> anyhow::Result<Vec<Vec<Detection>>> {
        self(frames)
    }
}

/// Consumer of frames read by a stream reader.
///
/// `handle_frame` runs on the reader's thread; the time it takes drives the
/// reader's frame skipping.
pub trait FrameHandler: Send + Sync {
    fn handle_frame(&self, frame: Frame);
}

impl<T: FrameHandler + ?Sized> FrameHandler for Arc<T> {
    fn handle_frame(&self, frame: Frame) {
        (**self).handle_frame(frame)
    }
}

/// Sink for detected faces (message bus, photo storage, logs).
pub trait DetectedFacePublisher: Send + Sync {
    fn publish(&self, face: DetectedFace);
}

impl<T: DetectedFacePublisher + ?Sized> DetectedFacePublisher for Arc<T> {
    fn publish(&self, face: DetectedFace) {
        (**self).publish(face)
    }
}
