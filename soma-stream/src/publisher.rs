//! Detected face publishers

use crate::error::StreamError;
use soma_core::{DetectedFace, DetectedFacePublisher, PublisherConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Logs every face; the photo itself is not logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl DetectedFacePublisher for TracingPublisher {
    fn publish(&self, face: DetectedFace) {
        info!(
            stream = %face.stream_id,
            confidence = face.detect_confidence,
            latency_ms = face.latency().num_milliseconds(),
            photo_bytes = face.photo.len(),
            "Face detected"
        );
        match serde_json::to_string(&face.metadata()) {
            Ok(json) => debug!(face = %json, "Face metadata"),
            Err(e) => warn!("Failed to serialize face metadata: {}", e),
        }
    }
}

/// Forwards faces to an async consumer over a bounded channel.
///
/// Faces are dropped with a warning while the channel is full.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<DetectedFace>,
}

impl ChannelPublisher {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<DetectedFace>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl DetectedFacePublisher for ChannelPublisher {
    fn publish(&self, face: DetectedFace) {
        match self.tx.try_send(face) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(face)) => {
                warn!(stream = %face.stream_id, "Face channel full, dropping face");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Face channel closed");
            }
        }
    }
}

/// Stores face photos on disk under a random id, two directory levels deep:
/// `ab/cd/abcd...jpg`.
#[derive(Debug, Clone)]
pub struct PhotoDirPublisher {
    dir: PathBuf,
}

impl PhotoDirPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the face photo and return its path.
    pub fn store(&self, face: &DetectedFace) -> Result<PathBuf, StreamError> {
        if face.photo.is_empty() {
            return Err(StreamError::Encode("face has no photo".to_string()));
        }
        let id = Uuid::new_v4().simple().to_string();
        let path = photo_path(&self.dir, &id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &face.photo)?;
        Ok(path)
    }
}

impl DetectedFacePublisher for PhotoDirPublisher {
    fn publish(&self, face: DetectedFace) {
        match self.store(&face) {
            Ok(path) => debug!(stream = %face.stream_id, path = %path.display(), "Face photo stored"),
            Err(e) => error!(stream = %face.stream_id, "Failed to store face photo: {}", e),
        }
    }
}

/// Sharded location of photo `id` under `base`. Ids shorter than four
/// characters are stored directly in `base`.
pub fn photo_path(base: &Path, id: &str) -> PathBuf {
    let file = format!("{}.jpg", id);
    match (id.get(0..2), id.get(2..4)) {
        (Some(first), Some(second)) => base.join(first).join(second).join(file),
        _ => base.join(file),
    }
}

/// Publishes every face to each inner publisher in order.
#[derive(Clone, Default)]
pub struct FanoutPublisher {
    publishers: Vec<Arc<dyn DetectedFacePublisher>>,
}

impl FanoutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, publisher: Arc<dyn DetectedFacePublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl DetectedFacePublisher for FanoutPublisher {
    fn publish(&self, face: DetectedFace) {
        let Some((last, rest)) = self.publishers.split_last() else {
            return;
        };
        for publisher in rest {
            publisher.publish(face.clone());
        }
        last.publish(face);
    }
}

/// Build the publisher chain described by `config`.
pub fn publisher_from_config(config: &PublisherConfig) -> Arc<dyn DetectedFacePublisher> {
    let mut fanout = FanoutPublisher::new();
    if config.log_faces {
        fanout = fanout.with(Arc::new(TracingPublisher));
    }
    if let Some(dir) = &config.photo_dir {
        info!(dir = %dir.display(), "Storing face photos");
        fanout = fanout.with(Arc::new(PhotoDirPublisher::new(dir.clone())));
    }
    Arc::new(fanout)
}
