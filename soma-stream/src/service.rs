//! Streamer service: many stream readers sharing one batch detector

use crate::error::StreamError;
use crate::handler::FaceFrameHandler;
use crate::reader::{StreamReader, StreamStats};
use crate::source::SourceOpener;
use soma_core::{DetectedFacePublisher, DetectionWorker, StreamerConfig};
use soma_detect::{BatchConfig, BatchScheduler, SchedulerStats};
use std::sync::Arc;
use tracing::{error, info};

/// Running pipeline. Must be shut down from within the tokio runtime it was
/// started on.
pub struct Streamer {
    scheduler: BatchScheduler,
    readers: Vec<StreamReader>,
}

impl Streamer {
    /// Validate `config`, start the scheduler in front of `worker` and one
    /// reader per configured stream.
    pub fn start<W: DetectionWorker>(
        config: &StreamerConfig,
        opener: Arc<dyn SourceOpener>,
        worker: W,
        publisher: Arc<dyn DetectedFacePublisher>,
    ) -> Result<Self, StreamError> {
        config.validate()?;

        let scheduler = BatchScheduler::new(BatchConfig::from_streamer_config(config), worker)?;
        let handler = Arc::new(FaceFrameHandler::new(
            scheduler.clone(),
            publisher,
            config.publisher.jpeg_quality,
        ));

        let mut readers = Vec::with_capacity(config.streams.len());
        for stream in &config.streams {
            match StreamReader::start(stream.clone(), Arc::clone(&opener), handler.clone()) {
                Ok(reader) => readers.push(reader),
                Err(e) => {
                    error!(stream = %stream.passage_id, "Failed to start stream reader: {}", e);
                    let partial = Self { scheduler, readers };
                    partial.abort();
                    return Err(e);
                }
            }
        }

        info!(streams = readers.len(), "Streamer started");
        Ok(Self { scheduler, readers })
    }

    pub fn scheduler(&self) -> &BatchScheduler {
        &self.scheduler
    }

    pub fn stream_stats(&self) -> Vec<(String, StreamStats)> {
        self.readers
            .iter()
            .map(|r| (r.id().to_string(), r.stats()))
            .collect()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Stop every reader, then drain the scheduler and release the worker.
    pub async fn shutdown(self) {
        let Self { scheduler, readers } = self;
        info!(streams = readers.len(), "Stopping stream readers");

        // readers block on in-flight detections that need this runtime
        let stopped = tokio::task::spawn_blocking(move || {
            for mut reader in readers {
                reader.stop();
            }
        })
        .await;
        if let Err(e) = stopped {
            error!("Failed to stop stream readers: {}", e);
        }

        scheduler.shutdown().await;
        info!("Streamer stopped");
    }

    /// Startup failure path: stop whatever was started without awaiting.
    fn abort(self) {
        let Self { scheduler, readers } = self;
        tokio::spawn(async move {
            let _ = tokio::task::spawn_blocking(move || drop(readers)).await;
            scheduler.shutdown().await;
        });
    }
}
