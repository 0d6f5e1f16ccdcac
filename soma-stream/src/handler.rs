//! Frame handler that turns frames into published face crops

use crate::crop::encode_crop;
use chrono::Utc;
use metrics::counter;
use soma_core::{DetectedFace, DetectedFacePublisher, Frame, FrameHandler};
use soma_detect::BatchScheduler;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Submits each frame to the shared [`BatchScheduler`], blocks the calling
/// reader thread until its detections arrive and publishes one
/// [`DetectedFace`] per detection that lies inside the frame.
pub struct FaceFrameHandler {
    scheduler: BatchScheduler,
    publisher: Arc<dyn DetectedFacePublisher>,
    jpeg_quality: u8,
}

impl FaceFrameHandler {
    pub fn new(
        scheduler: BatchScheduler,
        publisher: Arc<dyn DetectedFacePublisher>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            scheduler,
            publisher,
            jpeg_quality,
        }
    }
}

impl FrameHandler for FaceFrameHandler {
    fn handle_frame(&self, frame: Frame) {
        let stream = frame.source().to_string();
        let sequence = frame.sequence();

        let submission = match self.scheduler.submit(frame) {
            Ok(submission) => submission,
            Err(e) => {
                error!(stream = %stream, frame = sequence, "Frame rejected by detector: {}", e);
                return;
            }
        };

        let detected = match submission.blocking_wait() {
            Ok(detected) => detected,
            Err(e) => {
                warn!(stream = %stream, frame = sequence, "Face detection failed: {}", e);
                return;
            }
        };
        let detect_time = Utc::now();
        let frame = &detected.frame;

        for detection in &detected.detections {
            if !detection.rect.fits_within(frame.size()) {
                debug!(
                    stream = %stream,
                    rect = ?detection.rect,
                    "Skipping face outside of frame bounds"
                );
                counter!("soma_stream_faces_out_of_bounds_total").increment(1);
                continue;
            }

            let photo = match encode_crop(frame.pixels(), detection.rect, self.jpeg_quality) {
                Ok(photo) => photo,
                Err(e) => {
                    error!(stream = %stream, "Failed to encode face crop: {}", e);
                    continue;
                }
            };

            counter!("soma_stream_faces_total").increment(1);
            self.publisher.publish(DetectedFace {
                stream_id: stream.clone(),
                photo,
                rect: detection.rect,
                detect_confidence: detection.confidence,
                detect_time,
                frame_time: frame.captured_at(),
            });
        }
    }
}
