//! OpenCV video capture and YuNet face detection

use crate::error::StreamError;
use crate::source::{SourceOpener, VideoSource};
use anyhow::Context;
use opencv::{
    core::{Mat, Ptr, Size},
    imgproc,
    objdetect::FaceDetectorYN,
    prelude::*,
    videoio::{VideoCapture, CAP_ANY},
};
use soma_core::{DetectorConfig, Detection, DetectionWorker, Frame, FrameSize, PixelBuffer, PixelFormat, Rect};
use tracing::{debug, info, warn};

const NMS_THRESHOLD: f32 = 0.3;
const TOP_K: i32 = 5000;

/// Opens RTSP/HTTP/file URIs with `VideoCapture`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvOpener;

impl SourceOpener for OpenCvOpener {
    fn open(&self, uri: &str) -> Result<Box<dyn VideoSource>, StreamError> {
        let capture =
            VideoCapture::from_file(uri, CAP_ANY).map_err(|e| StreamError::open(uri, e.message))?;
        let opened = capture
            .is_opened()
            .map_err(|e| StreamError::open(uri, e.message))?;
        if !opened {
            return Err(StreamError::open(uri, "capture not opened"));
        }
        Ok(Box::new(OpenCvSource {
            capture,
            mat: Mat::default(),
        }))
    }
}

struct OpenCvSource {
    capture: VideoCapture,
    mat: Mat,
}

impl VideoSource for OpenCvSource {
    fn grab(&mut self, frames: usize) {
        for _ in 0..frames {
            match self.capture.grab() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    debug!("Failed to grab frame: {}", e);
                    break;
                }
            }
        }
    }

    fn read(&mut self) -> Option<PixelBuffer> {
        match self.capture.read(&mut self.mat) {
            Ok(true) if self.mat.rows() > 0 && self.mat.cols() > 0 => {}
            Ok(_) => return None,
            Err(e) => {
                debug!("Failed to read frame: {}", e);
                return None;
            }
        }
        match mat_to_buffer(&self.mat) {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                warn!("Unusable frame: {}", e);
                None
            }
        }
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.capture.release()?;
        Ok(())
    }
}

fn mat_to_buffer(mat: &Mat) -> Result<PixelBuffer, StreamError> {
    let size = FrameSize::new(mat.cols() as u32, mat.rows() as u32);
    let format = match mat.channels() {
        1 => PixelFormat::Gray8,
        3 => PixelFormat::Bgr8,
        n => return Err(StreamError::Read(format!("unsupported channel count {}", n))),
    };
    let data = if mat.is_continuous() {
        mat.data_bytes()?.to_vec()
    } else {
        mat.try_clone()?.data_bytes()?.to_vec()
    };
    PixelBuffer::new(data, size, format)
        .ok_or_else(|| StreamError::Read(format!("frame buffer does not match {}", size)))
}

fn buffer_to_bgr(buffer: &PixelBuffer) -> Result<Mat, opencv::Error> {
    let flat = Mat::from_slice(&buffer.data()[..])?;
    let shaped = flat.reshape(buffer.format().channels() as i32, buffer.height() as i32)?;
    let code = match buffer.format() {
        PixelFormat::Bgr8 => return shaped.try_clone(),
        PixelFormat::Rgb8 => imgproc::COLOR_RGB2BGR,
        PixelFormat::Gray8 => imgproc::COLOR_GRAY2BGR,
    };
    let mut bgr = Mat::default();
    imgproc::cvt_color(&shaped, &mut bgr, code, 0)?;
    Ok(bgr)
}

/// YuNet face detector. The model takes one image per call, so a batch is
/// detected frame by frame.
pub struct YuNetWorker {
    detector: Ptr<FaceDetectorYN>,
    score_threshold: f32,
}

impl YuNetWorker {
    pub fn new(config: &DetectorConfig) -> Result<Self, StreamError> {
        let model = config.model_path.to_string_lossy();
        let input = Size::new(config.frame_size.width as i32, config.frame_size.height as i32);
        let detector = FaceDetectorYN::create(
            &model,
            "",
            input,
            config.score_threshold,
            NMS_THRESHOLD,
            TOP_K,
            0,
            0,
        )?;
        info!(model = %model, input = %config.frame_size, "YuNet face detector loaded");
        Ok(Self {
            detector,
            score_threshold: config.score_threshold,
        })
    }

    fn detect_one(&mut self, frame: &Frame) -> anyhow::Result<Vec<Detection>> {
        let image = buffer_to_bgr(frame.pixels()).context("failed to convert frame")?;
        let mut faces = Mat::default();
        self.detector
            .detect(&image, &mut faces)
            .context("YuNet detection failed")?;

        let mut detections = Vec::with_capacity(faces.rows().max(0) as usize);
        for row in 0..faces.rows() {
            // x, y, w, h, 5 landmarks, score
            let x = *faces.at_2d::<f32>(row, 0)?;
            let y = *faces.at_2d::<f32>(row, 1)?;
            let w = *faces.at_2d::<f32>(row, 2)?;
            let h = *faces.at_2d::<f32>(row, 3)?;
            let score = *faces.at_2d::<f32>(row, 14)?;
            if score < self.score_threshold {
                continue;
            }
            let rect = Rect::from_xywh(
                x.round() as i32,
                y.round() as i32,
                w.round() as i32,
                h.round() as i32,
            );
            detections.push(Detection::new(rect, score));
        }
        Ok(detections)
    }
}

impl DetectionWorker for YuNetWorker {
    fn detect(&mut self, frames: &[Frame]) -> anyhow::Result<Vec<Vec<Detection>>> {
        frames.iter().map(|frame| self.detect_one(frame)).collect()
    }
}
