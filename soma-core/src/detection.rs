//! Detection results

use crate::frame::{Frame, FrameSize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates; `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::new(x, y, x.saturating_add(width), y.saturating_add(height))
    }

    /// Saturates instead of overflowing on degenerate detector output.
    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// True when the rectangle is non-empty and lies fully inside a frame of `size`.
    pub fn fits_within(&self, size: FrameSize) -> bool {
        self.left >= 0
            && self.top >= 0
            && i64::from(self.right) <= i64::from(size.width)
            && i64::from(self.bottom) <= i64::from(size.height)
            && self.right > self.left
            && self.bottom > self.top
    }
}

/// One detector output unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub rect: Rect,
    pub confidence: f32,
}

impl Detection {
    pub fn new(rect: Rect, confidence: f32) -> Self {
        Self { rect, confidence }
    }
}

/// A frame handed back to its submitter together with its detections.
#[derive(Debug, Clone)]
pub struct DetectedFrame {
    pub frame: Frame,
    pub detections: Vec<Detection>,
}

/// A face cropped out of a frame, ready for recognition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub stream_id: String,
    /// JPEG-encoded crop
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo: Vec<u8>,
    pub rect: Rect,
    pub detect_confidence: f32,
    pub detect_time: DateTime<Utc>,
    pub frame_time: DateTime<Utc>,
}

impl DetectedFace {
    /// Time between capture and detection
    pub fn latency(&self) -> chrono::Duration {
        self.detect_time - self.frame_time
    }

    /// Copy without the photo payload, for metadata-only sinks
    pub fn metadata(&self) -> Self {
        Self {
            photo: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_dimensions() {
        let rect = Rect::from_xywh(10, 20, 30, 40);
        assert_eq!(rect, Rect::new(10, 20, 40, 60));
        assert_eq!(rect.width(), 30);
        assert_eq!(rect.height(), 40);
        assert!(!rect.is_empty());
        assert!(Rect::new(5, 5, 5, 10).is_empty());
    }

    #[test]
    fn test_rect_fits_within() {
        let size = FrameSize::new(640, 480);
        assert!(Rect::new(0, 0, 640, 480).fits_within(size));
        assert!(Rect::new(100, 100, 200, 200).fits_within(size));
        assert!(!Rect::new(-1, 0, 10, 10).fits_within(size));
        assert!(!Rect::new(0, -5, 10, 10).fits_within(size));
        assert!(!Rect::new(600, 0, 641, 10).fits_within(size));
        assert!(!Rect::new(0, 400, 10, 481).fits_within(size));
        assert!(!Rect::new(10, 10, 10, 20).fits_within(size));
    }

    #[test]
    fn test_rect_extreme_coordinates() {
        let size = FrameSize::new(640, 480);
        let wide = Rect::new(i32::MIN, 0, 10, 10);
        assert_eq!(wide.width(), i32::MAX);
        assert!(!wide.is_empty());
        assert!(!wide.fits_within(size));

        let inverted = Rect::new(i32::MAX, i32::MAX, i32::MIN, i32::MIN);
        assert_eq!(inverted.width(), i32::MIN);
        assert!(inverted.is_empty());
        assert!(!inverted.fits_within(size));

        assert!(!Rect::new(0, i32::MIN, 10, i32::MAX).fits_within(size));
    }

    #[test]
    fn test_detected_face_metadata_skips_photo() {
        let now = Utc::now();
        let face = DetectedFace {
            stream_id: "gate-1".to_string(),
            photo: vec![0xff, 0xd8],
            rect: Rect::new(1, 2, 3, 4),
            detect_confidence: 0.9,
            detect_time: now,
            frame_time: now - chrono::Duration::milliseconds(40),
        };
        assert_eq!(face.latency(), chrono::Duration::milliseconds(40));

        let json = serde_json::to_value(face.metadata()).unwrap();
        assert!(json.get("photo").is_none());
        assert_eq!(json["stream_id"], "gate-1");

        let json = serde_json::to_value(&face).unwrap();
        assert!(json.get("photo").is_some());
    }
}
