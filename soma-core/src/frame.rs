//! Frames produced by stream readers

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Memory layout of a pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit blue, green, red (OpenCV default)
    Bgr8,
    /// 8-bit red, green, blue
    Rgb8,
    /// 8-bit luma
    Gray8,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for FrameSize {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`, e.g. `1280x720`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("frame size '{}' is not WIDTHxHEIGHT", s))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("frame width '{}': {}", w, e))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("frame height '{}': {}", h, e))?;
        Ok(Self { width, height })
    }
}

/// Immutable, cheaply cloneable image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    data: Bytes,
    size: FrameSize,
    format: PixelFormat,
}

impl PixelBuffer {
    /// Wrap raw pixel data. Returns `None` when the byte length does not match
    /// `width * height * channels`.
    pub fn new(data: impl Into<Bytes>, size: FrameSize, format: PixelFormat) -> Option<Self> {
        let data = data.into();
        let expected = (size.width as usize)
            .checked_mul(size.height as usize)?
            .checked_mul(format.channels())?;
        if data.len() != expected {
            return None;
        }
        Some(Self { data, size, format })
    }

    /// A uniformly filled buffer; handy for synthetic sources.
    pub fn filled(size: FrameSize, format: PixelFormat, value: u8) -> Self {
        let len = size.width as usize * size.height as usize * format.channels();
        Self {
            data: Bytes::from(vec![value; len]),
            size,
            format,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.size.width as usize * self.format.channels()
    }
}

/// One captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    source: Arc<str>,
    sequence: u64,
    captured_at: DateTime<Utc>,
    pixels: PixelBuffer,
}

impl Frame {
    /// Stamp a freshly read buffer with the current time.
    pub fn capture(source: Arc<str>, sequence: u64, pixels: PixelBuffer) -> Self {
        Self::with_timestamp(source, sequence, Utc::now(), pixels)
    }

    pub fn with_timestamp(
        source: Arc<str>,
        sequence: u64,
        captured_at: DateTime<Utc>,
        pixels: PixelBuffer,
    ) -> Self {
        Self {
            source,
            sequence,
            captured_at,
            pixels,
        }
    }

    /// Identifier of the stream (passage) the frame was read from
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    pub fn size(&self) -> FrameSize {
        self.pixels.size()
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_parse() {
        assert_eq!("640x480".parse::<FrameSize>().unwrap(), FrameSize::new(640, 480));
        assert_eq!(" 1920X1080 ".parse::<FrameSize>().unwrap(), FrameSize::new(1920, 1080));
        assert!("640".parse::<FrameSize>().is_err());
        assert!("640x".parse::<FrameSize>().is_err());
        assert!("axb".parse::<FrameSize>().is_err());
    }

    #[test]
    fn test_frame_size_display() {
        assert_eq!(FrameSize::new(1280, 720).to_string(), "1280x720");
        assert!(FrameSize::new(0, 720).is_empty());
    }

    #[test]
    fn test_pixel_buffer_length_checked() {
        let size = FrameSize::new(4, 2);
        assert!(PixelBuffer::new(vec![0u8; 24], size, PixelFormat::Bgr8).is_some());
        assert!(PixelBuffer::new(vec![0u8; 23], size, PixelFormat::Bgr8).is_none());
        assert!(PixelBuffer::new(vec![0u8; 8], size, PixelFormat::Gray8).is_some());
    }

    #[test]
    fn test_pixel_buffer_filled() {
        let buffer = PixelBuffer::filled(FrameSize::new(3, 3), PixelFormat::Rgb8, 7);
        assert_eq!(buffer.data().len(), 27);
        assert_eq!(buffer.stride(), 9);
        assert!(buffer.data().iter().all(|b| *b == 7));
    }

    #[test]
    fn test_frame_clone_shares_pixels() {
        let buffer = PixelBuffer::filled(FrameSize::new(2, 2), PixelFormat::Gray8, 1);
        let frame = Frame::capture(Arc::from("gate-1"), 3, buffer);
        let copy = frame.clone();
        assert_eq!(copy.source(), "gate-1");
        assert_eq!(copy.sequence(), 3);
        assert_eq!(copy.pixels().data().as_ptr(), frame.pixels().data().as_ptr());
    }
}
