//! Face crop extraction and JPEG encoding

use crate::error::StreamError;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use soma_core::{PixelBuffer, PixelFormat, Rect};

/// Cut `rect` out of `pixels` and encode it as JPEG.
///
/// The rectangle must lie fully inside the buffer. BGR input is converted to
/// RGB on the way.
pub fn encode_crop(pixels: &PixelBuffer, rect: Rect, quality: u8) -> Result<Vec<u8>, StreamError> {
    if !rect.fits_within(pixels.size()) {
        return Err(StreamError::Encode(format!(
            "crop {:?} outside of {} frame",
            rect,
            pixels.size()
        )));
    }

    let channels = pixels.format().channels();
    let stride = pixels.stride();
    let data = pixels.data();
    let (left, top) = (rect.left as usize, rect.top as usize);
    let (width, height) = (rect.width() as usize, rect.height() as usize);

    let mut crop = Vec::with_capacity(width * height * channels);
    for row in top..top + height {
        let start = row * stride + left * channels;
        let line = &data[start..start + width * channels];
        match pixels.format() {
            PixelFormat::Bgr8 => {
                for px in line.chunks_exact(3) {
                    crop.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            PixelFormat::Rgb8 | PixelFormat::Gray8 => crop.extend_from_slice(line),
        }
    }

    let color = match pixels.format() {
        PixelFormat::Gray8 => ColorType::L8,
        PixelFormat::Bgr8 | PixelFormat::Rgb8 => ColorType::Rgb8,
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100)).encode(
        &crop,
        width as u32,
        height as u32,
        color,
    )?;
    Ok(jpeg)
}
