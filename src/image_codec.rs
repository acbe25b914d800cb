//! JPEG/PNG encode and decode helpers shared by the loop, the store and the gallery

use crate::error::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use std::io::Cursor;

/// Default JPEG quality
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Decode any supported image into an RGB frame
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Encode an RGB frame as JPEG
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(frame.as_raw().len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.encode_image(frame)?;
    Ok(buf)
}

/// Encode an RGB frame as PNG
pub fn encode_png(frame: &RgbImage) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    frame.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(cursor.into_inner())
}
