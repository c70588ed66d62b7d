//! Image encoding: `DynamicImage` → bytes, and bytes → base64 `ImageData`.
//!
//! Two encodings serve two purposes. Rasterised PDF pages are PNG because they
//! carry printed form text whose crispness matters for reading checkboxes and
//! small print. Uploaded photos and scanned images are JPEG at a fixed quality
//! to bound the request payload; they are already lossy camera output.
//!
//! `detail: "high"` instructs GPT-4-class models to use the full image tile
//! budget; without it the small handwriting on the form is lost.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

pub const PNG_MIME: &str = "image/png";
pub const JPEG_MIME: &str = "image/jpeg";

/// Quality used for every JPEG re-encode.
pub const JPEG_QUALITY: u8 = 85;

/// Encode an image losslessly as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode an RGB image as JPEG at [`JPEG_QUALITY`].
///
/// JPEG has no alpha channel, so callers flatten transparency first.
pub fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    img.write_with_encoder(encoder)?;
    Ok(buf)
}

/// Wrap already-encoded image bytes as a base64 attachment for the VLM API.
pub fn to_image_data(bytes: &[u8], mime: &str) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} image → {} bytes base64", mime, b64.len());
    ImageData::new(b64, mime).with_detail("high")
}
