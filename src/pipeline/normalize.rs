//! Document normalisation: raw bytes + declared type → canonical content.
//!
//! PDFs become extracted text plus one PNG per page (see [`super::render`]).
//! Raster images are flattened onto white, downscaled so the longest side is
//! at most [`MAX_IMAGE_SIDE`] px and re-encoded as JPEG. Anything else, or any
//! file that fails to decode, is a [`DocumentError`]; this is the only stage
//! that can stop a run before the model is called.

use crate::error::DocumentError;
use crate::pipeline::encode::{encode_jpeg, JPEG_MIME};
use crate::pipeline::render;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use std::path::Path;
use tracing::debug;

/// Longest side, in pixels, of a normalised raster image.
pub const MAX_IMAGE_SIDE: u32 = 2000;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif"];

/// Declared type of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl DocumentKind {
    /// Classify a file by the extension of its declared name.
    pub fn from_file_name(name: &str) -> Result<Self, DocumentError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if ext == "pdf" {
            Ok(DocumentKind::Pdf)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Ok(DocumentKind::Image)
        } else {
            Err(DocumentError::UnsupportedFormat {
                extension: format!(".{ext}"),
            })
        }
    }
}

/// An uploaded file as the pipeline receives it.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Declared file name; only its extension is used.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// One rasterised PDF page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    /// 0-based page index.
    pub index: usize,
    pub image_bytes: Vec<u8>,
    pub mime: String,
}

/// A normalised PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfContent {
    /// Text of all pages joined with `\n`.
    pub text_content: String,
    pub pages: Vec<PageImage>,
}

/// A normalised raster image: RGB, no alpha, longest side ≤ [`MAX_IMAGE_SIDE`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    pub image_bytes: Vec<u8>,
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

/// Canonical document content consumed by the prompt assembler.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalDocument {
    Pdf(PdfContent),
    Image(NormalizedImage),
}

/// Normalise an uploaded document according to its declared type.
pub async fn normalize_document(source: SourceDocument) -> Result<CanonicalDocument, DocumentError> {
    match DocumentKind::from_file_name(&source.file_name)? {
        DocumentKind::Pdf => render::normalize_pdf(source.bytes)
            .await
            .map(CanonicalDocument::Pdf),
        DocumentKind::Image => normalize_image(source.bytes)
            .await
            .map(CanonicalDocument::Image),
    }
}

/// Normalise a raster image off the async runtime.
pub async fn normalize_image(bytes: Vec<u8>) -> Result<NormalizedImage, DocumentError> {
    tokio::task::spawn_blocking(move || normalize_image_bytes(&bytes))
        .await
        .map_err(|e| DocumentError::Internal(format!("Image task panicked: {}", e)))?
}

/// Decode, flatten, downscale and re-encode a raster image.
pub fn normalize_image_bytes(bytes: &[u8]) -> Result<NormalizedImage, DocumentError> {
    let decoded = image::load_from_memory(bytes).map_err(|e| DocumentError::CorruptImage {
        detail: e.to_string(),
    })?;
    let (orig_w, orig_h) = decoded.dimensions();

    let flat = flatten_on_white(&decoded);
    let (width, height) = fit_within(orig_w, orig_h, MAX_IMAGE_SIDE);
    let resized = if (width, height) == (orig_w, orig_h) {
        flat
    } else {
        image::imageops::resize(&flat, width, height, FilterType::Lanczos3)
    };

    let jpeg = encode_jpeg(&DynamicImage::ImageRgb8(resized)).map_err(|e| {
        DocumentError::CorruptImage {
            detail: format!("JPEG encoding failed: {e}"),
        }
    })?;
    debug!(
        "Normalised image {}x{} → {}x{}, {} bytes",
        orig_w,
        orig_h,
        width,
        height,
        jpeg.len()
    );

    Ok(NormalizedImage {
        image_bytes: jpeg,
        mime: JPEG_MIME.to_string(),
        width,
        height,
    })
}

/// Composite any alpha channel onto an opaque white background.
///
/// Palette and grey images are expanded by the decoder; converting through
/// RGBA covers every source colour type with one blend.
fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| -> u8 {
            let a = a as u32;
            ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8
        };
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Scale `(w, h)` so the longest side is at most `max_side`, keeping the
/// aspect ratio. Never upscales.
pub fn fit_within(w: u32, h: u32, max_side: u32) -> (u32, u32) {
    let longest = w.max(h);
    if longest <= max_side {
        return (w, h);
    }
    let ratio = max_side as f64 / longest as f64;
    let nw = ((w as f64 * ratio).round() as u32).clamp(1, max_side);
    let nh = ((h as f64 * ratio).round() as u32).clamp(1, max_side);
    (nw, nh)
}
