//! PDF normalisation: per-page text extraction and rasterisation via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to drive from async contexts. The work runs on the
//! blocking pool so Tokio worker threads never stall during rendering.
//!
//! Every page is rendered at a fixed 2× zoom of its natural size (144 DPI)
//! and encoded losslessly. Extracted text is kept alongside because a
//! digitally filled form carries exact values the images only approximate.

use crate::error::DocumentError;
use crate::pipeline::encode::{encode_png, PNG_MIME};
use crate::pipeline::normalize::{PageImage, PdfContent};
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Zoom factor applied to every page's natural size.
pub const RENDER_ZOOM: f32 = 2.0;

/// Extract text and rasterise every page of an in-memory PDF.
pub async fn normalize_pdf(bytes: Vec<u8>) -> Result<PdfContent, DocumentError> {
    tokio::task::spawn_blocking(move || normalize_pdf_blocking(&bytes))
        .await
        .map_err(|e| DocumentError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of PDF normalisation.
fn normalize_pdf_blocking(bytes: &[u8]) -> Result<PdfContent, DocumentError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(DocumentError::NotAPdf {
            magic: bytes.iter().take(4).copied().collect(),
        });
    }

    let pdfium = load_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| DocumentError::CorruptPdf {
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let mut texts = Vec::with_capacity(total_pages);
    let mut images = Vec::with_capacity(total_pages);

    for (idx, page) in pages.iter().enumerate() {
        // A page without a text layer is normal for scans; keep it as empty.
        let text = page.text().map(|t| t.all()).unwrap_or_default();
        texts.push(text);

        let (width, height) = zoomed_dimensions(page.width().value, page.height().value);
        let render_config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_maximum_height(height as i32);

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            DocumentError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        let png = encode_png(&image).map_err(|e| DocumentError::RasterisationFailed {
            page: idx + 1,
            detail: format!("PNG encoding failed: {}", e),
        })?;
        debug!(
            "Rendered page {} → {}x{} px, {} bytes",
            idx + 1,
            image.width(),
            image.height(),
            png.len()
        );

        images.push(PageImage {
            index: idx,
            image_bytes: png,
            mime: PNG_MIME.to_string(),
        });
    }

    Ok(PdfContent {
        text_content: texts.join("\n"),
        pages: images,
    })
}

/// Pixel dimensions of a page at [`RENDER_ZOOM`], never below 1×1.
fn zoomed_dimensions(width_points: f32, height_points: f32) -> (u32, u32) {
    let w = (width_points * RENDER_ZOOM).round().max(1.0) as u32;
    let h = (height_points * RENDER_ZOOM).round().max(1.0) as u32;
    (w, h)
}

/// Bind to the pdfium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_LIB_PATH` env var (explicit path to the library file)
/// 2. Alongside the running executable
/// 3. System library search paths
fn load_pdfium() -> Result<Pdfium, DocumentError> {
    if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
        debug!(path = %path, "Loading pdfium from env var");
        let bindings = Pdfium::bind_to_library(&path)
            .map_err(|e| DocumentError::PdfiumUnavailable(format!("{path}: {e}")))?;
        return Ok(Pdfium::new(bindings));
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
    {
        let lib_path =
            Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| DocumentError::PdfiumUnavailable(format!("{e}")))?;
    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_page_doubles() {
        // A4 is 595 × 842 points.
        assert_eq!(zoomed_dimensions(595.0, 842.0), (1190, 1684));
    }

    #[test]
    fn degenerate_page_is_at_least_one_pixel() {
        assert_eq!(zoomed_dimensions(0.0, 0.2), (1, 1));
    }

    #[test]
    fn non_pdf_bytes_rejected_before_pdfium() {
        let err = normalize_pdf_blocking(b"\x89PNG\r\n").unwrap_err();
        assert!(matches!(err, DocumentError::NotAPdf { .. }), "got {err:?}");
    }

    #[test]
    fn empty_input_rejected() {
        let err = normalize_pdf_blocking(b"").unwrap_err();
        assert!(matches!(err, DocumentError::NotAPdf { .. }));
    }
}
