//! Prompt assembly: canonical document + request context → content blocks.
//!
//! The order and caps are fixed because request cost and the model's
//! attention budget depend on them:
//!
//! 1. the instruction block
//! 2. an optional context block (client name, notes)
//! 3. PDF: extracted text capped at [`MAX_TEXT_CHARS`], then at most
//!    [`MAX_PDF_PAGES`] page images. Image: the image itself
//! 4. up to [`MAX_PHOTOS`] photos, each preceded by a short label
//!
//! Photos past the cap are dropped silently.

use crate::pipeline::backend::ContentBlock;
use crate::pipeline::normalize::{CanonicalDocument, NormalizedImage};
use tracing::debug;

/// Characters of extracted PDF text sent to the model.
pub const MAX_TEXT_CHARS: usize = 3000;
/// Rendered PDF pages sent to the model.
pub const MAX_PDF_PAGES: usize = 2;
/// Ancillary photos sent to the model.
pub const MAX_PHOTOS: usize = 5;

/// Caller-supplied free text about the case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientContext {
    pub client_name: Option<String>,
    pub notes: Option<String>,
}

impl ClientContext {
    /// The context block text, or `None` when there is nothing to say.
    fn render(&self) -> Option<String> {
        let name = self.client_name.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let notes = self.notes.as_deref().map(str::trim).filter(|s| !s.is_empty());
        if name.is_none() && notes.is_none() {
            return None;
        }
        let mut text = String::from("Additional Context:\n");
        if let Some(name) = name {
            text.push_str(&format!("Client Name: {name}\n"));
        }
        if let Some(notes) = notes {
            text.push_str(&format!("Notes: {notes}\n"));
        }
        Some(text)
    }
}

/// Build the ordered content blocks for one model call.
pub fn assemble_blocks(
    instructions: &str,
    document: &CanonicalDocument,
    photos: &[NormalizedImage],
    context: &ClientContext,
) -> Vec<ContentBlock> {
    let mut blocks = vec![ContentBlock::Instruction(instructions.to_string())];

    if let Some(text) = context.render() {
        blocks.push(ContentBlock::Text(text));
    }

    match document {
        CanonicalDocument::Pdf(pdf) => {
            if !pdf.text_content.trim().is_empty() {
                let excerpt: String = pdf.text_content.chars().take(MAX_TEXT_CHARS).collect();
                blocks.push(ContentBlock::Text(format!(
                    "Extracted text from PDF:\n{excerpt}"
                )));
            }
            for page in pdf.pages.iter().take(MAX_PDF_PAGES) {
                blocks.push(ContentBlock::Image {
                    bytes: page.image_bytes.clone(),
                    mime: page.mime.clone(),
                });
            }
        }
        CanonicalDocument::Image(img) => {
            blocks.push(ContentBlock::Image {
                bytes: img.image_bytes.clone(),
                mime: img.mime.clone(),
            });
        }
    }

    if photos.len() > MAX_PHOTOS {
        debug!("Dropping {} photos beyond the cap", photos.len() - MAX_PHOTOS);
    }
    for (idx, photo) in photos.iter().take(MAX_PHOTOS).enumerate() {
        blocks.push(ContentBlock::Text(format!("\nPhoto {}:", idx + 1)));
        blocks.push(ContentBlock::Image {
            bytes: photo.image_bytes.clone(),
            mime: photo.mime.clone(),
        });
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::{PageImage, PdfContent};

    fn image(tag: u8) -> NormalizedImage {
        NormalizedImage {
            image_bytes: vec![tag],
            mime: "image/jpeg".into(),
            width: 1,
            height: 1,
        }
    }

    fn pdf(text: &str, pages: usize) -> CanonicalDocument {
        CanonicalDocument::Pdf(PdfContent {
            text_content: text.to_string(),
            pages: (0..pages)
                .map(|i| PageImage {
                    index: i,
                    image_bytes: vec![i as u8],
                    mime: "image/png".into(),
                })
                .collect(),
        })
    }

    #[test]
    fn pdf_layout_caps_text_and_pages() {
        let long_text = "ş".repeat(MAX_TEXT_CHARS + 500);
        let blocks = assemble_blocks("INSTR", &pdf(&long_text, 4), &[], &ClientContext::default());

        assert_eq!(blocks.len(), 1 + 1 + MAX_PDF_PAGES);
        assert_eq!(blocks[0], ContentBlock::Instruction("INSTR".into()));
        match &blocks[1] {
            ContentBlock::Text(t) => {
                let body = t.strip_prefix("Extracted text from PDF:\n").unwrap();
                assert_eq!(body.chars().count(), MAX_TEXT_CHARS);
            }
            other => panic!("expected text block, got {other:?}"),
        }
        assert!(matches!(&blocks[2], ContentBlock::Image { bytes, .. } if bytes == &vec![0]));
        assert!(matches!(&blocks[3], ContentBlock::Image { bytes, .. } if bytes == &vec![1]));
    }

    #[test]
    fn pdf_without_text_skips_text_block() {
        let blocks = assemble_blocks("I", &pdf("  \n", 1), &[], &ClientContext::default());
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[1], ContentBlock::Image { .. }));
    }

    #[test]
    fn context_block_follows_instructions() {
        let ctx = ClientContext {
            client_name: Some("Ayşe Yılmaz".into()),
            notes: Some("Rear-end collision".into()),
        };
        let blocks = assemble_blocks("I", &CanonicalDocument::Image(image(9)), &[], &ctx);
        assert_eq!(
            blocks[1],
            ContentBlock::Text(
                "Additional Context:\nClient Name: Ayşe Yılmaz\nNotes: Rear-end collision\n".into()
            )
        );
        assert!(matches!(&blocks[2], ContentBlock::Image { bytes, .. } if bytes == &vec![9]));
    }

    #[test]
    fn blank_context_is_omitted() {
        let ctx = ClientContext {
            client_name: Some("  ".into()),
            notes: None,
        };
        let blocks = assemble_blocks("I", &CanonicalDocument::Image(image(1)), &[], &ctx);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn photos_are_labelled_and_capped() {
        let photos: Vec<_> = (0..7).map(image).collect();
        let blocks = assemble_blocks(
            "I",
            &CanonicalDocument::Image(image(100)),
            &photos,
            &ClientContext::default(),
        );
        // instruction + document image + 5 × (label + image)
        assert_eq!(blocks.len(), 2 + 2 * MAX_PHOTOS);
        assert_eq!(blocks[2], ContentBlock::Text("\nPhoto 1:".into()));
        assert!(matches!(&blocks[3], ContentBlock::Image { bytes, .. } if bytes == &vec![0]));
        assert_eq!(blocks[10], ContentBlock::Text("\nPhoto 5:".into()));
        assert!(matches!(&blocks[11], ContentBlock::Image { bytes, .. } if bytes == &vec![4]));
    }
}
