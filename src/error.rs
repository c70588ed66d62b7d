//! Error types for the lexintake library.
//!
//! Three layers, one per boundary:
//!
//! * [`DocumentError`] — the input document (or a photo) could not be read,
//!   decoded or rasterised. Raised by the normalisation stage.
//!
//! * [`BackendError`] — what a [`crate::pipeline::backend::ModelBackend`]
//!   reports for a single call: transport failure, refusal or malformed reply.
//!
//! * [`PipelineError`] — the value threaded from stage to stage. It is never
//!   returned to callers of [`crate::analyze`]; the outer boundary converts it
//!   into a degraded [`crate::record::CanonicalRecord`] via
//!   [`crate::pipeline::fallback`].

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The input document could not be turned into model-consumable content.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The declared file type is not one we can normalise.
    #[error("Unsupported file format: '{extension}'")]
    UnsupportedFormat { extension: String },

    /// Declared as PDF but the bytes do not start with `%PDF`.
    #[error("File is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt, or the PDF is encrypted.
    #[error("PDF is corrupt or unreadable: {detail}")]
    CorruptPdf { detail: String },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Raster image could not be decoded or re-encoded.
    #[error("Image is corrupt or unreadable: {detail}")]
    CorruptImage { detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumUnavailable(String),

    /// Unexpected internal error (task panic, temp-file failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure reported by a model backend for one call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Network, authentication or timeout failure. Retried.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The model explicitly declined. Never retried.
    #[error("model refused: {0}")]
    Refusal(String),

    /// The model replied with nothing usable. Never retried.
    #[error("malformed model response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }
}

/// Terminal failure of a pipeline run, before conversion to a degraded record.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("model call failed after {attempts} attempt(s): {detail}")]
    Transport { attempts: u32, detail: String },

    #[error("model refused the request: {reason}")]
    Refusal { reason: String },

    /// Markup fragment missing or unparseable, or an empty/malformed reply.
    /// `raw` carries the original model text for diagnostics.
    #[error("could not parse model output: {detail}")]
    Parse { detail: String, raw: Option<String> },

    /// Structured output failed basic type checks.
    #[error("structured output failed validation: {detail}")]
    Validation { detail: String },
}

impl PipelineError {
    /// The category reported in a degraded record's summary.
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Document(_) => FailureKind::Document,
            PipelineError::Transport { .. } => FailureKind::Transport,
            PipelineError::Refusal { .. } => FailureKind::Refusal,
            PipelineError::Parse { .. } => FailureKind::Parse,
            PipelineError::Validation { .. } => FailureKind::Validation,
        }
    }

    /// Original model text, when the failure happened after a reply arrived.
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            PipelineError::Parse { raw, .. } => raw.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn from_backend(err: BackendError, attempts: u32) -> Self {
        match err {
            BackendError::Transport(detail) => PipelineError::Transport { attempts, detail },
            BackendError::Refusal(reason) => PipelineError::Refusal { reason },
            BackendError::Malformed(detail) => PipelineError::Parse { detail, raw: None },
        }
    }
}

/// Coarse failure category shown to the human reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Document,
    Transport,
    Refusal,
    Parse,
    Validation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Document => "document error",
            FailureKind::Transport => "transport failure",
            FailureKind::Refusal => "model refusal",
            FailureKind::Parse => "parse failure",
            FailureKind::Validation => "validation failure",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_retryable() {
        assert!(BackendError::Transport("timeout".into()).is_retryable());
        assert!(!BackendError::Refusal("no".into()).is_retryable());
        assert!(!BackendError::Malformed("empty".into()).is_retryable());
    }

    #[test]
    fn backend_errors_map_to_kinds() {
        let t = PipelineError::from_backend(BackendError::Transport("503".into()), 3);
        assert_eq!(t.kind(), FailureKind::Transport);
        assert!(t.to_string().contains("3 attempt"));

        let r = PipelineError::from_backend(BackendError::Refusal("policy".into()), 1);
        assert_eq!(r.kind(), FailureKind::Refusal);

        let m = PipelineError::from_backend(BackendError::Malformed("empty".into()), 1);
        assert_eq!(m.kind(), FailureKind::Parse);
    }

    #[test]
    fn document_error_display() {
        let e = PipelineError::from(DocumentError::UnsupportedFormat {
            extension: ".docx".into(),
        });
        assert_eq!(e.kind(), FailureKind::Document);
        assert!(e.to_string().contains(".docx"));
    }

    #[test]
    fn parse_error_keeps_raw_text() {
        let e = PipelineError::Parse {
            detail: "missing <analysis>".into(),
            raw: Some("Sorry, here is my answer".into()),
        };
        assert_eq!(e.raw_output(), Some("Sorry, here is my answer"));
        assert_eq!(FailureKind::Parse.to_string(), "parse failure");
    }
}
