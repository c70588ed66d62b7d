//! # lexintake
//!
//! Extract a structured case record from a scanned traffic accident report
//! (and optional photos) using a Vision Language Model.
//!
//! ## Why this crate?
//!
//! Model output is unreliable in shape: some backends return a schema-valid
//! object, others prose with an embedded markup fragment, and any of them can
//! time out, refuse or ramble. The caller still needs one record it can render
//! without checks. Every run here ends in a complete [`CanonicalRecord`]; a
//! failed run yields a *degraded* record (`extraction_confidence == 0.0`) that
//! explains what went wrong instead of an error.
//!
//! ## Pipeline Overview
//!
//! ```text
//! report (PDF / image) + photos
//!  │
//!  ├─ 1. Normalize  PDF → text + page PNGs (pdfium); images → JPEG ≤ 2000 px
//!  ├─ 2. Assemble   instruction, context, document, ≤ 5 labelled photos
//!  ├─ 3. Invoke     one model call, transport failures retried with backoff
//!  ├─ 4. Interpret  structured object or <analysis> fragment → record
//!  └─ 5. Fallback   any failure → degraded record
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lexintake::{AnalysisConfig, AnalysisInputs, Analyzer, NoopObserver};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let analyzer = Analyzer::new(AnalysisConfig::default());
//!     let inputs = AnalysisInputs {
//!         session_id: "case-42".into(),
//!         report: "tutanak.pdf".into(),
//!         photos: vec!["front.jpg".into()],
//!         ..Default::default()
//!     };
//!     let record = analyzer.analyze_inputs(&inputs, &NoopObserver).await;
//!     if record.is_degraded() {
//!         eprintln!("degraded: {:?}", record.data_inconsistencies);
//!     }
//!     println!("{}", serde_json::to_string_pretty(&record).unwrap());
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `lexintake` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! lexintake = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze, analyze_sync, AnalysisInputs, AnalysisRequest, Analyzer};
pub use config::{AnalysisConfig, AnalysisConfigBuilder, ConfigError, ResponseFormat};
pub use error::{BackendError, DocumentError, FailureKind, PipelineError};
pub use pipeline::assemble::ClientContext;
pub use pipeline::backend::{ModelBackend, ModelRequest, RawModelOutput};
pub use pipeline::checkbox::Vocabulary;
pub use pipeline::normalize::SourceDocument;
pub use progress::{NoopObserver, PipelineObserver, PipelineStage};
pub use record::{
    AccidentDetails, CanonicalRecord, FaultAssessment, FormCheckboxes, PartyInfo, PhotoAnalysis,
};
