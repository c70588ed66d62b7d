//! Pipeline entry points.
//!
//! An [`Analyzer`] is built once at startup from an [`AnalysisConfig`]. It
//! holds everything a run only reads: the config, the assembled instruction
//! text, the vocabulary and the resolved model backend. Each call to
//! [`Analyzer::analyze`] runs one request through
//!
//! ```text
//! NORMALIZING → ASSEMBLING → INVOKING → INTERPRETING → DONE
//! ```
//!
//! and always returns a [`CanonicalRecord`]. Any stage failure ends the run
//! in `DEGRADED`: `Analyzer::conclude` is the one place a [`PipelineError`]
//! becomes a record.

use crate::config::AnalysisConfig;
use crate::error::{BackendError, DocumentError, PipelineError};
use crate::pipeline::assemble::{assemble_blocks, ClientContext};
use crate::pipeline::backend::{resolve_backend, ModelBackend, ModelRequest};
use crate::pipeline::fallback::degraded_record;
use crate::pipeline::input::resolve_input;
use crate::pipeline::interpret::interpret;
use crate::pipeline::invoke::{invoke, RetryPolicy};
use crate::pipeline::normalize::{normalize_document, normalize_image, SourceDocument};
use crate::progress::{NoopObserver, PipelineObserver, PipelineStage};
use crate::prompts::instruction_text;
use crate::record::{CanonicalRecord, RecordStamp};
use crate::session::SessionScratch;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One in-memory request: the report, its photos and caller context.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub session_id: String,
    pub report: SourceDocument,
    pub photos: Vec<SourceDocument>,
    pub context: ClientContext,
}

/// One request given as local paths or HTTP(S) URLs.
#[derive(Debug, Clone, Default)]
pub struct AnalysisInputs {
    pub session_id: String,
    pub report: String,
    pub photos: Vec<String>,
    pub context: ClientContext,
}

/// Long-lived, read-only pipeline state shared by every run.
pub struct Analyzer {
    config: AnalysisConfig,
    instructions: String,
    backend: Result<Arc<dyn ModelBackend>, BackendError>,
}

impl Analyzer {
    /// Build an analyzer, resolving the model backend from the config.
    ///
    /// A backend that cannot be resolved does not fail construction: every
    /// run then degrades with a transport failure naming the cause.
    pub fn new(config: AnalysisConfig) -> Self {
        let backend = resolve_backend(&config);
        match &backend {
            Ok(b) => debug!("Using model backend: {}", b.name()),
            Err(e) => warn!("Model backend unavailable: {}", e),
        }
        Self::build(config, backend)
    }

    /// Build an analyzer around an explicit backend.
    pub fn with_backend(config: AnalysisConfig, backend: Arc<dyn ModelBackend>) -> Self {
        Self::build(config, Ok(backend))
    }

    fn build(config: AnalysisConfig, backend: Result<Arc<dyn ModelBackend>, BackendError>) -> Self {
        let instructions = instruction_text(config.instructions.as_deref(), config.response_format);
        Self {
            config,
            instructions,
            backend,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyse documents already in memory.
    pub async fn analyze(
        &self,
        request: AnalysisRequest,
        observer: &dyn PipelineObserver,
    ) -> CanonicalRecord {
        let start = Instant::now();
        let stamp = RecordStamp::now(&request.session_id);
        info!(session = %stamp.session_id, "Analysing {}", request.report.file_name);
        observer.on_stage(PipelineStage::Normalizing);

        let result = self
            .run(request.report, request.photos, &request.context, Vec::new(), &stamp, observer)
            .await;
        self.conclude(result, &stamp, observer, start)
    }

    /// Resolve paths/URLs into a per-request scratch directory, analyse, and
    /// remove the scratch directory whatever the outcome.
    pub async fn analyze_inputs(
        &self,
        inputs: &AnalysisInputs,
        observer: &dyn PipelineObserver,
    ) -> CanonicalRecord {
        let start = Instant::now();
        let stamp = RecordStamp::now(&inputs.session_id);
        info!(session = %stamp.session_id, "Analysing {}", inputs.report);
        observer.on_stage(PipelineStage::Normalizing);

        let scratch = match SessionScratch::create(&inputs.session_id) {
            Ok(s) => s,
            Err(e) => {
                let err = DocumentError::Internal(format!("Failed to create scratch directory: {e}"));
                return self.conclude(Err(err.into()), &stamp, observer, start);
            }
        };

        let result = self.resolve_and_run(inputs, &scratch, &stamp, observer).await;
        // Failures are logged inside `close`.
        scratch.close();
        self.conclude(result, &stamp, observer, start)
    }

    async fn resolve_and_run(
        &self,
        inputs: &AnalysisInputs,
        scratch: &SessionScratch,
        stamp: &RecordStamp,
        observer: &dyn PipelineObserver,
    ) -> Result<CanonicalRecord, PipelineError> {
        let timeout = self.config.download_timeout_secs;
        let report = resolve_input(&inputs.report, scratch, timeout).await?;

        let mut notes = Vec::new();
        let mut photos = Vec::with_capacity(inputs.photos.len());
        for (idx, photo) in inputs.photos.iter().enumerate() {
            match resolve_input(photo, scratch, timeout).await {
                Ok(doc) => photos.push(doc),
                Err(e) => {
                    warn!("Skipping photo {}: {}", idx + 1, e);
                    notes.push(format!("Photo {} ({}) skipped: {}", idx + 1, photo, e));
                }
            }
        }

        self.run(report, photos, &inputs.context, notes, stamp, observer)
            .await
    }

    async fn run(
        &self,
        report: SourceDocument,
        photos: Vec<SourceDocument>,
        context: &ClientContext,
        mut notes: Vec<String>,
        stamp: &RecordStamp,
        observer: &dyn PipelineObserver,
    ) -> Result<CanonicalRecord, PipelineError> {
        // ── NORMALIZING ──────────────────────────────────────────────────
        let normalize_start = Instant::now();
        let document = normalize_document(report).await?;

        let mut images = Vec::with_capacity(photos.len());
        for (idx, photo) in photos.into_iter().enumerate() {
            let name = photo.file_name;
            match normalize_image(photo.bytes).await {
                Ok(img) => images.push(img),
                Err(e) => {
                    warn!("Skipping photo {} ({}): {}", idx + 1, name, e);
                    notes.push(format!("Photo {} ({}) skipped: {}", idx + 1, name, e));
                }
            }
        }
        debug!(
            "Normalised document and {} photo(s) in {:?}",
            images.len(),
            normalize_start.elapsed()
        );

        // ── ASSEMBLING ───────────────────────────────────────────────────
        observer.on_stage(PipelineStage::Assembling);
        let request = ModelRequest {
            blocks: assemble_blocks(&self.instructions, &document, &images, context),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        // ── INVOKING ─────────────────────────────────────────────────────
        observer.on_stage(PipelineStage::Invoking);
        let backend = self
            .backend
            .as_ref()
            .map_err(|e| PipelineError::from_backend(e.clone(), 0))?;
        let policy = RetryPolicy {
            max_attempts: self.config.max_attempts,
            base_backoff_ms: self.config.retry_backoff_ms,
        };
        let raw = invoke(backend.as_ref(), &request, policy, observer).await?;

        // ── INTERPRETING ─────────────────────────────────────────────────
        observer.on_stage(PipelineStage::Interpreting);
        let mut record = interpret(raw, stamp, &self.config.vocabulary)?;
        record.data_inconsistencies.extend(notes);
        Ok(record)
    }

    /// Terminal transition: `DONE` with the record, or `DEGRADED` with the
    /// fallback record for the error.
    fn conclude(
        &self,
        result: Result<CanonicalRecord, PipelineError>,
        stamp: &RecordStamp,
        observer: &dyn PipelineObserver,
        start: Instant,
    ) -> CanonicalRecord {
        match result {
            Ok(record) => {
                observer.on_stage(PipelineStage::Done);
                info!(
                    session = %stamp.session_id,
                    confidence = record.extraction_confidence,
                    "Analysis complete in {:?}",
                    start.elapsed()
                );
                record
            }
            Err(e) => {
                observer.on_stage(PipelineStage::Degraded);
                warn!(
                    session = %stamp.session_id,
                    kind = %e.kind(),
                    "Analysis degraded after {:?}: {}",
                    start.elapsed(),
                    e
                );
                degraded_record(&e, stamp)
            }
        }
    }
}

/// One-shot analysis with a fresh [`Analyzer`] and no observer.
///
/// Prefer building one [`Analyzer`] and reusing it when handling many
/// requests.
pub async fn analyze(request: AnalysisRequest, config: &AnalysisConfig) -> CanonicalRecord {
    Analyzer::new(config.clone())
        .analyze(request, &NoopObserver)
        .await
}

/// Synchronous wrapper around [`analyze`].
///
/// Creates a temporary tokio runtime internally; must not be called from
/// inside an async context. The only error is failing to start that runtime.
pub fn analyze_sync(
    request: AnalysisRequest,
    config: &AnalysisConfig,
) -> std::io::Result<CanonicalRecord> {
    Ok(tokio::runtime::Runtime::new()?.block_on(analyze(request, config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::backend::RawModelOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Fixed(Result<RawModelOutput, BackendError>);

    #[async_trait]
    impl ModelBackend for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _r: &ModelRequest) -> Result<RawModelOutput, BackendError> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct Stages(Mutex<Vec<PipelineStage>>);

    impl PipelineObserver for Stages {
        fn on_stage(&self, stage: PipelineStage) {
            self.0.lock().unwrap().push(stage);
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(4, 4);
        crate::pipeline::encode::encode_png(&img).unwrap()
    }

    fn request(report: SourceDocument) -> AnalysisRequest {
        AnalysisRequest {
            session_id: "unit".into(),
            report,
            photos: vec![],
            context: ClientContext::default(),
        }
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig::builder().retry_backoff_ms(1).build().unwrap()
    }

    #[tokio::test]
    async fn happy_path_walks_every_stage() {
        let reply = "<analysis><case_summary>ok</case_summary></analysis>";
        let analyzer = Analyzer::with_backend(
            config(),
            Arc::new(Fixed(Ok(RawModelOutput::FreeText(reply.into())))),
        );
        let stages = Stages::default();
        let record = analyzer
            .analyze(request(SourceDocument::new("form.png", png_bytes())), &stages)
            .await;

        assert_eq!(record.case_summary, "ok");
        assert_eq!(record.session_id, "unit");
        assert_eq!(
            *stages.0.lock().unwrap(),
            vec![
                PipelineStage::Normalizing,
                PipelineStage::Assembling,
                PipelineStage::Invoking,
                PipelineStage::Interpreting,
                PipelineStage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn document_error_short_circuits_to_degraded() {
        let analyzer = Analyzer::with_backend(
            config(),
            Arc::new(Fixed(Err(BackendError::Transport("unused".into())))),
        );
        let stages = Stages::default();
        let record = analyzer
            .analyze(request(SourceDocument::new("form.docx", vec![1, 2, 3])), &stages)
            .await;

        assert!(record.is_degraded());
        assert!(record.case_summary.contains("document error"));
        assert_eq!(
            *stages.0.lock().unwrap(),
            vec![PipelineStage::Normalizing, PipelineStage::Degraded]
        );
    }

    #[tokio::test]
    async fn unresolvable_backend_degrades_as_transport() {
        let analyzer = Analyzer::build(
            config(),
            Err(BackendError::Transport("no API key".into())),
        );
        let record = analyzer
            .analyze(request(SourceDocument::new("form.png", png_bytes())), &NoopObserver)
            .await;
        assert!(record.is_degraded());
        assert!(record.case_summary.contains("transport failure"));
        assert!(record.data_inconsistencies[0].contains("no API key"));
    }

    #[tokio::test]
    async fn corrupt_photo_is_skipped_and_noted() {
        let reply = "<analysis><case_summary>ok</case_summary></analysis>";
        let analyzer = Analyzer::with_backend(
            config(),
            Arc::new(Fixed(Ok(RawModelOutput::FreeText(reply.into())))),
        );
        let mut req = request(SourceDocument::new("form.png", png_bytes()));
        req.photos = vec![
            SourceDocument::new("broken.jpg", b"not an image".to_vec()),
            SourceDocument::new("good.png", png_bytes()),
        ];
        let record = analyzer.analyze(req, &NoopObserver).await;

        assert!(!record.is_degraded());
        assert_eq!(record.data_inconsistencies.len(), 1);
        assert!(record.data_inconsistencies[0].contains("broken.jpg"));
    }

    #[tokio::test]
    async fn missing_local_input_degrades() {
        let analyzer = Analyzer::with_backend(
            config(),
            Arc::new(Fixed(Ok(RawModelOutput::FreeText(String::new())))),
        );
        let inputs = AnalysisInputs {
            session_id: "paths".into(),
            report: "/no/such/report.pdf".into(),
            ..Default::default()
        };
        let record = analyzer.analyze_inputs(&inputs, &NoopObserver).await;
        assert!(record.is_degraded());
        assert_eq!(record.session_id, "paths");
    }
}
