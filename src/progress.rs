//! Observer trait for pipeline stage events.
//!
//! Pass a `&dyn PipelineObserver` to [`crate::Analyzer::analyze`] to follow a
//! run through its states:
//!
//! ```text
//! NORMALIZING → ASSEMBLING → INVOKING (retry loop) → INTERPRETING → DONE
//!      │                          │                        │
//!      └──────────────────────────┴────────────────────────┴──▶ DEGRADED
//! ```
//!
//! Callbacks let the host forward events wherever it likes (a terminal
//! spinner, a log, a websocket) without the library knowing how it
//! communicates.
//!
//! # Example
//!
//! ```rust
//! use lexintake::{PipelineObserver, PipelineStage};
//! use std::sync::Mutex;
//!
//! struct StageLog(Mutex<Vec<PipelineStage>>);
//!
//! impl PipelineObserver for StageLog {
//!     fn on_stage(&self, stage: PipelineStage) {
//!         self.0.lock().unwrap().push(stage);
//!     }
//! }
//!
//! let log = StageLog(Mutex::new(Vec::new()));
//! log.on_stage(PipelineStage::Normalizing);
//! assert_eq!(log.0.lock().unwrap().len(), 1);
//! ```

use serde::Serialize;
use std::fmt;

/// The states of one pipeline run. `Done` and `Degraded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    Normalizing,
    Assembling,
    Invoking,
    Interpreting,
    Done,
    Degraded,
}

impl PipelineStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Degraded)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Normalizing => "normalizing document",
            PipelineStage::Assembling => "assembling prompt",
            PipelineStage::Invoking => "calling model",
            PipelineStage::Interpreting => "interpreting reply",
            PipelineStage::Done => "done",
            PipelineStage::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// Called by the pipeline as a run moves between stages.
///
/// All methods default to no-ops so implementors override only what they
/// need. Implementations must be `Send + Sync`: one observer may be shared by
/// concurrent runs.
pub trait PipelineObserver: Send + Sync {
    /// Entered `stage`.
    fn on_stage(&self, stage: PipelineStage) {
        let _ = stage;
    }

    /// A model call attempt failed.
    ///
    /// # Arguments
    /// * `attempt`      — 1-based attempt number
    /// * `max_attempts` — configured bound
    /// * `error`        — human-readable failure
    /// * `will_retry`   — whether another attempt follows
    fn on_attempt_failed(&self, attempt: u32, max_attempts: u32, error: &str, will_retry: bool) {
        let _ = (attempt, max_attempts, error, will_retry);
    }
}

/// Observer that ignores every event. The default when none is supplied.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}
