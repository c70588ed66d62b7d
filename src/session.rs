//! Per-request scratch space.
//!
//! Downloaded inputs are written into a directory owned by one request and
//! removed when the request finishes, whichever terminal state it reached.
//! Cleanup is best-effort: a failure is logged and reported back, never
//! raised, because the record has already been produced by then.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Scratch directory scoped to one analysis session.
#[derive(Debug)]
pub struct SessionScratch {
    session_id: String,
    dir: TempDir,
}

impl SessionScratch {
    /// Create a fresh scratch directory under the system temp dir.
    pub fn create(session_id: &str) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("lexintake-{session_id}-"))
            .tempdir()?;
        debug!(session = session_id, dir = %dir.path().display(), "Created session scratch");
        Ok(Self {
            session_id: session_id.to_string(),
            dir,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path for a file inside the scratch directory. Only the final component
    /// of `file_name` is kept so a hostile name cannot escape the directory.
    pub fn file_path(&self, file_name: &str) -> PathBuf {
        let base = Path::new(file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "upload.bin".to_string());
        self.dir.path().join(base)
    }

    /// Remove the directory. Returns the failure message, if any, after
    /// logging it.
    pub fn close(self) -> Option<String> {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => {
                debug!(session = %self.session_id, "Removed session scratch");
                None
            }
            Err(e) => {
                let msg = format!("cleanup of {} failed: {e}", path.display());
                warn!(session = %self.session_id, "{msg}");
                Some(msg)
            }
        }
    }
}
