//! Input resolution: turn a user-supplied path or URL into a [`SourceDocument`].
//!
//! Local files are read directly. URLs are downloaded into the request's
//! [`SessionScratch`] so the bytes on disk share the request's lifetime and
//! are removed with it. The declared file name (and therefore the document
//! kind) comes from the path or the last URL segment.

use crate::error::DocumentError;
use crate::pipeline::normalize::SourceDocument;
use crate::session::SessionScratch;
use std::path::PathBuf;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL into a source document.
pub async fn resolve_input(
    input: &str,
    scratch: &SessionScratch,
    timeout_secs: u64,
) -> Result<SourceDocument, DocumentError> {
    if is_url(input) {
        download_url(input, scratch, timeout_secs).await
    } else {
        read_local(input).await
    }
}

/// Read a local file, mapping I/O failures to document errors.
async fn read_local(path_str: &str) -> Result<SourceDocument, DocumentError> {
    let path = PathBuf::from(path_str);
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => DocumentError::PermissionDenied { path: path.clone() },
        _ => DocumentError::FileNotFound { path: path.clone() },
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str.to_string());
    debug!("Read local input: {} ({} bytes)", path.display(), bytes.len());
    Ok(SourceDocument::new(file_name, bytes))
}

/// Download a URL into the session scratch directory.
async fn download_url(
    url: &str,
    scratch: &SessionScratch,
    timeout_secs: u64,
) -> Result<SourceDocument, DocumentError> {
    info!("Downloading input from: {}", url);

    let failed = |reason: String| DocumentError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let file_name = extract_filename(url);
    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    let file_path = scratch.file_path(&file_name);
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| DocumentError::Internal(format!("Failed to write temp file: {}", e)))?;
    info!("Downloaded to: {}", file_path.display());

    Ok(SourceDocument::new(file_name, bytes.to_vec()))
}

/// Extract a file name (with extension) from the URL path.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    // No extension to go on; the PDF magic check will reject a non-PDF.
    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/report.pdf"));
        assert!(is_url("http://example.com/photo.jpg"));
        assert!(!is_url("/tmp/report.pdf"));
        assert!(!is_url("report.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url() {
        assert_eq!(extract_filename("https://x.test/a/b/tutanak.pdf"), "tutanak.pdf");
        assert_eq!(extract_filename("https://x.test/files/photo.JPG?sig=1"), "photo.JPG");
        assert_eq!(extract_filename("https://x.test/download"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn local_file_is_read_with_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kaza.png");
        std::fs::write(&path, b"bytes").unwrap();

        let doc = read_local(path.to_str().unwrap()).await.unwrap();
        assert_eq!(doc.file_name, "kaza.png");
        assert_eq!(doc.bytes, b"bytes");
    }

    #[tokio::test]
    async fn missing_local_file_is_not_found() {
        let err = read_local("/definitely/not/here.pdf").await.unwrap_err();
        assert!(matches!(err, DocumentError::FileNotFound { .. }));
    }
}
