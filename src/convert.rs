//! DOCX to PDF conversion through an external headless converter.
//!
//! Each call gets its own scratch directory (a `TempDir` guard, removed on
//! success, failure, and timeout alike) plus a uniquely named input file,
//! so concurrent conversions never collide even within one clock tick. The
//! tool is spawned with an argument vector, never through a shell.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tempfile::TempDir;
use tokio::process::Command;

static CALL_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("conversion timed out after {0:?}")]
    TimedOut(Duration),
    #[error("converter exited with status {status}: {stderr}")]
    ToolFailed { status: i32, stderr: String },
    #[error("converter produced no output file")]
    MissingOutput,
    #[error("conversion i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the external converter.
#[derive(Debug, Clone)]
pub struct PdfConverter {
    command: String,
    timeout: Duration,
    scratch_root: Option<PathBuf>,
}

impl PdfConverter {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            scratch_root: None,
        }
    }

    /// Place per-call scratch directories under `root` instead of the
    /// system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    fn scratch_dir(&self) -> std::io::Result<TempDir> {
        match &self.scratch_root {
            Some(root) => tempfile::tempdir_in(root),
            None => tempfile::tempdir(),
        }
    }

    /// Convert a DOCX binary to PDF.
    pub async fn to_pdf(&self, docx: &[u8]) -> Result<Vec<u8>, ConvertError> {
        let scratch = self.scratch_dir()?;
        let stem = format!(
            "convert-{}-{}",
            CALL_COUNTER.fetch_add(1, Ordering::Relaxed),
            Utc::now().timestamp_millis()
        );
        let input = scratch.path().join(format!("{stem}.docx"));
        let expected = scratch.path().join(format!("{stem}.pdf"));

        tokio::fs::write(&input, docx).await?;

        let run = Command::new(&self.command)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(scratch.path())
            .arg(&input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => return Err(ConvertError::TimedOut(self.timeout)),
            Ok(result) => result?,
        };

        if !output.status.success() {
            return Err(ConvertError::ToolFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        match tokio::fs::read(&expected).await {
            Ok(pdf) => Ok(pdf),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ConvertError::MissingOutput),
            Err(e) => Err(e.into()),
        }
        // `scratch` drops here and removes input and output on every path.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_entries(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_tool_failure_is_structured_and_cleans_scratch() {
        let root = tempfile::tempdir().unwrap();
        let converter = PdfConverter::new("false", Duration::from_secs(5))
            .with_scratch_root(root.path());
        let err = converter.to_pdf(b"not a real docx").await.unwrap_err();
        assert!(matches!(err, ConvertError::ToolFailed { .. }));
        assert!(list_entries(root.path()).is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_cleans_scratch() {
        let root = tempfile::tempdir().unwrap();
        let converter =
            PdfConverter::new("definitely-not-a-converter-binary", Duration::from_secs(5))
                .with_scratch_root(root.path());
        let err = converter.to_pdf(b"x").await.unwrap_err();
        assert!(matches!(err, ConvertError::Io(_)));
        assert!(list_entries(root.path()).is_empty());
    }

    #[tokio::test]
    async fn test_successful_tool_without_output_is_missing_output() {
        let root = tempfile::tempdir().unwrap();
        // `true` exits 0 but writes nothing.
        let converter =
            PdfConverter::new("true", Duration::from_secs(5)).with_scratch_root(root.path());
        let err = converter.to_pdf(b"x").await.unwrap_err();
        assert!(matches!(err, ConvertError::MissingOutput));
        assert!(list_entries(root.path()).is_empty());
    }

    #[tokio::test]
    async fn test_unique_input_names() {
        let first = CALL_COUNTER.fetch_add(1, Ordering::Relaxed);
        let second = CALL_COUNTER.fetch_add(1, Ordering::Relaxed);
        assert_ne!(first, second);
    }
}
