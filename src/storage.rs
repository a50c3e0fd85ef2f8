//! On-disk storage for generated letter binaries.
//!
//! Registered letters are written under the configured output directory;
//! previews are never written here. Filenames arrive pre-built by the
//! pipeline but are sanitized once more before touching the filesystem.

use std::path::{Path, PathBuf};

/// Resolve a generated file's on-disk path.
pub fn output_path(output_dir: &Path, filename: &str) -> PathBuf {
    output_dir.join(sanitize_filename::sanitize(filename))
}

/// Persist a generated binary. Returns the relative path recorded on the
/// document.
pub async fn save_generated(
    output_dir: &Path,
    filename: &str,
    bytes: &[u8],
) -> std::io::Result<String> {
    let path = output_path(output_dir, filename);
    tokio::fs::write(&path, bytes).await?;
    Ok(path.to_string_lossy().into_owned())
}

/// Read a previously generated binary, if it is still on disk.
pub async fn read_generated(path: &str) -> std::io::Result<Vec<u8>> {
    tokio::fs::read(path).await
}
