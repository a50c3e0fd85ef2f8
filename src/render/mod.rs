//! Mail-merge renderer for DOCX templates.
//!
//! A DOCX file is a zip container; the merge substitutes placeholder tags
//! in `word/document.xml` and every header/footer part, and copies all
//! other entries verbatim. The rebuild uses deflate with a fixed mtime so
//! the same template and context always produce byte-identical output.

mod merge;

pub use merge::{Delimiters, MergeEngine};

use std::io::{Cursor, Read, Write};

use serde_json::Value;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Errors that can occur during mail merge.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template is not a valid document container: {0}")]
    Container(#[from] zip::result::ZipError),
    #[error("failed to read template part {part}: {source}")]
    PartIo {
        part: String,
        #[source]
        source: std::io::Error,
    },
    #[error("template part {0} is not valid UTF-8")]
    PartEncoding(String),
    #[error("unterminated tag starting near `{0}`")]
    UnterminatedTag(String),
    #[error("section `{0}` is never closed")]
    UnclosedSection(String),
    #[error("unexpected section close `{0}`")]
    UnexpectedClose(String),
}

impl RenderError {
    /// The tag that caused the failure, when one is known.
    pub fn tag(&self) -> Option<&str> {
        match self {
            RenderError::UnterminatedTag(t)
            | RenderError::UnclosedSection(t)
            | RenderError::UnexpectedClose(t) => Some(t),
            _ => None,
        }
    }
}

fn is_merge_part(name: &str) -> bool {
    name == "word/document.xml"
        || ((name.starts_with("word/header") || name.starts_with("word/footer"))
            && name.ends_with(".xml"))
}

/// Stateless renderer; holds only the tag delimiters.
pub struct MailMergeRenderer {
    engine: MergeEngine,
}

impl MailMergeRenderer {
    pub fn new(delimiters: Delimiters) -> Self {
        Self {
            engine: MergeEngine::new(delimiters),
        }
    }

    /// Merge `context` into `template` and return the finished document.
    /// No disk I/O happens here.
    pub fn render(&self, template: &[u8], context: &Value) -> Result<Vec<u8>, RenderError> {
        let mut archive = ZipArchive::new(Cursor::new(template))?;
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        // Fixed mtime keeps the output deterministic.
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            let name = entry.name().to_string();

            if entry.is_dir() {
                writer.add_directory(name, options)?;
                continue;
            }

            let mut raw = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut raw)
                .map_err(|source| RenderError::PartIo {
                    part: name.clone(),
                    source,
                })?;

            let data = if is_merge_part(&name) {
                let xml = String::from_utf8(raw)
                    .map_err(|_| RenderError::PartEncoding(name.clone()))?;
                self.engine.merge(&xml, context)?.into_bytes()
            } else {
                raw
            };

            writer.start_file(name.clone(), options)?;
            writer
                .write_all(&data)
                .map_err(|source| RenderError::PartIo { part: name, source })?;
        }

        let cursor = writer.finish()?;
        Ok(cursor.into_inner())
    }
}
