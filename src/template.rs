//! Template store.
//!
//! Read-mostly directory of `.docx` templates with a short-lived byte
//! cache. Template management (upload/delete) belongs to an external
//! collaborator; the core only reads. A named template that went missing
//! falls back to the letter type's default template, with the substitution
//! logged, so pending regeneration requests keep working.

use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::letters::LetterType;
use crate::render::{Delimiters, MergeEngine};

const CACHE_TTL_SECS: u64 = 10 * 60;
const CACHE_CAPACITY: u64 = 64;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template {0} not found")]
    NotFound(String),
    #[error("invalid template name {0}")]
    InvalidName(String),
    #[error("failed to read template {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Catalog record for one template on disk. `variables` is recovered by
/// scanning the main document part for tags; `doc_type` is set when the
/// file is a letter type's default template.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Template {
    pub name: String,
    pub doc_type: Option<LetterType>,
    pub file_path: String,
    pub variables: Vec<String>,
    pub is_active: bool,
}

#[derive(Clone)]
pub struct TemplateStore {
    dir: PathBuf,
    cache: Cache<String, Vec<u8>>,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(CACHE_TTL_SECS))
            .max_capacity(CACHE_CAPACITY)
            .build();
        Self {
            dir: dir.into(),
            cache,
        }
    }

    /// Load the template for a letter. `name` may be absent, in which case
    /// the type's default is used directly; a present-but-missing name
    /// falls back to the default with a warning.
    pub async fn load_for(
        &self,
        ty: LetterType,
        name: Option<&str>,
    ) -> Result<Vec<u8>, TemplateError> {
        match name {
            None => self.load(ty.default_template()).await,
            Some(requested) => match self.load(requested).await {
                Ok(bytes) => Ok(bytes),
                Err(TemplateError::NotFound(_)) => {
                    log::warn!(
                        "template {requested} missing, falling back to {}",
                        ty.default_template()
                    );
                    self.load(ty.default_template()).await
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Read a template by filename, via the cache.
    pub async fn load(&self, name: &str) -> Result<Vec<u8>, TemplateError> {
        let path = self.resolve(name)?;
        if let Some(bytes) = self.cache.get(name).await {
            return Ok(bytes);
        }
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::NotFound(name.to_string()))
            }
            Err(source) => {
                return Err(TemplateError::Io {
                    name: name.to_string(),
                    source,
                })
            }
        };
        self.cache.insert(name.to_string(), bytes.clone()).await;
        Ok(bytes)
    }

    /// Catalog the `.docx` templates on disk, sorted by name.
    pub fn list(&self) -> Vec<Template> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.ends_with(".docx"))
            .collect();
        names.sort();
        names.into_iter().map(|name| self.describe(name)).collect()
    }

    fn describe(&self, name: String) -> Template {
        let doc_type = LetterType::ALL
            .into_iter()
            .find(|ty| ty.default_template() == name);
        let delimiters = doc_type.map_or_else(Delimiters::brace, LetterType::delimiters);
        let path = self.dir.join(&name);
        let variables = std::fs::read(&path)
            .map(|bytes| scan_variables(&bytes, delimiters))
            .unwrap_or_default();
        Template {
            name,
            doc_type,
            file_path: path.to_string_lossy().into_owned(),
            variables,
            is_active: true,
        }
    }

    /// Reject anything that escapes the template directory.
    fn resolve(&self, name: &str) -> Result<PathBuf, TemplateError> {
        let candidate = Path::new(name);
        let plain_file = candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
            && candidate.components().count() == 1;
        if !plain_file {
            return Err(TemplateError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }
}

/// Pull the tag names out of a template's main document part. Anything
/// that is not a readable archive, or does not parse as a tag stream,
/// yields an empty list rather than an error; the catalog is advisory.
fn scan_variables(bytes: &[u8], delimiters: Delimiters) -> Vec<String> {
    let Ok(mut archive) = zip::ZipArchive::new(std::io::Cursor::new(bytes)) else {
        return Vec::new();
    };
    let Ok(mut part) = archive.by_name("word/document.xml") else {
        return Vec::new();
    };
    let mut xml = String::new();
    if part.read_to_string(&mut xml).is_err() {
        return Vec::new();
    }
    MergeEngine::new(delimiters).variables(&xml).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        let err = store.load("nonexistent.docx").await.unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fallback_to_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("template_undangan.docx"), b"default").unwrap();
        let store = TemplateStore::new(dir.path());
        let bytes = store
            .load_for(LetterType::Undangan, Some("gone.docx"))
            .await
            .unwrap();
        assert_eq!(bytes, b"default");
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        let err = store.load("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, TemplateError::InvalidName(_)));
    }

    fn docx(dir: &Path, name: &str, body: &str) {
        use std::io::Write;
        let file = std::fs::File::create(dir.join(name)).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("word/document.xml", options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_list_filters_docx() {
        let dir = tempfile::tempdir().unwrap();
        docx(dir.path(), "a.docx", "{nama}");
        std::fs::write(dir.path().join("b.txt"), b"x").unwrap();
        let store = TemplateStore::new(dir.path());
        let templates = store.list();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].name, "a.docx");
        assert!(templates[0].is_active);
    }

    #[test]
    fn test_list_catalogs_type_and_variables() {
        let dir = tempfile::tempdir().unwrap();
        docx(
            dir.path(),
            "template_undangan.docx",
            "{nomor_surat} {#tamu}{nama}{/tamu}",
        );
        docx(dir.path(), "custom.docx", "not a zip tag: nothing");
        let store = TemplateStore::new(dir.path());
        let templates = store.list();

        assert_eq!(templates[0].name, "custom.docx");
        assert_eq!(templates[0].doc_type, None);
        assert!(templates[0].variables.is_empty());

        assert_eq!(templates[1].name, "template_undangan.docx");
        assert_eq!(templates[1].doc_type, Some(LetterType::Undangan));
        assert_eq!(templates[1].variables, ["nomor_surat", "tamu", "nama"]);
    }
}
