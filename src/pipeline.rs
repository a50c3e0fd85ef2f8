//! End-to-end letter production.
//!
//! The pipeline ties the stages together: resolve the registration
//! number, normalize the payload into a merge context, render the
//! template, optionally convert to PDF, and either register the result
//! (persist binary + record) or stamp it as a preview and return it
//! without leaving any trace.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use crate::convert::{ConvertError, PdfConverter};
use crate::letters::common::sanitize_label;
use crate::letters::context::normalize_context;
use crate::letters::LetterType;
use crate::registry::{
    Document, DocumentRegistry, DocumentStatus, NewDocument, RegistryError,
};
use crate::render::{MailMergeRenderer, RenderError};
use crate::sequence;
use crate::storage;
use crate::template::{TemplateError, TemplateStore};
use crate::watermark;

pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const PDF_MIME: &str = "application/pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Docx,
    Pdf,
}

impl OutputFormat {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "docx" => Some(OutputFormat::Docx),
            "pdf" => Some(OutputFormat::Pdf),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Docx => "docx",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            OutputFormat::Docx => DOCX_MIME,
            OutputFormat::Pdf => PDF_MIME,
        }
    }
}

/// A produced binary, ready to stream to the client.
#[derive(Debug)]
pub struct RenderedLetter {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime: &'static str,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct Pipeline {
    templates: TemplateStore,
    converter: PdfConverter,
    registry: Arc<dyn DocumentRegistry>,
    output_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        templates: TemplateStore,
        converter: PdfConverter,
        registry: Arc<dyn DocumentRegistry>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            templates,
            converter,
            registry,
            output_dir: output_dir.into(),
        }
    }

    /// Render a letter binary without touching disk or registry. Previews
    /// additionally carry the watermark (PDF only; a DOCX preview is
    /// returned unmarked since the mark belongs to the print form).
    pub async fn produce(
        &self,
        ty: LetterType,
        number: &str,
        payload: &Value,
        format: OutputFormat,
        preview: bool,
    ) -> Result<RenderedLetter, PipelineError> {
        let template_name = payload
            .get("template_name")
            .or_else(|| payload.get("templateName"))
            .and_then(Value::as_str);
        let template = self.templates.load_for(ty, template_name).await?;

        let context = normalize_context(ty, number, payload);
        let renderer = MailMergeRenderer::new(ty.delimiters());
        let docx = renderer.render(&template, &context)?;

        let bytes = match format {
            OutputFormat::Docx => docx,
            OutputFormat::Pdf => {
                let pdf = self.converter.to_pdf(&docx).await?;
                if preview {
                    watermark::stamp_preview(&pdf)
                } else {
                    pdf
                }
            }
        };

        Ok(RenderedLetter {
            bytes,
            filename: build_filename(ty, payload, format),
            mime: format.mime(),
        })
    }

    /// Issue a letter: resolve the registration number (caller-supplied or
    /// minted), render, and register it. Previews skip number reservation
    /// and persistence entirely.
    pub async fn issue(
        &self,
        ty: LetterType,
        payload: &Value,
        format: OutputFormat,
        preview: bool,
        created_by: i64,
    ) -> Result<RenderedLetter, PipelineError> {
        let requested = payload
            .get("nomor_surat")
            .or_else(|| payload.get("nomorSurat"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_owned);

        let number = match requested {
            Some(n) => {
                if !preview && self.registry.find_by_number(&n).await?.is_some() {
                    return Err(RegistryError::DuplicateNumber(n).into());
                }
                n
            }
            None => {
                let jenis = payload
                    .get("jenis_surat")
                    .or_else(|| payload.get("jenisSurat"))
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                sequence::next_number(self.registry.as_ref(), ty, jenis.as_deref(), Utc::now())
                    .await?
            }
        };

        let letter = self.produce(ty, &number, payload, format, preview).await?;
        if preview {
            return Ok(letter);
        }

        // The client gets its binary even when bookkeeping fails; the
        // failure is logged and the number stays unreserved.
        match storage::save_generated(&self.output_dir, &letter.filename, &letter.bytes).await {
            Ok(path) => {
                let record = NewDocument {
                    number: number.clone(),
                    doc_type: ty,
                    status: DocumentStatus::Generated,
                    payload: payload.clone(),
                    created_by,
                    file_path: Some(path),
                };
                if let Err(e) = self.registry.create(record).await {
                    log::error!("failed to register letter {number}: {e}");
                }
            }
            Err(e) => log::error!("failed to store letter {number}: {e}"),
        }

        Ok(letter)
    }

    /// Rebuild a registered document's binary from its stored payload.
    /// Used when the on-disk file has gone missing; the original number
    /// is reused, never re-minted.
    pub async fn regenerate(
        &self,
        doc: &Document,
        format: OutputFormat,
    ) -> Result<RenderedLetter, PipelineError> {
        self.produce(doc.doc_type, &doc.number, &doc.payload, format, false)
            .await
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }
}

/// `<prefix>_<subject>_<millis>_<id>.<ext>` — subject taken from the most
/// specific name field present in the payload, with a random id so two
/// letters for the same person in the same instant never collide.
fn build_filename(ty: LetterType, payload: &Value, format: OutputFormat) -> String {
    let subject = ["nama", "nama_lengkap", "namaLengkap", "perihal", "nama_kegiatan"]
        .iter()
        .find_map(|key| payload.get(key).and_then(Value::as_str))
        .unwrap_or("");
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}.{}",
        ty.filename_prefix(),
        sanitize_label(subject, ty.tag()),
        Utc::now().timestamp_millis(),
        &id[..8],
        format.extension()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_parsing() {
        assert_eq!(OutputFormat::from_str("PDF"), Some(OutputFormat::Pdf));
        assert_eq!(OutputFormat::from_str("docx"), Some(OutputFormat::Docx));
        assert_eq!(OutputFormat::from_str("odt"), None);
    }

    #[test]
    fn test_filename_uses_subject_and_prefix() {
        let name = build_filename(
            LetterType::Tugas,
            &json!({ "nama": "Budi Santoso" }),
            OutputFormat::Docx,
        );
        assert!(name.starts_with("SuratTugas_Budi_Santoso_"));
        assert!(name.ends_with(".docx"));
    }

    #[test]
    fn test_filename_falls_back_to_type_tag() {
        let name = build_filename(LetterType::Undangan, &json!({}), OutputFormat::Pdf);
        assert!(name.starts_with("Undangan_surat_undangan_"));
        assert!(name.ends_with(".pdf"));
    }
}
