//! Letter-type registry.
//!
//! Every letter kind the office issues is a variant here. The per-type
//! wiring (wire tag, number prefix, default template, tag delimiters,
//! numbering strategy, approval gating) is resolved from the enum instead
//! of string-keyed maps, so an unknown kind cannot reach the renderer.

pub mod common;
pub mod context;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::render::Delimiters;

/// Numbering convention used by [`crate::sequence::next_number`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberingStrategy {
    /// Count documents of the type in the current calendar month.
    CountMonthly,
    /// Count documents of the type in the current calendar year.
    CountYearly,
    /// Increment the numeric component of the last-issued number,
    /// regardless of period.
    LastIncrement,
}

/// The closed set of letter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum LetterType {
    /// Surat tugas / SPPD (assignment orders)
    #[serde(rename = "surat_tugas")]
    Tugas,
    /// Surat undangan (invitations with a guest list)
    #[serde(rename = "surat_undangan")]
    Undangan,
    /// Surat keterangan (student certificates)
    #[serde(rename = "surat_keterangan")]
    Keterangan,
    /// Surat pengantar / permohonan (cover letters)
    #[serde(rename = "surat_pengantar")]
    Pengantar,
    /// Surat keputusan / edaran (decrees)
    #[serde(rename = "surat_keputusan")]
    Keputusan,
    /// Surat program studi (gated by the approval workflow)
    #[serde(rename = "surat_prodi")]
    Prodi,
    /// Surat LAAK (quality assurance letters)
    #[serde(rename = "surat_laak")]
    Laak,
}

impl LetterType {
    pub const ALL: [LetterType; 7] = [
        LetterType::Tugas,
        LetterType::Undangan,
        LetterType::Keterangan,
        LetterType::Pengantar,
        LetterType::Keputusan,
        LetterType::Prodi,
        LetterType::Laak,
    ];

    /// Wire tag used in URLs and in the `doc_type` column.
    pub fn tag(self) -> &'static str {
        match self {
            LetterType::Tugas => "surat_tugas",
            LetterType::Undangan => "surat_undangan",
            LetterType::Keterangan => "surat_keterangan",
            LetterType::Pengantar => "surat_pengantar",
            LetterType::Keputusan => "surat_keputusan",
            LetterType::Prodi => "surat_prodi",
            LetterType::Laak => "surat_laak",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.tag() == tag)
    }

    /// Short code used inside registration numbers.
    pub fn number_prefix(self) -> &'static str {
        match self {
            LetterType::Tugas => "ST",
            LetterType::Undangan => "UND",
            LetterType::Keterangan => "SKET",
            LetterType::Pengantar => "PGT",
            LetterType::Keputusan => "SK",
            LetterType::Prodi => "SPRODI",
            LetterType::Laak => "LAAK",
        }
    }

    /// Prefix for generated filenames.
    pub fn filename_prefix(self) -> &'static str {
        match self {
            LetterType::Tugas => "SuratTugas",
            LetterType::Undangan => "Undangan",
            LetterType::Keterangan => "SuratKeterangan",
            LetterType::Pengantar => "Surat",
            LetterType::Keputusan => "SK",
            LetterType::Prodi => "SuratProdi",
            LetterType::Laak => "LAAK",
        }
    }

    /// Template used when the payload names none (or names a missing one).
    pub fn default_template(self) -> &'static str {
        match self {
            LetterType::Tugas => "template_surat_tugas.docx",
            LetterType::Undangan => "template_undangan.docx",
            LetterType::Keterangan => "template_surat_keterangan.docx",
            LetterType::Pengantar => "template_pengantarpermohonan_A.docx",
            LetterType::Keputusan => "template_surat_keputusan_dekan.docx",
            LetterType::Prodi => "template_surat_program_studi.docx",
            LetterType::Laak => "template_surat_laak_default.docx",
        }
    }

    /// Decree and prodi templates carry prose with literal braces, so they
    /// use `<<< >>>` tags. Everything else uses plain braces.
    pub fn delimiters(self) -> Delimiters {
        match self {
            LetterType::Keputusan | LetterType::Prodi => Delimiters::angle(),
            _ => Delimiters::brace(),
        }
    }

    pub fn numbering(self) -> NumberingStrategy {
        match self {
            LetterType::Laak => NumberingStrategy::CountYearly,
            LetterType::Prodi => NumberingStrategy::LastIncrement,
            _ => NumberingStrategy::CountMonthly,
        }
    }

    /// Gated types require the sequential sign-off before final generation.
    pub fn is_gated(self) -> bool {
        matches!(self, LetterType::Prodi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for ty in LetterType::ALL {
            assert_eq!(LetterType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(LetterType::from_tag("surat_cinta"), None);
    }

    #[test]
    fn test_only_prodi_is_gated() {
        let gated: Vec<_> = LetterType::ALL.iter().filter(|t| t.is_gated()).collect();
        assert_eq!(gated, vec![&LetterType::Prodi]);
    }

    #[test]
    fn test_delimiters_per_type() {
        assert_eq!(LetterType::Keputusan.delimiters(), Delimiters::angle());
        assert_eq!(LetterType::Undangan.delimiters(), Delimiters::brace());
    }
}
