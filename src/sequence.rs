//! Registration number generator.
//!
//! Two conventions exist side by side:
//! - count-in-period: number of documents of the type already created this
//!   month (or year), plus one, zero-padded to three digits;
//! - last-increment (prodi letters): take the most recent number issued
//!   for the type regardless of period and bump its sequence.
//!
//! Neither is atomic against concurrent submissions; the registry's
//! duplicate check is the backstop. Callers must reject `DuplicateNumber`
//! before rendering or persisting anything.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::letters::{LetterType, NumberingStrategy};
use crate::registry::{DocumentRegistry, RegistryError};

lazy_static! {
    /// Expected prodi shape: PREFIX-YYYY-MM-SEQ.
    static ref EXPECTED: Regex = Regex::new(r"^([A-Z]+)-(\d{4})-(\d{2})-(\d+)$").unwrap();
    static ref LEADING: Regex = Regex::new(r"^(\d+)(.*)$").unwrap();
    static ref TRAILING: Regex = Regex::new(r"^(.*?)(\d+)$").unwrap();
}

/// Prodi sub-kind prefixes. Payloads carry either the full sub-kind name
/// or the short code itself; unknown kinds fall back to the type prefix.
fn prodi_prefix(jenis: Option<&str>) -> &'static str {
    match jenis.map(|j| j.trim().to_lowercase()).as_deref() {
        Some("surat rekomendasi mahasiswa" | "srm") => "SRM",
        Some("surat persetujuan krs" | "spk") => "SPK",
        Some("surat tugas pembimbing akademik" | "stpa") => "STPA",
        Some("surat keterangan penelitian/skripsi" | "skp") => "SKP",
        _ => LetterType::Prodi.number_prefix(),
    }
}

/// Produce the next registration number for a letter type.
///
/// `jenis` is the sub-kind field from the payload, consulted only by the
/// prodi convention.
pub async fn next_number(
    registry: &dyn DocumentRegistry,
    ty: LetterType,
    jenis: Option<&str>,
    now: DateTime<Utc>,
) -> Result<String, RegistryError> {
    match ty.numbering() {
        NumberingStrategy::CountMonthly => {
            let (from, to) = month_bounds(now);
            let count = registry.count_in_period(ty, from, to).await?;
            Ok(format!(
                "{:03}/{}/FI/{:02}/{}",
                count + 1,
                ty.number_prefix(),
                now.month(),
                now.year()
            ))
        }
        NumberingStrategy::CountYearly => {
            let (from, to) = year_bounds(now);
            let count = registry.count_in_period(ty, from, to).await?;
            Ok(format!("{:03}", count + 1))
        }
        NumberingStrategy::LastIncrement => {
            let prefix = prodi_prefix(jenis);
            let last = registry.last_number(ty).await?;
            Ok(increment_number(last.as_deref(), prefix, now))
        }
    }
}

/// Bump the sequence of the last-issued number. When the last number does
/// not match the expected `PREFIX-YYYY-MM-SEQ` shape, fall back in order:
/// increment its leading digits, else its trailing digits, else append
/// `-1`. The chain keeps numbering continuous across format changes.
fn increment_number(last: Option<&str>, prefix: &str, now: DateTime<Utc>) -> String {
    let stamp = |seq: u64| format!("{}-{}-{:02}-{:03}", prefix, now.year(), now.month(), seq);

    let Some(last) = last else {
        return stamp(1);
    };

    if let Some(caps) = EXPECTED.captures(last) {
        let seq: u64 = caps[4].parse().unwrap_or(0);
        return stamp(seq + 1);
    }

    if let Some(caps) = LEADING.captures(last) {
        if let Ok(n) = caps[1].parse::<u64>() {
            let width = caps[1].len();
            return format!("{:0width$}{}", n + 1, &caps[2], width = width);
        }
    }

    if let Some(caps) = TRAILING.captures(last) {
        if let Ok(n) = caps[2].parse::<u64>() {
            let width = caps[2].len();
            return format!("{}{:0width$}", &caps[1], n + 1, width = width);
        }
    }

    format!("{last}-1")
}

fn month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .unwrap();
    let to = if now.month() == 12 {
        Utc.with_ymd_and_hms(now.year() + 1, 1, 1, 0, 0, 0).unwrap()
    } else {
        Utc.with_ymd_and_hms(now.year(), now.month() + 1, 1, 0, 0, 0)
            .unwrap()
    };
    (from, to)
}

fn year_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(now.year() + 1, 1, 1, 0, 0, 0).unwrap();
    (from, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DocumentStatus, InMemoryRegistry, NewDocument};
    use serde_json::json;

    fn at(y: i32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, 15, 10, 0, 0).unwrap()
    }

    async fn seed(reg: &InMemoryRegistry, ty: LetterType, number: &str) {
        reg.create(NewDocument {
            number: number.to_string(),
            doc_type: ty,
            status: DocumentStatus::Generated,
            payload: json!({}),
            created_by: 1,
            file_path: None,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_monthly_count_format() {
        let reg = InMemoryRegistry::new();
        let n = next_number(&reg, LetterType::Undangan, None, at(2026, 1))
            .await
            .unwrap();
        assert_eq!(n, "001/UND/FI/01/2026");
    }

    #[tokio::test]
    async fn test_sequential_numbers_increase() {
        // Seeded documents get the live clock as created_at, so the
        // counting period must come from the live clock as well.
        let reg = InMemoryRegistry::new();
        let now = Utc::now();
        let first = next_number(&reg, LetterType::Undangan, None, now).await.unwrap();
        seed(&reg, LetterType::Undangan, &first).await;
        let second = next_number(&reg, LetterType::Undangan, None, now).await.unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("001/UND/FI/"), "{first}");
        assert!(second.starts_with("002/UND/FI/"), "{second}");
    }

    #[tokio::test]
    async fn test_yearly_bare_count() {
        let reg = InMemoryRegistry::new();
        seed(&reg, LetterType::Laak, "001").await;
        let n = next_number(&reg, LetterType::Laak, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(n, "002");
    }

    #[tokio::test]
    async fn test_prodi_increments_last_number() {
        let reg = InMemoryRegistry::new();
        seed(&reg, LetterType::Prodi, "SRM-2025-12-007").await;
        let n = next_number(
            &reg,
            LetterType::Prodi,
            Some("surat rekomendasi mahasiswa"),
            at(2026, 1),
        )
        .await
        .unwrap();
        assert_eq!(n, "SRM-2026-01-008");
    }

    #[test]
    fn test_fallback_chain() {
        let now = at(2026, 1);
        // No previous number: sequence starts at 1.
        assert_eq!(increment_number(None, "SRM", now), "SRM-2026-01-001");
        // Expected shape: trailing sequence bumped, period refreshed.
        assert_eq!(
            increment_number(Some("SKP-2025-11-041"), "SKP", now),
            "SKP-2026-01-042"
        );
        // Leading digits win over trailing ones.
        assert_eq!(
            increment_number(Some("007/UND/FI/2025"), "SRM", now),
            "008/UND/FI/2025"
        );
        // Trailing digits as second fallback.
        assert_eq!(
            increment_number(Some("SURAT-X-12"), "SRM", now),
            "SURAT-X-13"
        );
        // No digits at all: append -1.
        assert_eq!(increment_number(Some("LEGACY"), "SRM", now), "LEGACY-1");
    }

    #[test]
    fn test_prodi_prefix_accepts_short_codes() {
        assert_eq!(prodi_prefix(Some("SRM")), "SRM");
        assert_eq!(prodi_prefix(Some("spk")), "SPK");
        assert_eq!(prodi_prefix(Some("surat persetujuan krs")), "SPK");
        assert_eq!(prodi_prefix(Some("surat undangan rapat")), "SPRODI");
        assert_eq!(prodi_prefix(None), "SPRODI");
    }

    #[test]
    fn test_fallback_preserves_padding() {
        let now = at(2026, 3);
        assert_eq!(
            increment_number(Some("009/ST/FI/2025"), "SRM", now),
            "010/ST/FI/2025"
        );
    }
}
