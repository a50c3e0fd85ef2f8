//! Shared helpers for dates and filenames.

use chrono::{Datelike, Local, NaiveDate};

const MONTHS: [&str; 12] = [
    "Januari",
    "Februari",
    "Maret",
    "April",
    "Mei",
    "Juni",
    "Juli",
    "Agustus",
    "September",
    "Oktober",
    "November",
    "Desember",
];

const DAYS: [&str; 7] = [
    "Senin", "Selasa", "Rabu", "Kamis", "Jumat", "Sabtu", "Minggu",
];

/// Format today's date in Indonesian format (e.g., "30 Desember 2025").
pub fn format_indonesian_date() -> String {
    format_naive_date(Local::now().date_naive())
}

fn format_naive_date(date: NaiveDate) -> String {
    let month = MONTHS[(date.month0() as usize).min(MONTHS.len() - 1)];
    format!("{} {} {}", date.day(), month, date.year())
}

/// Format an ISO date string (`YYYY-MM-DD`). Unparseable input falls back
/// to `-`, matching what the letter body shows for a blank field.
pub fn format_date_id(value: &str) -> String {
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(d) => format_naive_date(d),
        Err(_) => "-".to_string(),
    }
}

/// Indonesian day name for an ISO date string.
pub fn day_name_id(value: &str) -> String {
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(d) => DAYS[d.weekday().num_days_from_monday() as usize].to_string(),
        Err(_) => "-".to_string(),
    }
}

/// Inclusive day count between two ISO dates; the first day counts.
pub fn duration_days_inclusive(start: &str, end: &str) -> Option<i64> {
    let s = NaiveDate::parse_from_str(start, "%Y-%m-%d").ok()?;
    let e = NaiveDate::parse_from_str(end, "%Y-%m-%d").ok()?;
    Some((e - s).num_days().abs() + 1)
}

/// Sanitize a string for use in filenames.
pub fn sanitize_label(name: &str, fallback: &str) -> String {
    let mut result = String::new();
    let mut last_sep = false;

    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            result.push(ch);
            last_sep = false;
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            if !last_sep && !result.is_empty() {
                result.push('_');
                last_sep = true;
            }
        }
    }

    let trimmed = result.trim_matches('_');
    if trimmed.is_empty() {
        return fallback.to_string();
    }

    trimmed.chars().take(30).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_date_id() {
        assert_eq!(format_date_id("2025-10-20"), "20 Oktober 2025");
        assert_eq!(format_date_id("not-a-date"), "-");
    }

    #[test]
    fn test_day_name_id() {
        // 2025-10-20 is a Monday
        assert_eq!(day_name_id("2025-10-20"), "Senin");
    }

    #[test]
    fn test_duration_inclusive() {
        assert_eq!(duration_days_inclusive("2025-10-20", "2025-10-22"), Some(3));
        assert_eq!(duration_days_inclusive("2025-10-20", "2025-10-20"), Some(1));
        assert_eq!(duration_days_inclusive("x", "2025-10-20"), None);
    }

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("Rapat Dosen / Staf", "Dokumen"), "Rapat_Dosen_Staf");
        assert_eq!(sanitize_label("###", "Dokumen"), "Dokumen");
    }
}
