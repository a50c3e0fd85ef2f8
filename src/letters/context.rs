//! Payload normalization for the mail-merge renderer.
//!
//! The HTTP layer hands over a free-form JSON payload. This module turns it
//! into the render context: the registration number and letter date are
//! injected, per-type derived fields are computed, and every top-level list
//! of rows gets its 1-based `no` and the page-break flag.

use serde_json::{json, Map, Value};

use super::common::{day_name_id, duration_days_inclusive, format_date_id, format_indonesian_date};
use super::LetterType;

/// Build the full render context for a letter.
pub fn normalize_context(ty: LetterType, number: &str, payload: &Value) -> Value {
    let mut map = match payload {
        Value::Object(m) => m.clone(),
        _ => Map::new(),
    };

    map.insert("nomor_surat".into(), json!(number));
    map.entry("tanggal_surat")
        .or_insert_with(|| json!(format_indonesian_date()));

    match ty {
        LetterType::Undangan => enrich_event_fields(&mut map),
        LetterType::Tugas => enrich_assignment_fields(&mut map),
        _ => {}
    }

    annotate_lists(&mut map);

    Value::Object(map)
}

fn str_field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| map.get(*k).and_then(Value::as_str))
}

/// Invitation letters: derive day name, formatted event date and the
/// `HH:MM - HH:MM WIB` time range from the raw form fields.
fn enrich_event_fields(map: &mut Map<String, Value>) {
    if let Some(date) = str_field(map, &["tanggal_acara", "tanggalAcara"]) {
        let date = date.to_string();
        map.insert("hari".into(), json!(day_name_id(&date)));
        map.insert("tanggal".into(), json!(format_date_id(&date)));
    }

    let start = str_field(map, &["waktu_mulai", "waktuMulai", "waktu_acara", "waktuAcara"])
        .map(str::to_string);
    let end = str_field(map, &["waktu_selesai", "waktuSelesai"]).map(str::to_string);
    let waktu = match (start, end) {
        (Some(s), Some(e)) => format!("{s} - {e} WIB"),
        (Some(s), None) => format!("{s} WIB"),
        _ => "-".to_string(),
    };
    map.insert("waktu".into(), json!(waktu));

    // The form sends `lokasi`; the templates tag it as `tempat`.
    if !map.contains_key("tempat") {
        if let Some(lokasi) = str_field(map, &["lokasi"]) {
            let lokasi = lokasi.to_string();
            map.insert("tempat".into(), json!(lokasi));
        }
    }
}

/// Assignment orders: formatted start/end dates plus the inclusive duration.
fn enrich_assignment_fields(map: &mut Map<String, Value>) {
    let start = str_field(map, &["tanggal_mulai", "tanggalMulai"]).map(str::to_string);
    let end = str_field(map, &["tanggal_selesai", "tanggalSelesai"]).map(str::to_string);

    if let Some(ref s) = start {
        map.insert("tanggal_mulai".into(), json!(format_date_id(s)));
    }
    if let Some(ref e) = end {
        map.insert("tanggal_selesai".into(), json!(format_date_id(e)));
    }
    if let (Some(s), Some(e)) = (start, end) {
        if let Some(days) = duration_days_inclusive(&s, &e) {
            map.insert("lama_hari".into(), json!(format!("{days} Hari")));
        }
    }
}

/// Stamp every top-level list of row objects with `no` (1-based) and
/// `show_page_break` — true for every row except the last, so a merged
/// guest list never ends with a blank page.
fn annotate_lists(map: &mut Map<String, Value>) {
    for value in map.values_mut() {
        let Value::Array(rows) = value else { continue };
        if rows.is_empty() || !rows.iter().all(Value::is_object) {
            continue;
        }
        let last = rows.len() - 1;
        for (idx, row) in rows.iter_mut().enumerate() {
            let obj = row.as_object_mut().expect("checked above");
            obj.insert("no".into(), json!(idx + 1));
            obj.insert("show_page_break".into(), json!(idx != last));
        }
    }
}
