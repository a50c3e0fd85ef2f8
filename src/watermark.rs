//! Preview watermark stamper.
//!
//! Overlays a diagonal translucent "PREVIEW" on every page of a PDF. Only
//! preview responses go through here; registered letters are never
//! stamped. The stamper must never break the caller's flow: on any
//! internal error it hands back the original bytes.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};

const MARK: &str = "PREVIEW";
const OPACITY: f32 = 0.18;
const FALLBACK_PAGE: (f32, f32) = (595.0, 842.0); // A4 in points

/// Stamp the preview marking onto every page. Infallible by contract.
pub fn stamp_preview(pdf: &[u8]) -> Vec<u8> {
    match try_stamp(pdf) {
        Ok(stamped) => stamped,
        Err(e) => {
            log::warn!("preview watermark skipped, returning unmarked pdf: {e}");
            pdf.to_vec()
        }
    }
}

fn try_stamp(pdf: &[u8]) -> Result<Vec<u8>, lopdf::Error> {
    let mut doc = Document::load_mem(pdf)?;

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let gs_id = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => OPACITY,
        "CA" => OPACITY,
    });

    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    for page_id in pages {
        let (width, height) = page_size(&doc, page_id).unwrap_or(FALLBACK_PAGE);
        add_stamp_resources(&mut doc, page_id, font_id, gs_id)?;

        let mut content = doc.get_page_content(page_id)?;
        content.push(b'\n');
        content.extend_from_slice(stamp_ops(width, height).as_bytes());
        doc.change_page_content(page_id, content)?;
    }

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// Drawing operators: rotate 45 degrees around the page center, size the
/// text proportionally to the page width.
fn stamp_ops(width: f32, height: f32) -> String {
    let size = width / 6.0;
    // Approximate Helvetica advance to center the word on the baseline.
    let text_width = size * 0.6 * MARK.len() as f32;
    let (cx, cy) = (width / 2.0, height / 2.0);
    format!(
        "q /GSwm gs BT /Fwm {size:.1} Tf 0.5 g \
         0.7071 0.7071 -0.7071 0.7071 {cx:.1} {cy:.1} Tm \
         {tx:.1} {ty:.1} Td ({MARK}) Tj ET Q\n",
        tx = -text_width / 2.0,
        ty = -size / 3.0,
    )
}

fn page_size(doc: &Document, page_id: ObjectId) -> Option<(f32, f32)> {
    let page = doc.get_dictionary(page_id).ok()?;
    let media_box = match page.get(b"MediaBox").ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_array().ok()?,
        Object::Array(arr) => arr,
        _ => return None,
    };
    if media_box.len() != 4 {
        return None;
    }
    let num = |obj: &Object| -> Option<f32> {
        match obj {
            Object::Integer(i) => Some(*i as f32),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    };
    let x0 = num(&media_box[0])?;
    let y0 = num(&media_box[1])?;
    let x1 = num(&media_box[2])?;
    let y1 = num(&media_box[3])?;
    Some((x1 - x0, y1 - y0))
}

/// Register the watermark font and graphics state on a page's resources.
/// Resources may be inline, referenced, or absent (inherited); the inner
/// `Font` / `ExtGState` subdictionaries may themselves be references.
fn add_stamp_resources(
    doc: &mut Document,
    page_id: ObjectId,
    font_id: ObjectId,
    gs_id: ObjectId,
) -> Result<(), lopdf::Error> {
    let resources_ref = {
        let page = doc.get_dictionary(page_id)?;
        match page.get(b"Resources") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        }
    };

    if let Some(rid) = resources_ref {
        set_in_subdict(doc, rid, "Font", "Fwm", font_id)?;
        set_in_subdict(doc, rid, "ExtGState", "GSwm", gs_id)?;
        return Ok(());
    }

    // Inline or missing Resources: mutate the page dictionary itself.
    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)?;
    if !matches!(page.get(b"Resources"), Ok(Object::Dictionary(_))) {
        page.set("Resources", Dictionary::new());
    }
    let resources = page
        .get_mut(b"Resources")
        .and_then(Object::as_dict_mut)?;
    set_entry(resources, "Font", "Fwm", font_id);
    set_entry(resources, "ExtGState", "GSwm", gs_id);
    Ok(())
}

/// Insert `name -> Reference(target)` into a subdictionary of a referenced
/// resources dictionary, following one more level of indirection if the
/// subdictionary is itself a reference.
fn set_in_subdict(
    doc: &mut Document,
    resources_id: ObjectId,
    key: &str,
    name: &str,
    target: ObjectId,
) -> Result<(), lopdf::Error> {
    let sub_ref = {
        let resources = doc.get_dictionary(resources_id)?;
        match resources.get(key.as_bytes()) {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        }
    };
    if let Some(sub_id) = sub_ref {
        let sub = doc
            .get_object_mut(sub_id)
            .and_then(Object::as_dict_mut)?;
        sub.set(name, Object::Reference(target));
        return Ok(());
    }
    let resources = doc
        .get_object_mut(resources_id)
        .and_then(Object::as_dict_mut)?;
    set_entry(resources, key, name, target);
    Ok(())
}

fn set_entry(resources: &mut Dictionary, key: &str, name: &str, target: ObjectId) {
    if !matches!(resources.get(key.as_bytes()), Ok(Object::Dictionary(_))) {
        resources.set(key, Dictionary::new());
    }
    if let Ok(sub) = resources
        .get_mut(key.as_bytes())
        .and_then(Object::as_dict_mut)
    {
        sub.set(name, Object::Reference(target));
    }
}
