//! Human-readable value previews for interactive tooling.
//!
//! The truncation rule is boundary-sensitive and part of the public
//! contract: a preview longer than `max_length` is cut to `max_length - 3`
//! characters plus `"..."`; a preview of exactly `max_length` characters is
//! left alone; a `max_length` of 3 or less always yields `"..."`.

use super::raw::RawValue;
use super::CValue;

/// Default preview width
pub const DEFAULT_PREVIEW_LENGTH: usize = 80;

fn render_float(x: f64) -> String {
    if x.is_nan() {
        "NaN".to_string()
    } else if x == f64::INFINITY {
        "Infinity".to_string()
    } else if x == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        x.to_string()
    }
}

fn render(value: &CValue) -> String {
    match value {
        CValue::String(s) => format!("\"{s}\""),
        CValue::Int(i) => i.to_string(),
        CValue::Float(x) => render_float(*x),
        CValue::Boolean(b) => b.to_string(),
        CValue::List { items, .. } => format!("[{} items]", items.len()),
        CValue::Map { entries, .. } => format!("{{{} entries}}", entries.len()),
        CValue::Product { fields, .. } => {
            let rendered: Vec<String> = fields
                .iter()
                .map(|(name, v)| format!("{name}: {}", render(v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        CValue::Union { union_tag, .. } => format!("{union_tag}(...)"),
        CValue::Some { inner, .. } => format!("Some({})", render(inner)),
        CValue::None { .. } => "None".to_string(),
    }
}

fn truncate(preview: String, max_length: usize) -> String {
    if max_length <= 3 {
        return "...".to_string();
    }
    if preview.chars().count() > max_length {
        let head: String = preview.chars().take(max_length - 3).collect();
        format!("{head}...")
    } else {
        preview
    }
}

/// Render a short preview of `value`, truncated to `max_length` characters.
pub fn value_preview(value: &CValue, max_length: usize) -> String {
    truncate(render(value), max_length)
}

/// Stringify a raw value with the preview conventions, minus the quotes on
/// strings. Used by string interpolation.
pub fn stringify_raw(value: &RawValue) -> String {
    match value {
        RawValue::Str(s) => s.clone(),
        RawValue::Int(i) => i.to_string(),
        RawValue::Float(x) => render_float(*x),
        RawValue::Bool(b) => b.to_string(),
        RawValue::IntList(xs) => format!("[{} items]", xs.len()),
        RawValue::FloatList(xs) => format!("[{} items]", xs.len()),
        RawValue::StringList(xs) => format!("[{} items]", xs.len()),
        RawValue::BoolList(xs) => format!("[{} items]", xs.len()),
        RawValue::List(items) => format!("[{} items]", items.len()),
        RawValue::Map(pairs) => format!("{{{} entries}}", pairs.len()),
        RawValue::Product(values) => format!("{{{} fields}}", values.len()),
        RawValue::Union { tag, .. } => format!("{tag}(...)"),
        RawValue::Some(inner) => format!("Some({})", stringify_raw(inner)),
        RawValue::None => "None".to_string(),
    }
}
