//! Tagged JSON codec for `CType` and `CValue`.
//!
//! The codec is total: every well-formed `CValue` encodes, and decoding the
//! result restores an equal value. Encoded values are JSON objects carrying
//! at minimum a `tag` field; containers add `subtype`, `keysType`,
//! `valuesType`, `structure`, `innerType`, `unionTag` as appropriate.
//!
//! Maps encode as arrays of `[key, value]` pairs so entry order and
//! syntactic duplicates survive the round trip; the decoder additionally
//! accepts a JSON object for string-keyed maps.
//!
//! `CFloat` encodes NaN and the infinities as the JSON strings `"NaN"`,
//! `"Infinity"`, `"-Infinity"`. This loses strict-JSON compatibility for
//! those three values; consumers must accept the string fallback.
//!
//! A second, untyped surface (`decode_as`, `json_to_raw`, `raw_to_json`)
//! converts plain JSON guided by a `CType`, including the auto-detected
//! union variant convenience for untagged payloads.

use super::raw::RawValue;
use super::{CType, CValue, ValueError};
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;
use thiserror::Error;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// `tag` field absent or not a known tag
    #[error("unknown tag '{0}'")]
    UnknownTag(String),

    /// JSON kind disagrees with the expected representation
    #[error("expected {expected}, got {got}")]
    KindMismatch { expected: String, got: String },

    /// Required metadata field absent
    #[error("missing field '{0}'")]
    MissingField(String),

    /// Decoded value's type disagrees with the requested type
    #[error("type mismatch: expected {expected}, found {actual}")]
    TypeMismatch { expected: CType, actual: CType },

    /// Free-form decode failure
    #[error("{0}")]
    Message(String),

    /// Underlying JSON syntax error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Value-invariant violation surfaced while rebuilding
    #[error("invalid value: {0}")]
    Value(#[from] ValueError),
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// JSON kind name for error messages
fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn get_field<'a>(obj: &'a Map<String, Json>, name: &str) -> CodecResult<&'a Json> {
    obj.get(name)
        .ok_or_else(|| CodecError::MissingField(name.to_string()))
}

fn as_object(value: &Json) -> CodecResult<&Map<String, Json>> {
    value.as_object().ok_or_else(|| CodecError::KindMismatch {
        expected: "object".to_string(),
        got: json_kind(value).to_string(),
    })
}

// ============================================================================
// Type codec
// ============================================================================

/// Encode a `CType` to its tagged JSON form
pub fn encode_type(ty: &CType) -> Json {
    match ty {
        CType::String | CType::Int | CType::Float | CType::Boolean => {
            json!({ "tag": ty.tag() })
        }
        CType::List(elem) => json!({ "tag": "CList", "subtype": encode_type(elem) }),
        CType::Map(k, v) => json!({
            "tag": "CMap",
            "keysType": encode_type(k),
            "valuesType": encode_type(v),
        }),
        CType::Product(fields) => json!({
            "tag": "CProduct",
            "structure": encode_structure(fields),
        }),
        CType::Union(variants) => json!({
            "tag": "CUnion",
            "structure": encode_structure(variants),
        }),
        CType::Optional(inner) => json!({ "tag": "COptional", "innerType": encode_type(inner) }),
    }
}

fn encode_structure(fields: &BTreeMap<String, CType>) -> Json {
    Json::Object(
        fields
            .iter()
            .map(|(name, ty)| (name.clone(), encode_type(ty)))
            .collect(),
    )
}

/// Decode a `CType` from its tagged JSON form
pub fn decode_type(value: &Json) -> CodecResult<CType> {
    let obj = as_object(value)?;
    let tag = match obj.get("tag") {
        Some(Json::String(s)) => s.as_str(),
        Some(other) => {
            return Err(CodecError::KindMismatch {
                expected: "string".to_string(),
                got: json_kind(other).to_string(),
            })
        }
        None => return Err(CodecError::MissingField("tag".to_string())),
    };
    match tag {
        "CString" => Ok(CType::String),
        "CInt" => Ok(CType::Int),
        "CFloat" => Ok(CType::Float),
        "CBoolean" => Ok(CType::Boolean),
        "CList" => Ok(CType::List(Box::new(decode_type(get_field(
            obj, "subtype",
        )?)?))),
        "CMap" => Ok(CType::Map(
            Box::new(decode_type(get_field(obj, "keysType")?)?),
            Box::new(decode_type(get_field(obj, "valuesType")?)?),
        )),
        "CProduct" => Ok(CType::Product(decode_structure(get_field(
            obj,
            "structure",
        )?)?)),
        "CUnion" => Ok(CType::Union(decode_structure(get_field(
            obj,
            "structure",
        )?)?)),
        "COptional" => Ok(CType::Optional(Box::new(decode_type(get_field(
            obj,
            "innerType",
        )?)?))),
        other => Err(CodecError::UnknownTag(other.to_string())),
    }
}

fn decode_structure(value: &Json) -> CodecResult<BTreeMap<String, CType>> {
    let obj = as_object(value)?;
    obj.iter()
        .map(|(name, ty)| Ok((name.clone(), decode_type(ty)?)))
        .collect()
}

// ============================================================================
// Value codec (tagged)
// ============================================================================

fn encode_float(x: f64) -> Json {
    if x.is_nan() {
        Json::String("NaN".to_string())
    } else if x == f64::INFINITY {
        Json::String("Infinity".to_string())
    } else if x == f64::NEG_INFINITY {
        Json::String("-Infinity".to_string())
    } else {
        json!(x)
    }
}

fn decode_float(value: &Json) -> CodecResult<f64> {
    match value {
        Json::Number(n) => n.as_f64().ok_or_else(|| {
            CodecError::Message(format!("number {n} is not representable as f64"))
        }),
        Json::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => Err(CodecError::Message(format!(
                "invalid float string '{other}'"
            ))),
        },
        other => Err(CodecError::KindMismatch {
            expected: "Float".to_string(),
            got: json_kind(other).to_string(),
        }),
    }
}

/// Encode a `CValue` to its tagged JSON form
pub fn encode_value(value: &CValue) -> Json {
    match value {
        CValue::String(s) => json!({ "tag": "CString", "value": s }),
        CValue::Int(i) => json!({ "tag": "CInt", "value": i }),
        CValue::Float(x) => json!({ "tag": "CFloat", "value": encode_float(*x) }),
        CValue::Boolean(b) => json!({ "tag": "CBoolean", "value": b }),
        CValue::List {
            items,
            element_type,
        } => json!({
            "tag": "CList",
            "subtype": encode_type(element_type),
            "value": items.iter().map(encode_value).collect::<Vec<_>>(),
        }),
        CValue::Map {
            entries,
            key_type,
            value_type,
        } => json!({
            "tag": "CMap",
            "keysType": encode_type(key_type),
            "valuesType": encode_type(value_type),
            "value": entries
                .iter()
                .map(|(k, v)| json!([encode_value(k), encode_value(v)]))
                .collect::<Vec<_>>(),
        }),
        CValue::Product { fields, structure } => json!({
            "tag": "CProduct",
            "structure": encode_structure(structure),
            "value": Json::Object(
                fields
                    .iter()
                    .map(|(name, v)| (name.clone(), encode_value(v)))
                    .collect(),
            ),
        }),
        CValue::Union {
            inner,
            variants,
            union_tag,
        } => json!({
            "tag": "CUnion",
            "structure": encode_structure(variants),
            "unionTag": union_tag,
            "value": encode_value(inner),
        }),
        CValue::Some { inner, inner_type } => json!({
            "tag": "CSome",
            "innerType": encode_type(inner_type),
            "value": encode_value(inner),
        }),
        CValue::None { inner_type } => json!({
            "tag": "CNone",
            "innerType": encode_type(inner_type),
        }),
    }
}

/// Encode a `CValue` to a JSON string
pub fn encode_to_string(value: &CValue) -> String {
    encode_value(value).to_string()
}

/// Decode a tagged JSON value into a `CValue`
pub fn decode_value(value: &Json) -> CodecResult<CValue> {
    let obj = as_object(value)?;
    let tag = match obj.get("tag") {
        Some(Json::String(s)) => s.as_str(),
        Some(other) => {
            return Err(CodecError::KindMismatch {
                expected: "string".to_string(),
                got: json_kind(other).to_string(),
            })
        }
        None => return Err(CodecError::UnknownTag("<absent>".to_string())),
    };

    match tag {
        "CString" => match get_field(obj, "value")? {
            Json::String(s) => Ok(CValue::String(s.clone())),
            other => Err(CodecError::KindMismatch {
                expected: "String".to_string(),
                got: json_kind(other).to_string(),
            }),
        },
        "CInt" => match get_field(obj, "value")? {
            Json::Number(n) => n
                .as_i64()
                .map(CValue::Int)
                .ok_or_else(|| CodecError::Message(format!("number {n} is not a 64-bit int"))),
            other => Err(CodecError::KindMismatch {
                expected: "Int".to_string(),
                got: json_kind(other).to_string(),
            }),
        },
        "CFloat" => Ok(CValue::Float(decode_float(get_field(obj, "value")?)?)),
        "CBoolean" => match get_field(obj, "value")? {
            Json::Bool(b) => Ok(CValue::Boolean(*b)),
            other => Err(CodecError::KindMismatch {
                expected: "Boolean".to_string(),
                got: json_kind(other).to_string(),
            }),
        },
        "CList" => {
            let element_type = decode_type(get_field(obj, "subtype")?)?;
            let payload = get_field(obj, "value")?;
            let raw_items = payload.as_array().ok_or_else(|| CodecError::KindMismatch {
                expected: "array".to_string(),
                got: json_kind(payload).to_string(),
            })?;
            let items = raw_items
                .iter()
                .map(decode_value)
                .collect::<CodecResult<Vec<_>>>()?;
            CValue::list(element_type, items).map_err(CodecError::from)
        }
        "CMap" => {
            let key_type = decode_type(get_field(obj, "keysType")?)?;
            let value_type = decode_type(get_field(obj, "valuesType")?)?;
            let payload = get_field(obj, "value")?;
            let entries = decode_map_entries(payload, &key_type)?;
            CValue::map(key_type, value_type, entries).map_err(CodecError::from)
        }
        "CProduct" => {
            let structure = decode_structure(get_field(obj, "structure")?)?;
            let payload = as_object(get_field(obj, "value")?)?;
            let fields = payload
                .iter()
                .map(|(name, v)| Ok((name.clone(), decode_value(v)?)))
                .collect::<CodecResult<BTreeMap<_, _>>>()?;
            CValue::product(structure, fields).map_err(CodecError::from)
        }
        "CUnion" => {
            let variants = decode_structure(get_field(obj, "structure")?)?;
            let union_tag = get_field(obj, "unionTag")?
                .as_str()
                .ok_or_else(|| CodecError::MissingField("unionTag".to_string()))?;
            if !variants.contains_key(union_tag) {
                return Err(CodecError::Message(format!(
                    "unionTag '{union_tag}' is not a variant of the union structure"
                )));
            }
            let inner = decode_value(get_field(obj, "value")?)?;
            CValue::union(variants, union_tag, inner).map_err(CodecError::from)
        }
        "CSome" => {
            let inner_type = decode_type(get_field(obj, "innerType")?)?;
            let inner = decode_value(get_field(obj, "value")?)?;
            let actual = inner.ctype();
            if actual != inner_type {
                return Err(CodecError::TypeMismatch {
                    expected: inner_type,
                    actual,
                });
            }
            Ok(CValue::some(inner))
        }
        "CNone" => Ok(CValue::none(decode_type(get_field(obj, "innerType")?)?)),
        other => Err(CodecError::UnknownTag(other.to_string())),
    }
}

fn decode_map_entries(payload: &Json, key_type: &CType) -> CodecResult<Vec<(CValue, CValue)>> {
    match payload {
        Json::Array(pairs) => pairs
            .iter()
            .map(|pair| {
                let pair = pair.as_array().filter(|p| p.len() == 2).ok_or_else(|| {
                    CodecError::Message("map entry is not a two-element array".to_string())
                })?;
                Ok((decode_value(&pair[0])?, decode_value(&pair[1])?))
            })
            .collect(),
        // Object form only valid for string keys.
        Json::Object(entries) if *key_type == CType::String => entries
            .iter()
            .map(|(k, v)| Ok((CValue::String(k.clone()), decode_value(v)?)))
            .collect(),
        other => Err(CodecError::KindMismatch {
            expected: "array".to_string(),
            got: json_kind(other).to_string(),
        }),
    }
}

/// Decode a JSON string into a `CValue`
pub fn decode_from_str(s: &str) -> CodecResult<CValue> {
    let json: Json = serde_json::from_str(s)?;
    decode_value(&json)
}

// ============================================================================
// Type-directed decoding of plain (untagged) JSON
// ============================================================================

/// Decode JSON into a `CValue` of the given type. Tagged payloads go through
/// [`decode_value`] and are checked against `ty`; untagged payloads are
/// converted structurally, including the auto-detected union variant path.
pub fn decode_as(value: &Json, ty: &CType) -> CodecResult<CValue> {
    if let Json::Object(obj) = value {
        if obj.contains_key("tag") {
            let decoded = decode_value(value)?;
            let actual = decoded.ctype();
            if actual != *ty {
                return Err(CodecError::TypeMismatch {
                    expected: ty.clone(),
                    actual,
                });
            }
            return Ok(decoded);
        }
    }
    Ok(json_to_raw(value, ty)?.into_cvalue(ty)?)
}

// ============================================================================
// RawValue codec (plain JSON, type-directed, with fast paths)
// ============================================================================

fn json_array<'a>(value: &'a Json, expected: &CType) -> CodecResult<&'a Vec<Json>> {
    value.as_array().ok_or_else(|| CodecError::KindMismatch {
        expected: expected.to_string(),
        got: json_kind(value).to_string(),
    })
}

/// Convert plain JSON into a `RawValue` under `ty`.
///
/// Homogeneous primitive arrays take unboxed fast paths: a JSON array under
/// `List<Int>` always produces `RawValue::IntList`, never a generic list.
pub fn json_to_raw(value: &Json, ty: &CType) -> CodecResult<RawValue> {
    match ty {
        CType::String => value
            .as_str()
            .map(|s| RawValue::Str(s.to_string()))
            .ok_or_else(|| CodecError::KindMismatch {
                expected: "String".to_string(),
                got: json_kind(value).to_string(),
            }),
        CType::Int => value.as_i64().map(RawValue::Int).ok_or_else(|| {
            CodecError::KindMismatch {
                expected: "Int".to_string(),
                got: json_kind(value).to_string(),
            }
        }),
        CType::Float => Ok(RawValue::Float(decode_float(value)?)),
        CType::Boolean => value.as_bool().map(RawValue::Bool).ok_or_else(|| {
            CodecError::KindMismatch {
                expected: "Boolean".to_string(),
                got: json_kind(value).to_string(),
            }
        }),

        CType::List(elem) => {
            let items = json_array(value, ty)?;
            match elem.as_ref() {
                CType::Int => items
                    .iter()
                    .map(|v| {
                        v.as_i64().ok_or_else(|| CodecError::KindMismatch {
                            expected: "Int".to_string(),
                            got: json_kind(v).to_string(),
                        })
                    })
                    .collect::<CodecResult<Vec<_>>>()
                    .map(RawValue::IntList),
                CType::Float => items
                    .iter()
                    .map(decode_float)
                    .collect::<CodecResult<Vec<_>>>()
                    .map(RawValue::FloatList),
                CType::String => items
                    .iter()
                    .map(|v| {
                        v.as_str().map(ToString::to_string).ok_or_else(|| {
                            CodecError::KindMismatch {
                                expected: "String".to_string(),
                                got: json_kind(v).to_string(),
                            }
                        })
                    })
                    .collect::<CodecResult<Vec<_>>>()
                    .map(RawValue::StringList),
                CType::Boolean => items
                    .iter()
                    .map(|v| {
                        v.as_bool().ok_or_else(|| CodecError::KindMismatch {
                            expected: "Boolean".to_string(),
                            got: json_kind(v).to_string(),
                        })
                    })
                    .collect::<CodecResult<Vec<_>>>()
                    .map(RawValue::BoolList),
                other => items
                    .iter()
                    .map(|v| json_to_raw(v, other))
                    .collect::<CodecResult<Vec<_>>>()
                    .map(RawValue::List),
            }
        }

        CType::Map(kt, vt) => match value {
            Json::Array(pairs) => pairs
                .iter()
                .map(|pair| {
                    let pair = pair.as_array().filter(|p| p.len() == 2).ok_or_else(|| {
                        CodecError::Message("map entry is not a two-element array".to_string())
                    })?;
                    Ok((json_to_raw(&pair[0], kt)?, json_to_raw(&pair[1], vt)?))
                })
                .collect::<CodecResult<Vec<_>>>()
                .map(RawValue::Map),
            Json::Object(entries) if **kt == CType::String => entries
                .iter()
                .map(|(k, v)| Ok((RawValue::Str(k.clone()), json_to_raw(v, vt)?)))
                .collect::<CodecResult<Vec<_>>>()
                .map(RawValue::Map),
            other => Err(CodecError::KindMismatch {
                expected: ty.to_string(),
                got: json_kind(other).to_string(),
            }),
        },

        CType::Product(structure) => match value {
            Json::Object(fields) => {
                let mut values = Vec::with_capacity(structure.len());
                for (name, field_ty) in structure {
                    let field = fields
                        .get(name)
                        .ok_or_else(|| CodecError::MissingField(name.clone()))?;
                    values.push(json_to_raw(field, field_ty)?);
                }
                Ok(RawValue::Product(values))
            }
            // Positional form, as produced by raw_to_json.
            Json::Array(items) => {
                if items.len() != structure.len() {
                    return Err(CodecError::Message(format!(
                        "product arity mismatch: expected {} fields, got {}",
                        structure.len(),
                        items.len()
                    )));
                }
                structure
                    .values()
                    .zip(items)
                    .map(|(field_ty, item)| json_to_raw(item, field_ty))
                    .collect::<CodecResult<Vec<_>>>()
                    .map(RawValue::Product)
            }
            other => Err(CodecError::KindMismatch {
                expected: ty.to_string(),
                got: json_kind(other).to_string(),
            }),
        },

        CType::Union(variants) => {
            let obj = as_object(value)?;
            if let Some(tag) = obj.get("unionTag").and_then(Json::as_str) {
                let inner_ty = variants.get(tag).ok_or_else(|| {
                    CodecError::Message(format!("unknown union tag '{tag}'"))
                })?;
                let inner = json_to_raw(get_field(obj, "value")?, inner_ty)?;
                return Ok(RawValue::Union {
                    tag: tag.to_string(),
                    inner: Box::new(inner),
                });
            }
            detect_union_variant(obj, variants)
        }

        CType::Optional(inner) => match value {
            Json::Null => Ok(RawValue::None),
            other => Ok(RawValue::Some(Box::new(json_to_raw(other, inner)?))),
        },
    }
}

/// Auto-detect the union variant of an untagged JSON object. Only unions
/// whose variants are all products participate; candidates are variants
/// whose field names are a subset of the object's keys, tried in tag order.
fn detect_union_variant(
    obj: &Map<String, Json>,
    variants: &BTreeMap<String, CType>,
) -> CodecResult<RawValue> {
    let all_products = variants
        .values()
        .all(|ty| matches!(ty, CType::Product(_)));
    if all_products {
        for (tag, variant_ty) in variants {
            let CType::Product(structure) = variant_ty else {
                continue;
            };
            if !structure.keys().all(|name| obj.contains_key(name)) {
                continue;
            }
            if let Ok(inner) = json_to_raw(&Json::Object(obj.clone()), variant_ty) {
                return Ok(RawValue::Union {
                    tag: tag.clone(),
                    inner: Box::new(inner),
                });
            }
        }
    }
    Err(CodecError::Message(
        "could not match fields to any union variant".to_string(),
    ))
}

/// Encode a `RawValue` as plain (untagged) JSON.
pub fn raw_to_json(value: &RawValue) -> Json {
    match value {
        RawValue::Int(i) => json!(i),
        RawValue::Float(x) => encode_float(*x),
        RawValue::Str(s) => json!(s),
        RawValue::Bool(b) => json!(b),
        RawValue::IntList(xs) => json!(xs),
        RawValue::FloatList(xs) => Json::Array(xs.iter().map(|x| encode_float(*x)).collect()),
        RawValue::StringList(xs) => json!(xs),
        RawValue::BoolList(xs) => json!(xs),
        RawValue::List(items) => Json::Array(items.iter().map(raw_to_json).collect()),
        RawValue::Map(pairs) => Json::Array(
            pairs
                .iter()
                .map(|(k, v)| json!([raw_to_json(k), raw_to_json(v)]))
                .collect(),
        ),
        RawValue::Product(values) => Json::Array(values.iter().map(raw_to_json).collect()),
        RawValue::Union { tag, inner } => json!({
            "unionTag": tag,
            "value": raw_to_json(inner),
        }),
        RawValue::Some(inner) => raw_to_json(inner),
        RawValue::None => Json::Null,
    }
}
