//! Lazy conversion wrappers over JSON payloads.
//!
//! Large module outputs arrive as JSON; converting them eagerly is wasted
//! work when a downstream consumer touches one field or one element. These
//! wrappers hold the raw JSON plus the target type and materialize pieces on
//! demand, caching each converted piece. `materialized_count` exposes how
//! many conversions actually ran, which the test suite observes.
//!
//! `materialize` is idempotent: the first call converts whatever is still
//! raw, later calls return the cached eager value.

use super::codec::{decode_as, CodecError, CodecResult};
use super::{CType, CValue};
use parking_lot::Mutex;
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A single JSON payload converted at most once.
pub struct LazyJsonValue {
    json: Json,
    ctype: CType,
    cache: Mutex<Option<CValue>>,
    materialized: AtomicUsize,
}

impl LazyJsonValue {
    /// Wrap a JSON payload expected to convert under `ctype`
    pub fn new(json: Json, ctype: CType) -> Self {
        LazyJsonValue {
            json,
            ctype,
            cache: Mutex::new(None),
            materialized: AtomicUsize::new(0),
        }
    }

    /// Convert (or fetch the cached conversion of) the payload
    pub fn materialize(&self) -> CodecResult<CValue> {
        let mut cache = self.cache.lock();
        if let Some(value) = cache.as_ref() {
            return Ok(value.clone());
        }
        let value = decode_as(&self.json, &self.ctype)?;
        self.materialized.fetch_add(1, Ordering::Relaxed);
        *cache = Some(value.clone());
        Ok(value)
    }

    /// Number of conversions performed so far (0 or 1)
    pub fn materialized_count(&self) -> usize {
        self.materialized.load(Ordering::Relaxed)
    }
}

/// A JSON array converted element-by-element under a list type.
pub struct LazyListValue {
    element_type: CType,
    raw: Vec<Json>,
    cache: Mutex<Vec<Option<CValue>>>,
    materialized: AtomicUsize,
}

impl LazyListValue {
    /// Wrap a JSON array whose elements convert under `element_type`.
    /// Fails if the payload is not an array.
    pub fn new(json: Json, element_type: CType) -> CodecResult<Self> {
        let Json::Array(raw) = json else {
            return Err(CodecError::KindMismatch {
                expected: "array".to_string(),
                got: kind_of(&json).to_string(),
            });
        };
        let len = raw.len();
        Ok(LazyListValue {
            element_type,
            raw,
            cache: Mutex::new(vec![None; len]),
            materialized: AtomicUsize::new(0),
        })
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// True when the list is empty
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Materialize and cache only element `index`
    pub fn get(&self, index: usize) -> CodecResult<CValue> {
        let raw = self.raw.get(index).ok_or_else(|| {
            CodecError::Message(format!(
                "index {index} out of bounds for lazy list of length {}",
                self.raw.len()
            ))
        })?;
        let mut cache = self.cache.lock();
        if let Some(value) = &cache[index] {
            return Ok(value.clone());
        }
        let value = decode_as(raw, &self.element_type)?;
        self.materialized.fetch_add(1, Ordering::Relaxed);
        cache[index] = Some(value.clone());
        Ok(value)
    }

    /// Number of elements converted so far
    pub fn materialized_count(&self) -> usize {
        self.materialized.load(Ordering::Relaxed)
    }

    /// Convert every remaining element and return the eager list
    pub fn materialize(&self) -> CodecResult<CValue> {
        let mut items = Vec::with_capacity(self.raw.len());
        for index in 0..self.raw.len() {
            items.push(self.get(index)?);
        }
        CValue::list(self.element_type.clone(), items).map_err(CodecError::from)
    }
}

/// A JSON object converted field-by-field under a product structure.
pub struct LazyProductValue {
    structure: BTreeMap<String, CType>,
    raw: Map<String, Json>,
    cache: Mutex<BTreeMap<String, CValue>>,
    materialized: AtomicUsize,
}

impl LazyProductValue {
    /// Wrap a JSON object whose fields convert under `structure`.
    /// Fails if the payload is not an object or a declared field is absent.
    pub fn new(json: Json, structure: BTreeMap<String, CType>) -> CodecResult<Self> {
        let Json::Object(raw) = json else {
            return Err(CodecError::KindMismatch {
                expected: "object".to_string(),
                got: kind_of(&json).to_string(),
            });
        };
        for name in structure.keys() {
            if !raw.contains_key(name) {
                return Err(CodecError::MissingField(name.clone()));
            }
        }
        Ok(LazyProductValue {
            structure,
            raw,
            cache: Mutex::new(BTreeMap::new()),
            materialized: AtomicUsize::new(0),
        })
    }

    /// Materialize and cache only the named field
    pub fn get_field(&self, name: &str) -> CodecResult<CValue> {
        let field_ty = self.structure.get(name).ok_or_else(|| {
            CodecError::Message(format!("field '{name}' not declared in product structure"))
        })?;
        let mut cache = self.cache.lock();
        if let Some(value) = cache.get(name) {
            return Ok(value.clone());
        }
        let raw = self
            .raw
            .get(name)
            .ok_or_else(|| CodecError::MissingField(name.to_string()))?;
        let value = decode_as(raw, field_ty)?;
        self.materialized.fetch_add(1, Ordering::Relaxed);
        cache.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Number of fields converted so far
    pub fn materialized_count(&self) -> usize {
        self.materialized.load(Ordering::Relaxed)
    }

    /// Convert every remaining field and return the eager product
    pub fn materialize(&self) -> CodecResult<CValue> {
        let mut fields = BTreeMap::new();
        for name in self.structure.keys() {
            fields.insert(name.clone(), self.get_field(name)?);
        }
        CValue::product(self.structure.clone(), fields).map_err(CodecError::from)
    }
}

fn kind_of(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
