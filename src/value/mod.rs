//! # Typed Value Model
//!
//! Core type and value sums for pipeline data: `CType` describes the shape
//! of a data node, `CValue` is a value carrying its full type information.
//! Every `CValue` satisfies the invariant that its runtime structure matches
//! its declared inner type(s); constructors validate and the JSON codec
//! refuses to decode violations.
//!
//! ## Usage
//!
//! ```rust
//! use constellation::value::{CType, CValue};
//!
//! let scores = CValue::list(
//!     CType::Int,
//!     vec![CValue::int(3), CValue::int(7)],
//! ).unwrap();
//!
//! assert_eq!(scores.ctype(), CType::List(Box::new(CType::Int)));
//! ```
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `codec` | Tagged JSON encoding/decoding |
//! | `raw` | Specialized unboxed representation for the evaluator |
//! | `lazy` | Deferred JSON conversion wrappers |
//! | `preview` | Human-readable value previews |

pub mod codec;
pub mod lazy;
pub mod preview;
pub mod raw;

pub use codec::{CodecError, CodecResult};
pub use lazy::{LazyJsonValue, LazyListValue, LazyProductValue};
pub use preview::value_preview;
pub use raw::RawValue;

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised by value constructors when the requested value would
/// violate the type invariant.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    /// Value's type disagrees with the declared type
    #[error("type mismatch: expected {expected}, found {actual}")]
    TypeMismatch { expected: CType, actual: CType },

    /// Union tag is not a key of the variant map
    #[error("unknown union tag '{tag}'")]
    UnknownUnionTag { tag: String },

    /// Product field not declared in the structure
    #[error("field '{field}' not declared in product structure")]
    UnknownField { field: String },

    /// Product structure declares a field the value does not carry
    #[error("missing value for product field '{field}'")]
    MissingField { field: String },
}

/// Result type for value construction
pub type ValueResult<T> = Result<T, ValueError>;

/// The type of a data node: a structural, transitively-comparable sum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CType {
    /// UTF-8 string
    String,
    /// 64-bit signed integer
    Int,
    /// 64-bit IEEE 754 float
    Float,
    /// Boolean
    Boolean,
    /// Homogeneous ordered sequence
    List(Box<CType>),
    /// Ordered key/value entries
    Map(Box<CType>, Box<CType>),
    /// Unordered named field set
    Product(BTreeMap<String, CType>),
    /// Tagged alternative set
    Union(BTreeMap<String, CType>),
    /// Present-or-absent wrapper
    Optional(Box<CType>),
}

impl CType {
    /// Build a product type from field pairs
    pub fn product<I, S>(fields: I) -> CType
    where
        I: IntoIterator<Item = (S, CType)>,
        S: Into<String>,
    {
        CType::Product(fields.into_iter().map(|(n, t)| (n.into(), t)).collect())
    }

    /// Build a union type from variant pairs
    pub fn union<I, S>(variants: I) -> CType
    where
        I: IntoIterator<Item = (S, CType)>,
        S: Into<String>,
    {
        CType::Union(variants.into_iter().map(|(n, t)| (n.into(), t)).collect())
    }

    /// Build a list type
    pub fn list(element: CType) -> CType {
        CType::List(Box::new(element))
    }

    /// Build a map type
    pub fn map(key: CType, value: CType) -> CType {
        CType::Map(Box::new(key), Box::new(value))
    }

    /// Build an optional type
    pub fn optional(inner: CType) -> CType {
        CType::Optional(Box::new(inner))
    }

    /// Codec tag for this type ("CString", "CList", ...)
    pub fn tag(&self) -> &'static str {
        match self {
            CType::String => "CString",
            CType::Int => "CInt",
            CType::Float => "CFloat",
            CType::Boolean => "CBoolean",
            CType::List(_) => "CList",
            CType::Map(_, _) => "CMap",
            CType::Product(_) => "CProduct",
            CType::Union(_) => "CUnion",
            CType::Optional(_) => "COptional",
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CType::String => write!(f, "String"),
            CType::Int => write!(f, "Int"),
            CType::Float => write!(f, "Float"),
            CType::Boolean => write!(f, "Boolean"),
            CType::List(elem) => write!(f, "List<{elem}>"),
            CType::Map(k, v) => write!(f, "Map<{k}, {v}>"),
            CType::Product(fields) => {
                write!(f, "{{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                write!(f, "}}")
            }
            CType::Union(variants) => {
                write!(f, "Union<")?;
                for (i, (tag, ty)) in variants.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{tag}: {ty}")?;
                }
                write!(f, ">")
            }
            CType::Optional(inner) => write!(f, "Optional<{inner}>"),
        }
    }
}

/// A typed value. Parallel to [`CType`]; every variant carries enough type
/// information to reconstruct its exact `CType` without context.
#[derive(Debug, Clone, PartialEq)]
pub enum CValue {
    /// String value
    String(String),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit IEEE 754 float
    Float(f64),
    /// Boolean
    Boolean(bool),
    /// Ordered sequence; element order is significant
    List {
        items: Vec<CValue>,
        element_type: CType,
    },
    /// Ordered entries; duplicate keys are permitted syntactically
    Map {
        entries: Vec<(CValue, CValue)>,
        key_type: CType,
        value_type: CType,
    },
    /// Named field set
    Product {
        fields: BTreeMap<String, CValue>,
        structure: BTreeMap<String, CType>,
    },
    /// Tagged alternative; `union_tag` is a key of `variants` and `inner`
    /// matches `variants[union_tag]`
    Union {
        inner: Box<CValue>,
        variants: BTreeMap<String, CType>,
        union_tag: String,
    },
    /// Present optional
    Some {
        inner: Box<CValue>,
        inner_type: CType,
    },
    /// Absent optional; carries its inner type explicitly
    None { inner_type: CType },
}

impl CValue {
    /// String constructor
    pub fn str(s: impl Into<String>) -> CValue {
        CValue::String(s.into())
    }

    /// Integer constructor
    pub fn int(i: i64) -> CValue {
        CValue::Int(i)
    }

    /// Float constructor
    pub fn float(x: f64) -> CValue {
        CValue::Float(x)
    }

    /// Boolean constructor
    pub fn boolean(b: bool) -> CValue {
        CValue::Boolean(b)
    }

    /// List constructor; every item must have exactly `element_type`
    pub fn list(element_type: CType, items: Vec<CValue>) -> ValueResult<CValue> {
        for item in &items {
            let actual = item.ctype();
            if actual != element_type {
                return Err(ValueError::TypeMismatch {
                    expected: element_type,
                    actual,
                });
            }
        }
        Ok(CValue::List {
            items,
            element_type,
        })
    }

    /// Map constructor; keys and values are checked against the entry types
    pub fn map(
        key_type: CType,
        value_type: CType,
        entries: Vec<(CValue, CValue)>,
    ) -> ValueResult<CValue> {
        for (k, v) in &entries {
            if k.ctype() != key_type {
                return Err(ValueError::TypeMismatch {
                    expected: key_type,
                    actual: k.ctype(),
                });
            }
            if v.ctype() != value_type {
                return Err(ValueError::TypeMismatch {
                    expected: value_type,
                    actual: v.ctype(),
                });
            }
        }
        Ok(CValue::Map {
            entries,
            key_type,
            value_type,
        })
    }

    /// Product constructor; fields must cover the structure exactly
    pub fn product(
        structure: BTreeMap<String, CType>,
        fields: BTreeMap<String, CValue>,
    ) -> ValueResult<CValue> {
        for name in fields.keys() {
            if !structure.contains_key(name) {
                return Err(ValueError::UnknownField {
                    field: name.clone(),
                });
            }
        }
        for (name, ty) in &structure {
            match fields.get(name) {
                None => {
                    return Err(ValueError::MissingField {
                        field: name.clone(),
                    })
                }
                Some(value) => {
                    let actual = value.ctype();
                    if actual != *ty {
                        return Err(ValueError::TypeMismatch {
                            expected: ty.clone(),
                            actual,
                        });
                    }
                }
            }
        }
        Ok(CValue::Product { fields, structure })
    }

    /// Union constructor; `tag` must name a variant and `inner` must match it
    pub fn union(
        variants: BTreeMap<String, CType>,
        tag: impl Into<String>,
        inner: CValue,
    ) -> ValueResult<CValue> {
        let tag = tag.into();
        let Some(expected) = variants.get(&tag) else {
            return Err(ValueError::UnknownUnionTag { tag });
        };
        let actual = inner.ctype();
        if actual != *expected {
            return Err(ValueError::TypeMismatch {
                expected: expected.clone(),
                actual,
            });
        }
        Ok(CValue::Union {
            inner: Box::new(inner),
            variants,
            union_tag: tag,
        })
    }

    /// Present-optional constructor; the inner type is derived from `inner`
    pub fn some(inner: CValue) -> CValue {
        let inner_type = inner.ctype();
        CValue::Some {
            inner: Box::new(inner),
            inner_type,
        }
    }

    /// Absent-optional constructor
    pub fn none(inner_type: CType) -> CValue {
        CValue::None { inner_type }
    }

    /// Derive the exact `CType` of this value
    pub fn ctype(&self) -> CType {
        match self {
            CValue::String(_) => CType::String,
            CValue::Int(_) => CType::Int,
            CValue::Float(_) => CType::Float,
            CValue::Boolean(_) => CType::Boolean,
            CValue::List { element_type, .. } => CType::List(Box::new(element_type.clone())),
            CValue::Map {
                key_type,
                value_type,
                ..
            } => CType::Map(Box::new(key_type.clone()), Box::new(value_type.clone())),
            CValue::Product { structure, .. } => CType::Product(structure.clone()),
            CValue::Union { variants, .. } => CType::Union(variants.clone()),
            CValue::Some { inner_type, .. } | CValue::None { inner_type } => {
                CType::Optional(Box::new(inner_type.clone()))
            }
        }
    }

    /// Borrow the string payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Copy out the integer payload, if this is an int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Copy out the float payload, if this is a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            CValue::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Copy out the boolean payload, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Look up a product field by name
    pub fn field(&self, name: &str) -> Option<&CValue> {
        match self {
            CValue::Product { fields, .. } => fields.get(name),
            _ => None,
        }
    }

    /// True for the absent-optional variant
    pub fn is_none(&self) -> bool {
        matches!(self, CValue::None { .. })
    }
}
