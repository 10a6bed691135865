//! Specialized unboxed value representation for the inline-transform
//! evaluator.
//!
//! `RawValue` mirrors `CValue` but strips the per-value type annotations and
//! unboxes homogeneous primitive lists into flat arrays. Conversion back to
//! `CValue` therefore requires the target `CType`.
//!
//! Invariant: `RawValue::Product` stores field values in ascending
//! field-name order of the product's type structure. Index *i* is the value
//! for the *i*-th sorted field name.

use super::codec::{CodecError, CodecResult};
use super::{CType, CValue};
use std::collections::BTreeMap;

/// Unboxed value used inside the transform evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    /// Unboxed `List<Int>`
    IntList(Vec<i64>),
    /// Unboxed `List<Float>`
    FloatList(Vec<f64>),
    /// Unboxed `List<String>`
    StringList(Vec<String>),
    /// Unboxed `List<Boolean>`
    BoolList(Vec<bool>),
    /// Generic list for non-primitive element types
    List(Vec<RawValue>),
    /// Key/value pair array
    Map(Vec<(RawValue, RawValue)>),
    /// Field values in sorted-field-name order
    Product(Vec<RawValue>),
    Union {
        tag: String,
        inner: Box<RawValue>,
    },
    Some(Box<RawValue>),
    None,
}

fn int_items(items: &[CValue]) -> Option<Vec<i64>> {
    items.iter().map(CValue::as_int).collect()
}

fn float_items(items: &[CValue]) -> Option<Vec<f64>> {
    items.iter().map(CValue::as_float).collect()
}

fn string_items(items: &[CValue]) -> Option<Vec<String>> {
    items
        .iter()
        .map(|v| v.as_str().map(ToString::to_string))
        .collect()
}

fn bool_items(items: &[CValue]) -> Option<Vec<bool>> {
    items.iter().map(CValue::as_bool).collect()
}

impl RawValue {
    /// Kind name used in conversion error messages
    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Int(_) => "Int",
            RawValue::Float(_) => "Float",
            RawValue::Str(_) => "String",
            RawValue::Bool(_) => "Boolean",
            RawValue::IntList(_)
            | RawValue::FloatList(_)
            | RawValue::StringList(_)
            | RawValue::BoolList(_)
            | RawValue::List(_) => "List",
            RawValue::Map(_) => "Map",
            RawValue::Product(_) => "Product",
            RawValue::Union { .. } => "Union",
            RawValue::Some(_) => "Some",
            RawValue::None => "None",
        }
    }

    /// Lower a `CValue` into its raw form, selecting unboxed list variants
    /// for homogeneous primitive lists.
    pub fn from_cvalue(value: &CValue) -> RawValue {
        match value {
            CValue::String(s) => RawValue::Str(s.clone()),
            CValue::Int(i) => RawValue::Int(*i),
            CValue::Float(x) => RawValue::Float(*x),
            CValue::Boolean(b) => RawValue::Bool(*b),
            CValue::List {
                items,
                element_type,
            } => Self::from_list(items, element_type),
            CValue::Map { entries, .. } => RawValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (Self::from_cvalue(k), Self::from_cvalue(v)))
                    .collect(),
            ),
            // BTreeMap iteration is ascending by field name, which is
            // exactly the Product ordering invariant.
            CValue::Product { fields, .. } => {
                RawValue::Product(fields.values().map(Self::from_cvalue).collect())
            }
            CValue::Union {
                inner, union_tag, ..
            } => RawValue::Union {
                tag: union_tag.clone(),
                inner: Box::new(Self::from_cvalue(inner)),
            },
            CValue::Some { inner, .. } => RawValue::Some(Box::new(Self::from_cvalue(inner))),
            CValue::None { .. } => RawValue::None,
        }
    }

    fn from_list(items: &[CValue], element_type: &CType) -> RawValue {
        let specialized = match element_type {
            CType::Int => int_items(items).map(RawValue::IntList),
            CType::Float => float_items(items).map(RawValue::FloatList),
            CType::String => string_items(items).map(RawValue::StringList),
            CType::Boolean => bool_items(items).map(RawValue::BoolList),
            _ => None,
        };
        specialized
            .unwrap_or_else(|| RawValue::List(items.iter().map(Self::from_cvalue).collect()))
    }

    /// Raise this raw value back to a typed `CValue` under `ty`.
    pub fn into_cvalue(self, ty: &CType) -> CodecResult<CValue> {
        match (self, ty) {
            (RawValue::Str(s), CType::String) => Ok(CValue::String(s)),
            (RawValue::Int(i), CType::Int) => Ok(CValue::Int(i)),
            (RawValue::Float(x), CType::Float) => Ok(CValue::Float(x)),
            (RawValue::Bool(b), CType::Boolean) => Ok(CValue::Boolean(b)),

            (RawValue::IntList(xs), CType::List(elem)) if **elem == CType::Int => {
                Ok(CValue::List {
                    items: xs.into_iter().map(CValue::Int).collect(),
                    element_type: CType::Int,
                })
            }
            (RawValue::FloatList(xs), CType::List(elem)) if **elem == CType::Float => {
                Ok(CValue::List {
                    items: xs.into_iter().map(CValue::Float).collect(),
                    element_type: CType::Float,
                })
            }
            (RawValue::StringList(xs), CType::List(elem)) if **elem == CType::String => {
                Ok(CValue::List {
                    items: xs.into_iter().map(CValue::String).collect(),
                    element_type: CType::String,
                })
            }
            (RawValue::BoolList(xs), CType::List(elem)) if **elem == CType::Boolean => {
                Ok(CValue::List {
                    items: xs.into_iter().map(CValue::Boolean).collect(),
                    element_type: CType::Boolean,
                })
            }
            (RawValue::List(items), CType::List(elem)) => Ok(CValue::List {
                items: items
                    .into_iter()
                    .map(|item| item.into_cvalue(elem))
                    .collect::<CodecResult<Vec<_>>>()?,
                element_type: (**elem).clone(),
            }),

            (RawValue::Map(pairs), CType::Map(kt, vt)) => Ok(CValue::Map {
                entries: pairs
                    .into_iter()
                    .map(|(k, v)| Ok((k.into_cvalue(kt)?, v.into_cvalue(vt)?)))
                    .collect::<CodecResult<Vec<_>>>()?,
                key_type: (**kt).clone(),
                value_type: (**vt).clone(),
            }),

            (RawValue::Product(values), CType::Product(structure)) => {
                if values.len() != structure.len() {
                    return Err(CodecError::Message(format!(
                        "product arity mismatch: expected {} fields, got {}",
                        structure.len(),
                        values.len()
                    )));
                }
                let mut fields = BTreeMap::new();
                for ((name, field_ty), value) in structure.iter().zip(values) {
                    fields.insert(name.clone(), value.into_cvalue(field_ty)?);
                }
                Ok(CValue::Product {
                    fields,
                    structure: structure.clone(),
                })
            }

            (RawValue::Union { tag, inner }, CType::Union(variants)) => {
                let Some(inner_ty) = variants.get(&tag) else {
                    return Err(CodecError::Message(format!(
                        "unknown union tag '{tag}'"
                    )));
                };
                let inner = inner.into_cvalue(inner_ty)?;
                CValue::union(variants.clone(), tag, inner).map_err(CodecError::from)
            }

            (RawValue::Some(inner), CType::Optional(inner_ty)) => {
                Ok(CValue::some(inner.into_cvalue(inner_ty)?))
            }
            (RawValue::None, CType::Optional(inner_ty)) => {
                Ok(CValue::none((**inner_ty).clone()))
            }

            (raw, ty) => Err(CodecError::KindMismatch {
                expected: ty.to_string(),
                got: raw.kind().to_string(),
            }),
        }
    }

    /// Materialize list contents as generic raw elements, regardless of the
    /// stored specialization.
    pub fn list_items(&self) -> Option<Vec<RawValue>> {
        match self {
            RawValue::IntList(xs) => Some(xs.iter().copied().map(RawValue::Int).collect()),
            RawValue::FloatList(xs) => Some(xs.iter().copied().map(RawValue::Float).collect()),
            RawValue::StringList(xs) => {
                Some(xs.iter().cloned().map(RawValue::Str).collect())
            }
            RawValue::BoolList(xs) => Some(xs.iter().copied().map(RawValue::Bool).collect()),
            RawValue::List(items) => Some(items.clone()),
            _ => None,
        }
    }

    /// Repack generic list elements, restoring a specialization when every
    /// element is the same primitive kind.
    pub fn repack_list(items: Vec<RawValue>) -> RawValue {
        if !items.is_empty() {
            if items.iter().all(|v| matches!(v, RawValue::Int(_))) {
                return RawValue::IntList(
                    items
                        .into_iter()
                        .map(|v| match v {
                            RawValue::Int(i) => i,
                            _ => unreachable!(),
                        })
                        .collect(),
                );
            }
            if items.iter().all(|v| matches!(v, RawValue::Bool(_))) {
                return RawValue::BoolList(
                    items
                        .into_iter()
                        .map(|v| match v {
                            RawValue::Bool(b) => b,
                            _ => unreachable!(),
                        })
                        .collect(),
                );
            }
            if items.iter().all(|v| matches!(v, RawValue::Float(_))) {
                return RawValue::FloatList(
                    items
                        .into_iter()
                        .map(|v| match v {
                            RawValue::Float(x) => x,
                            _ => unreachable!(),
                        })
                        .collect(),
                );
            }
            if items.iter().all(|v| matches!(v, RawValue::Str(_))) {
                return RawValue::StringList(
                    items
                        .into_iter()
                        .map(|v| match v {
                            RawValue::Str(s) => s,
                            _ => unreachable!(),
                        })
                        .collect(),
                );
            }
        }
        RawValue::List(items)
    }

    /// Borrow the boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RawValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow the string payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_list_specializes() {
        let list = CValue::list(CType::Int, vec![CValue::int(1), CValue::int(2)]).unwrap();
        assert_eq!(RawValue::from_cvalue(&list), RawValue::IntList(vec![1, 2]));
    }

    #[test]
    fn test_nested_list_stays_generic() {
        let inner = CValue::list(CType::Int, vec![CValue::int(1)]).unwrap();
        let list = CValue::list(CType::list(CType::Int), vec![inner]).unwrap();
        match RawValue::from_cvalue(&list) {
            RawValue::List(items) => assert_eq!(items, vec![RawValue::IntList(vec![1])]),
            other => panic!("expected generic list, got {other:?}"),
        }
    }

    #[test]
    fn test_product_is_sorted_field_order() {
        let structure = CType::product([("b", CType::String), ("a", CType::Int)]);
        let CType::Product(structure) = structure else {
            unreachable!()
        };
        let mut fields = BTreeMap::new();
        fields.insert("b".to_string(), CValue::str("bee"));
        fields.insert("a".to_string(), CValue::int(1));
        let product = CValue::product(structure, fields).unwrap();

        // "a" sorts before "b"
        assert_eq!(
            RawValue::from_cvalue(&product),
            RawValue::Product(vec![RawValue::Int(1), RawValue::Str("bee".to_string())])
        );
    }

    #[test]
    fn test_round_trip_through_raw() {
        let mut variants = BTreeMap::new();
        variants.insert("num".to_string(), CType::Int);
        variants.insert("txt".to_string(), CType::String);
        let value = CValue::union(variants, "txt", CValue::str("hello")).unwrap();

        let ty = value.ctype();
        let raw = RawValue::from_cvalue(&value);
        assert_eq!(raw.into_cvalue(&ty).unwrap(), value);
    }

    #[test]
    fn test_into_cvalue_rejects_kind_mismatch() {
        let err = RawValue::Int(3).into_cvalue(&CType::String).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("expected String"), "{msg}");
        assert!(msg.contains("got Int"), "{msg}");
    }

    #[test]
    fn test_repack_restores_specialization() {
        let repacked = RawValue::repack_list(vec![RawValue::Int(1), RawValue::Int(2)]);
        assert_eq!(repacked, RawValue::IntList(vec![1, 2]));

        let mixed = RawValue::repack_list(vec![RawValue::Int(1), RawValue::Str("x".into())]);
        assert!(matches!(mixed, RawValue::List(_)));
    }
}
