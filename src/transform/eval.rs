//! Pure evaluation of inline transforms over `RawValue` environments.
//!
//! Inputs arrive keyed by the per-operator contract names (`operand`,
//! `left`/`right`, `cond`/`thenBr`/`elseBr`, `source`, `elemN`, `exprN`).
//! The evaluator never touches the data table; the scheduler resolves
//! `transform_inputs` to raw values first.

use super::{InlineTransform, TransformError, TransformResult};
use crate::value::preview::stringify_raw;
use crate::value::{CType, RawValue};
use std::collections::BTreeMap;
use std::collections::HashMap;

fn fetch<'a>(
    inputs: &'a HashMap<String, RawValue>,
    transform: &InlineTransform,
    name: &str,
) -> TransformResult<&'a RawValue> {
    inputs.get(name).ok_or_else(|| TransformError::MissingInput {
        transform: transform.transform_type().to_string(),
        name: name.to_string(),
    })
}

fn fetch_bool(
    inputs: &HashMap<String, RawValue>,
    transform: &InlineTransform,
    name: &str,
) -> TransformResult<bool> {
    let value = fetch(inputs, transform, name)?;
    value.as_bool().ok_or_else(|| TransformError::WrongInputShape {
        transform: transform.transform_type().to_string(),
        name: name.to_string(),
        expected: "Boolean".to_string(),
        got: value.kind().to_string(),
    })
}

fn fetch_list(
    inputs: &HashMap<String, RawValue>,
    transform: &InlineTransform,
    name: &str,
) -> TransformResult<Vec<RawValue>> {
    let value = fetch(inputs, transform, name)?;
    value.list_items().ok_or_else(|| TransformError::WrongInputShape {
        transform: transform.transform_type().to_string(),
        name: name.to_string(),
        expected: "List".to_string(),
        got: value.kind().to_string(),
    })
}

fn fetch_product(
    inputs: &HashMap<String, RawValue>,
    transform: &InlineTransform,
    name: &str,
) -> TransformResult<Vec<RawValue>> {
    match fetch(inputs, transform, name)? {
        RawValue::Product(values) => Ok(values.clone()),
        other => Err(TransformError::WrongInputShape {
            transform: transform.transform_type().to_string(),
            name: name.to_string(),
            expected: "Product".to_string(),
            got: other.kind().to_string(),
        }),
    }
}

fn sorted_field_names(transform: &InlineTransform, ty: &CType) -> TransformResult<Vec<String>> {
    match ty {
        // BTreeMap keys are already ascending
        CType::Product(structure) => Ok(structure.keys().cloned().collect()),
        other => Err(TransformError::Failed {
            transform: transform.transform_type().to_string(),
            message: format!("expected a product type, found {other}"),
        }),
    }
}

/// Evaluate `transform` against its resolved inputs.
pub fn evaluate(
    transform: &InlineTransform,
    inputs: &HashMap<String, RawValue>,
) -> TransformResult<RawValue> {
    match transform {
        InlineTransform::Literal(value) => Ok(RawValue::from_cvalue(value)),

        InlineTransform::Not => {
            Ok(RawValue::Bool(!fetch_bool(inputs, transform, "operand")?))
        }
        InlineTransform::And => Ok(RawValue::Bool(
            fetch_bool(inputs, transform, "left")? && fetch_bool(inputs, transform, "right")?,
        )),
        InlineTransform::Or => Ok(RawValue::Bool(
            fetch_bool(inputs, transform, "left")? || fetch_bool(inputs, transform, "right")?,
        )),

        InlineTransform::Conditional => {
            if fetch_bool(inputs, transform, "cond")? {
                Ok(fetch(inputs, transform, "thenBr")?.clone())
            } else {
                Ok(fetch(inputs, transform, "elseBr")?.clone())
            }
        }

        InlineTransform::Guard => {
            if fetch_bool(inputs, transform, "cond")? {
                let expr = fetch(inputs, transform, "expr")?;
                Ok(RawValue::Some(Box::new(expr.clone())))
            } else {
                Ok(RawValue::None)
            }
        }

        InlineTransform::Coalesce => match fetch(inputs, transform, "left")? {
            RawValue::Some(inner) => Ok((**inner).clone()),
            RawValue::None => Ok(fetch(inputs, transform, "right")?.clone()),
            other => Err(TransformError::WrongInputShape {
                transform: transform.transform_type().to_string(),
                name: "left".to_string(),
                expected: "Optional".to_string(),
                got: other.kind().to_string(),
            }),
        },

        InlineTransform::FieldAccess { field, source_type } => {
            let values = fetch_product(inputs, transform, "source")?;
            let names = sorted_field_names(transform, source_type)?;
            let index = names.iter().position(|name| name == field).ok_or_else(|| {
                TransformError::Failed {
                    transform: transform.transform_type().to_string(),
                    message: format!("field '{field}' not present in source type"),
                }
            })?;
            values.get(index).cloned().ok_or_else(|| TransformError::Failed {
                transform: transform.transform_type().to_string(),
                message: format!("source product shorter than its type ({index})"),
            })
        }

        InlineTransform::RecordBuild { field_order } => {
            let mut by_name = BTreeMap::new();
            for name in field_order {
                by_name.insert(name.clone(), fetch(inputs, transform, name)?.clone());
            }
            Ok(RawValue::Product(by_name.into_values().collect()))
        }

        InlineTransform::Merge {
            left_type,
            right_type,
        } => {
            let left = fetch_product(inputs, transform, "left")?;
            let right = fetch_product(inputs, transform, "right")?;
            let left_names = sorted_field_names(transform, left_type)?;
            let right_names = sorted_field_names(transform, right_type)?;

            let mut merged: BTreeMap<String, RawValue> = left_names
                .into_iter()
                .zip(left)
                .collect();
            // Right fields override on name collision
            for (name, value) in right_names.into_iter().zip(right) {
                merged.insert(name, value);
            }
            Ok(RawValue::Product(merged.into_values().collect()))
        }

        InlineTransform::Project { keep, source_type } => {
            let values = fetch_product(inputs, transform, "source")?;
            let names = sorted_field_names(transform, source_type)?;
            let by_name: BTreeMap<&String, &RawValue> =
                names.iter().zip(values.iter()).collect();

            let mut kept = BTreeMap::new();
            for name in keep {
                let value = by_name.get(name).ok_or_else(|| TransformError::Failed {
                    transform: transform.transform_type().to_string(),
                    message: format!("field '{name}' not present in source type"),
                })?;
                kept.insert(name.clone(), (*value).clone());
            }
            Ok(RawValue::Product(kept.into_values().collect()))
        }

        InlineTransform::ListLiteral { count } => {
            let mut items = Vec::with_capacity(*count);
            for index in 0..*count {
                items.push(fetch(inputs, transform, &format!("elem{index}"))?.clone());
            }
            Ok(RawValue::repack_list(items))
        }

        InlineTransform::Map { f } => {
            let items = fetch_list(inputs, transform, "source")?;
            let mapped = items
                .iter()
                .map(|item| f(item))
                .collect::<TransformResult<Vec<_>>>()?;
            Ok(RawValue::repack_list(mapped))
        }

        InlineTransform::Filter { predicate } => {
            let items = fetch_list(inputs, transform, "source")?;
            let mut kept = Vec::new();
            for item in items {
                if predicate(&item)? {
                    kept.push(item);
                }
            }
            Ok(RawValue::repack_list(kept))
        }

        InlineTransform::All { predicate } => {
            let items = fetch_list(inputs, transform, "source")?;
            for item in &items {
                if !predicate(item)? {
                    return Ok(RawValue::Bool(false));
                }
            }
            Ok(RawValue::Bool(true))
        }

        InlineTransform::Any { predicate } => {
            let items = fetch_list(inputs, transform, "source")?;
            for item in &items {
                if predicate(item)? {
                    return Ok(RawValue::Bool(true));
                }
            }
            Ok(RawValue::Bool(false))
        }

        InlineTransform::StringInterpolation { parts } => {
            if parts.is_empty() {
                return Err(TransformError::Failed {
                    transform: transform.transform_type().to_string(),
                    message: "interpolation needs at least one literal part".to_string(),
                });
            }
            let mut out = parts[0].clone();
            for (index, part) in parts.iter().skip(1).enumerate() {
                let expr = fetch(inputs, transform, &format!("expr{index}"))?;
                out.push_str(&stringify_raw(expr));
                out.push_str(part);
            }
            Ok(RawValue::Str(out))
        }

        InlineTransform::Match {
            matchers, bodies, ..
        } => {
            let scrutinee = fetch(inputs, transform, "scrutinee")?;
            for (matcher, body) in matchers.iter().zip(bodies) {
                if matcher(scrutinee) {
                    return body(scrutinee);
                }
            }
            Err(TransformError::Failed {
                transform: transform.transform_type().to_string(),
                message: "no match arm matched the scrutinee".to_string(),
            })
        }

        InlineTransform::Opaque { transform_type } => Err(TransformError::NotExecutable {
            transform: transform_type.clone(),
        }),
    }
}
