//! JSON codec for suspension snapshots.
//!
//! The snapshot object carries `executionId`, `structuralHash`,
//! `resumptionCount`, the nested `dagSpec`, `moduleOptions`,
//! `providedInputs`, `computedValues`, and `moduleStatuses`. Missing
//! identity fields, a wrongly-typed resumption count, and malformed
//! UUID-shaped keys are all structured decode errors.
//!
//! Closure-bearing inline transforms (map/filter/all/any/match) cannot
//! round-trip: they serialize as their `transformType` marker alone and
//! deserialize to an opaque, non-executable placeholder. Graphs restored
//! from a snapshot are therefore runnable only when the host re-supplies a
//! live graph at resume time.

use super::SuspendedExecution;
use crate::graph::{
    DagMetadata, DagSpec, DataNodeSpec, ModuleConfig, ModuleMetadata, ModuleNodeSpec,
};
use crate::runtime::{BackoffStrategy, CircuitBreakerConfig, ModuleCallOptions};
use crate::transform::InlineTransform;
use crate::value::codec::{decode_type, decode_value, encode_type, encode_value};
use crate::value::{CodecError, CodecResult};
use serde_json::{json, Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn parse_uuid(s: &str) -> CodecResult<Uuid> {
    Uuid::parse_str(s).map_err(|_| CodecError::Message(format!("invalid UUID '{s}'")))
}

fn get<'a>(obj: &'a Map<String, Json>, name: &str) -> CodecResult<&'a Json> {
    obj.get(name)
        .ok_or_else(|| CodecError::MissingField(name.to_string()))
}

fn as_obj(value: &Json) -> CodecResult<&Map<String, Json>> {
    value
        .as_object()
        .ok_or_else(|| CodecError::Message("expected a JSON object".to_string()))
}

fn as_str(value: &Json, field: &str) -> CodecResult<String> {
    value
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| CodecError::Message(format!("field '{field}' must be a string")))
}

fn duration_ms(value: &Json, field: &str) -> CodecResult<Option<Duration>> {
    match value {
        Json::Null => Ok(None),
        Json::Number(n) => n
            .as_u64()
            .map(|ms| Some(Duration::from_millis(ms)))
            .ok_or_else(|| {
                CodecError::Message(format!("field '{field}' must be a non-negative integer"))
            }),
        _ => Err(CodecError::Message(format!(
            "field '{field}' must be a number or null"
        ))),
    }
}

fn ms_or_null(duration: Option<Duration>) -> Json {
    match duration {
        Some(d) => json!(d.as_millis() as u64),
        None => Json::Null,
    }
}

// ============================================================================
// Inline transforms
// ============================================================================

/// Encode a transform. Closure-bearing operators keep only their type
/// marker.
pub fn encode_transform(transform: &InlineTransform) -> Json {
    let mut obj = Map::new();
    obj.insert(
        "transformType".to_string(),
        json!(transform.transform_type()),
    );
    match transform {
        InlineTransform::Literal(value) => {
            obj.insert("value".to_string(), encode_value(value));
        }
        InlineTransform::FieldAccess { field, source_type } => {
            obj.insert("field".to_string(), json!(field));
            obj.insert("sourceType".to_string(), encode_type(source_type));
        }
        InlineTransform::RecordBuild { field_order } => {
            obj.insert("fieldOrder".to_string(), json!(field_order));
        }
        InlineTransform::Merge {
            left_type,
            right_type,
        } => {
            obj.insert("leftType".to_string(), encode_type(left_type));
            obj.insert("rightType".to_string(), encode_type(right_type));
        }
        InlineTransform::Project { keep, source_type } => {
            obj.insert("keepFields".to_string(), json!(keep));
            obj.insert("sourceType".to_string(), encode_type(source_type));
        }
        InlineTransform::ListLiteral { count } => {
            obj.insert("count".to_string(), json!(count));
        }
        InlineTransform::StringInterpolation { parts } => {
            obj.insert("parts".to_string(), json!(parts));
        }
        _ => {}
    }
    Json::Object(obj)
}

/// Decode a transform. Closure-bearing types come back opaque.
pub fn decode_transform(value: &Json) -> CodecResult<InlineTransform> {
    let obj = as_obj(value)?;
    let transform_type = as_str(get(obj, "transformType")?, "transformType")?;
    match transform_type.as_str() {
        "LiteralTransform" => Ok(InlineTransform::Literal(decode_value(get(obj, "value")?)?)),
        "NotTransform" => Ok(InlineTransform::Not),
        "AndTransform" => Ok(InlineTransform::And),
        "OrTransform" => Ok(InlineTransform::Or),
        "ConditionalTransform" => Ok(InlineTransform::Conditional),
        "GuardTransform" => Ok(InlineTransform::Guard),
        "CoalesceTransform" => Ok(InlineTransform::Coalesce),
        "FieldAccessTransform" => Ok(InlineTransform::FieldAccess {
            field: as_str(get(obj, "field")?, "field")?,
            source_type: decode_type(get(obj, "sourceType")?)?,
        }),
        "RecordBuildTransform" => {
            let order = get(obj, "fieldOrder")?
                .as_array()
                .ok_or_else(|| CodecError::Message("fieldOrder must be an array".to_string()))?
                .iter()
                .map(|v| as_str(v, "fieldOrder"))
                .collect::<CodecResult<Vec<_>>>()?;
            Ok(InlineTransform::RecordBuild { field_order: order })
        }
        "MergeTransform" => Ok(InlineTransform::Merge {
            left_type: decode_type(get(obj, "leftType")?)?,
            right_type: decode_type(get(obj, "rightType")?)?,
        }),
        "ProjectTransform" => {
            let keep = get(obj, "keepFields")?
                .as_array()
                .ok_or_else(|| CodecError::Message("keepFields must be an array".to_string()))?
                .iter()
                .map(|v| as_str(v, "keepFields"))
                .collect::<CodecResult<Vec<_>>>()?;
            Ok(InlineTransform::Project {
                keep,
                source_type: decode_type(get(obj, "sourceType")?)?,
            })
        }
        "ListLiteralTransform" => {
            let count = get(obj, "count")?
                .as_u64()
                .ok_or_else(|| CodecError::Message("count must be an integer".to_string()))?;
            Ok(InlineTransform::ListLiteral {
                count: count as usize,
            })
        }
        "StringInterpolationTransform" => {
            let parts = get(obj, "parts")?
                .as_array()
                .ok_or_else(|| CodecError::Message("parts must be an array".to_string()))?
                .iter()
                .map(|v| as_str(v, "parts"))
                .collect::<CodecResult<Vec<_>>>()?;
            Ok(InlineTransform::StringInterpolation { parts })
        }
        // Closure-bearing transforms are present but non-executable after
        // deserialization
        "MapTransform" | "FilterTransform" | "AllTransform" | "AnyTransform"
        | "MatchTransform" => Ok(InlineTransform::Opaque { transform_type }),
        other => Err(CodecError::UnknownTag(other.to_string())),
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Encode a graph spec
pub fn encode_dag(dag: &DagSpec) -> Json {
    json!({
        "metadata": {
            "name": dag.metadata.name,
            "description": dag.metadata.description,
        },
        "modules": dag.modules.iter().map(|(id, spec)| {
            (id.to_string(), json!({
                "metadata": {
                    "name": spec.metadata.name,
                    "description": spec.metadata.description,
                    "tags": spec.metadata.tags,
                    "majorVersion": spec.metadata.major_version,
                    "minorVersion": spec.metadata.minor_version,
                },
                "consumes": spec.consumes.iter()
                    .map(|(param, ty)| (param.clone(), encode_type(ty)))
                    .collect::<Map<_, _>>(),
                "produces": spec.produces.iter()
                    .map(|(param, ty)| (param.clone(), encode_type(ty)))
                    .collect::<Map<_, _>>(),
                "config": {
                    "inputsTimeoutMs": ms_or_null(spec.config.inputs_timeout),
                    "moduleTimeoutMs": ms_or_null(spec.config.module_timeout),
                },
                "definitionContext": spec.definition_context,
            }))
        }).collect::<Map<_, _>>(),
        "data": dag.data.iter().map(|(id, node)| {
            (id.to_string(), json!({
                "name": node.name,
                "nicknames": node.nicknames.iter()
                    .map(|(module, nick)| (module.to_string(), json!(nick)))
                    .collect::<Map<_, _>>(),
                "cType": encode_type(&node.ctype),
                "inlineTransform": node.transform.as_ref().map(encode_transform),
                "transformInputs": node.transform_inputs.iter()
                    .map(|(param, data)| (param.clone(), json!(data.to_string())))
                    .collect::<Map<_, _>>(),
            }))
        }).collect::<Map<_, _>>(),
        "inEdges": dag.in_edges.iter()
            .map(|(data, module)| json!([data.to_string(), module.to_string()]))
            .collect::<Vec<_>>(),
        "outEdges": dag.out_edges.iter()
            .map(|(module, data)| json!([module.to_string(), data.to_string()]))
            .collect::<Vec<_>>(),
        "declaredOutputs": dag.declared_outputs,
        "outputBindings": dag.output_bindings.iter()
            .map(|(name, data)| (name.clone(), json!(data.to_string())))
            .collect::<Map<_, _>>(),
    })
}

fn decode_edge(value: &Json) -> CodecResult<(Uuid, Uuid)> {
    let pair = value
        .as_array()
        .filter(|p| p.len() == 2)
        .ok_or_else(|| CodecError::Message("edge must be a two-element array".to_string()))?;
    Ok((
        parse_uuid(&as_str(&pair[0], "edge")?)?,
        parse_uuid(&as_str(&pair[1], "edge")?)?,
    ))
}

/// Decode a graph spec
pub fn decode_dag(value: &Json) -> CodecResult<DagSpec> {
    let obj = as_obj(value)?;

    let metadata_obj = as_obj(get(obj, "metadata")?)?;
    let metadata = DagMetadata {
        name: as_str(get(metadata_obj, "name")?, "name")?,
        description: metadata_obj
            .get("description")
            .and_then(Json::as_str)
            .unwrap_or_default()
            .to_string(),
    };

    let mut modules = BTreeMap::new();
    for (key, value) in as_obj(get(obj, "modules")?)? {
        let id = parse_uuid(key)?;
        let spec_obj = as_obj(value)?;
        let meta_obj = as_obj(get(spec_obj, "metadata")?)?;
        let spec = ModuleNodeSpec {
            metadata: ModuleMetadata {
                name: as_str(get(meta_obj, "name")?, "name")?,
                description: meta_obj
                    .get("description")
                    .and_then(Json::as_str)
                    .unwrap_or_default()
                    .to_string(),
                tags: meta_obj
                    .get("tags")
                    .and_then(Json::as_array)
                    .map(|tags| {
                        tags.iter()
                            .filter_map(Json::as_str)
                            .map(ToString::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                major_version: meta_obj
                    .get("majorVersion")
                    .and_then(Json::as_u64)
                    .unwrap_or(1) as u32,
                minor_version: meta_obj
                    .get("minorVersion")
                    .and_then(Json::as_u64)
                    .unwrap_or(0) as u32,
            },
            consumes: as_obj(get(spec_obj, "consumes")?)?
                .iter()
                .map(|(param, ty)| Ok((param.clone(), decode_type(ty)?)))
                .collect::<CodecResult<BTreeMap<_, _>>>()?,
            produces: as_obj(get(spec_obj, "produces")?)?
                .iter()
                .map(|(param, ty)| Ok((param.clone(), decode_type(ty)?)))
                .collect::<CodecResult<BTreeMap<_, _>>>()?,
            config: {
                let config_obj = as_obj(get(spec_obj, "config")?)?;
                ModuleConfig {
                    inputs_timeout: duration_ms(
                        config_obj.get("inputsTimeoutMs").unwrap_or(&Json::Null),
                        "inputsTimeoutMs",
                    )?,
                    module_timeout: duration_ms(
                        config_obj.get("moduleTimeoutMs").unwrap_or(&Json::Null),
                        "moduleTimeoutMs",
                    )?,
                }
            },
            definition_context: spec_obj
                .get("definitionContext")
                .and_then(Json::as_str)
                .map(ToString::to_string),
        };
        modules.insert(id, spec);
    }

    let mut data = BTreeMap::new();
    for (key, value) in as_obj(get(obj, "data")?)? {
        let id = parse_uuid(key)?;
        let node_obj = as_obj(value)?;
        let node = DataNodeSpec {
            name: as_str(get(node_obj, "name")?, "name")?,
            nicknames: as_obj(get(node_obj, "nicknames")?)?
                .iter()
                .map(|(module, nick)| Ok((parse_uuid(module)?, as_str(nick, "nickname")?)))
                .collect::<CodecResult<BTreeMap<_, _>>>()?,
            ctype: decode_type(get(node_obj, "cType")?)?,
            transform: match node_obj.get("inlineTransform") {
                None | Some(Json::Null) => None,
                Some(value) => Some(decode_transform(value)?),
            },
            transform_inputs: as_obj(get(node_obj, "transformInputs")?)?
                .iter()
                .map(|(param, data)| {
                    Ok((param.clone(), parse_uuid(&as_str(data, "transformInputs")?)?))
                })
                .collect::<CodecResult<BTreeMap<_, _>>>()?,
        };
        data.insert(id, node);
    }

    let in_edges: BTreeSet<(Uuid, Uuid)> = get(obj, "inEdges")?
        .as_array()
        .ok_or_else(|| CodecError::Message("inEdges must be an array".to_string()))?
        .iter()
        .map(decode_edge)
        .collect::<CodecResult<_>>()?;
    let out_edges: BTreeSet<(Uuid, Uuid)> = get(obj, "outEdges")?
        .as_array()
        .ok_or_else(|| CodecError::Message("outEdges must be an array".to_string()))?
        .iter()
        .map(decode_edge)
        .collect::<CodecResult<_>>()?;

    let declared_outputs = get(obj, "declaredOutputs")?
        .as_array()
        .ok_or_else(|| CodecError::Message("declaredOutputs must be an array".to_string()))?
        .iter()
        .map(|v| as_str(v, "declaredOutputs"))
        .collect::<CodecResult<Vec<_>>>()?;
    let output_bindings = as_obj(get(obj, "outputBindings")?)?
        .iter()
        .map(|(name, data)| Ok((name.clone(), parse_uuid(&as_str(data, "outputBindings")?)?)))
        .collect::<CodecResult<BTreeMap<_, _>>>()?;

    Ok(DagSpec {
        metadata,
        modules,
        data,
        in_edges,
        out_edges,
        declared_outputs,
        output_bindings,
    })
}

// ============================================================================
// Call options
// ============================================================================

/// Encode invocation options (hooks are not serializable and are dropped)
pub fn encode_call_options(options: &ModuleCallOptions) -> Json {
    json!({
        "timeoutMs": ms_or_null(options.timeout),
        "retry": options.retry,
        "delayMs": ms_or_null(options.delay),
        "backoff": options.backoff.name(),
        "maxDelayMs": ms_or_null(options.max_delay),
        "fallback": options.fallback.as_ref().map(encode_value),
        "priority": options.priority,
        "circuitBreaker": options.circuit_breaker.as_ref().map(|cb| json!({
            "failureThreshold": cb.failure_threshold,
            "resetDurationMs": cb.reset_duration.as_millis() as u64,
            "halfOpenMaxProbes": cb.half_open_max_probes,
        })),
    })
}

/// Decode invocation options
pub fn decode_call_options(value: &Json) -> CodecResult<ModuleCallOptions> {
    let obj = as_obj(value)?;
    let backoff_name = as_str(get(obj, "backoff")?, "backoff")?;
    let backoff = BackoffStrategy::parse(&backoff_name)
        .ok_or_else(|| CodecError::Message(format!("unknown backoff '{backoff_name}'")))?;
    Ok(ModuleCallOptions {
        timeout: duration_ms(obj.get("timeoutMs").unwrap_or(&Json::Null), "timeoutMs")?,
        retry: get(obj, "retry")?
            .as_u64()
            .ok_or_else(|| CodecError::Message("retry must be an integer".to_string()))?
            as u32,
        delay: duration_ms(obj.get("delayMs").unwrap_or(&Json::Null), "delayMs")?,
        backoff,
        max_delay: duration_ms(obj.get("maxDelayMs").unwrap_or(&Json::Null), "maxDelayMs")?,
        fallback: match obj.get("fallback") {
            None | Some(Json::Null) => None,
            Some(value) => Some(decode_value(value)?),
        },
        priority: obj
            .get("priority")
            .and_then(Json::as_i64)
            .unwrap_or_default() as i32,
        circuit_breaker: match obj.get("circuitBreaker") {
            None | Some(Json::Null) => None,
            Some(value) => {
                let cb = as_obj(value)?;
                Some(CircuitBreakerConfig {
                    failure_threshold: get(cb, "failureThreshold")?.as_u64().ok_or_else(|| {
                        CodecError::Message("failureThreshold must be an integer".to_string())
                    })? as u32,
                    reset_duration: duration_ms(
                        get(cb, "resetDurationMs")?,
                        "resetDurationMs",
                    )?
                    .unwrap_or(Duration::ZERO),
                    half_open_max_probes: get(cb, "halfOpenMaxProbes")?
                        .as_u64()
                        .ok_or_else(|| {
                            CodecError::Message("halfOpenMaxProbes must be an integer".to_string())
                        })? as u32,
                })
            }
        },
        on_retry: None,
        on_fallback: None,
    })
}

// ============================================================================
// Suspension
// ============================================================================

/// Encode a suspension snapshot
pub fn encode_suspension(suspension: &SuspendedExecution) -> Json {
    json!({
        "executionId": suspension.execution_id.to_string(),
        "structuralHash": suspension.structural_hash,
        "resumptionCount": suspension.resumption_count,
        "dagSpec": encode_dag(&suspension.dag),
        "moduleOptions": suspension.module_options.iter()
            .map(|(id, options)| (id.to_string(), encode_call_options(options)))
            .collect::<Map<_, _>>(),
        "providedInputs": suspension.provided_inputs.iter()
            .map(|(name, value)| (name.clone(), encode_value(value)))
            .collect::<Map<_, _>>(),
        "computedValues": suspension.computed_values.iter()
            .map(|(id, value)| (id.to_string(), encode_value(value)))
            .collect::<Map<_, _>>(),
        "moduleStatuses": suspension.module_statuses.iter()
            .map(|(id, status)| (id.to_string(), json!(status)))
            .collect::<Map<_, _>>(),
    })
}

/// Decode a suspension snapshot
pub fn decode_suspension(value: &Json) -> CodecResult<SuspendedExecution> {
    let obj = as_obj(value)?;

    let execution_id = parse_uuid(&as_str(get(obj, "executionId")?, "executionId")?)?;
    let structural_hash = as_str(get(obj, "structuralHash")?, "structuralHash")?;
    let resumption_count = get(obj, "resumptionCount")?
        .as_u64()
        .ok_or_else(|| {
            CodecError::Message("resumptionCount must be a non-negative integer".to_string())
        })? as u32;

    let dag = Arc::new(decode_dag(get(obj, "dagSpec")?)?);

    let module_options = as_obj(get(obj, "moduleOptions")?)?
        .iter()
        .map(|(id, options)| Ok((parse_uuid(id)?, decode_call_options(options)?)))
        .collect::<CodecResult<BTreeMap<_, _>>>()?;

    let provided_inputs = as_obj(get(obj, "providedInputs")?)?
        .iter()
        .map(|(name, value)| Ok((name.clone(), decode_value(value)?)))
        .collect::<CodecResult<BTreeMap<_, _>>>()?;

    let computed_values = as_obj(get(obj, "computedValues")?)?
        .iter()
        .map(|(id, value)| Ok((parse_uuid(id)?, decode_value(value)?)))
        .collect::<CodecResult<BTreeMap<_, _>>>()?;

    let module_statuses = as_obj(get(obj, "moduleStatuses")?)?
        .iter()
        .map(|(id, status)| Ok((parse_uuid(id)?, as_str(status, "moduleStatuses")?)))
        .collect::<CodecResult<BTreeMap<_, _>>>()?;

    Ok(SuspendedExecution {
        execution_id,
        structural_hash,
        resumption_count,
        dag,
        module_options,
        provided_inputs,
        computed_values,
        module_statuses,
    })
}

/// Serialize a suspension to a JSON string
pub fn suspension_to_string(suspension: &SuspendedExecution) -> String {
    encode_suspension(suspension).to_string()
}

/// Deserialize a suspension from a JSON string
pub fn suspension_from_str(payload: &str) -> CodecResult<SuspendedExecution> {
    let json: Json = serde_json::from_str(payload)?;
    decode_suspension(&json)
}

/// Verify a snapshot survives encode + decode unchanged (at the JSON
/// level, which is exact for everything except closures).
pub fn round_trip_check(suspension: &SuspendedExecution) -> CodecResult<()> {
    let encoded = encode_suspension(suspension);
    let decoded = decode_suspension(&encoded)?;
    let re_encoded = encode_suspension(&decoded);
    if encoded != re_encoded {
        return Err(CodecError::Message(
            "suspension snapshot did not survive the codec round trip".to_string(),
        ));
    }
    Ok(())
}
