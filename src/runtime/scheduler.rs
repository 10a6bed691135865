//! Batch scheduler: drives a run's batches sequentially and fires each
//! batch's modules concurrently.
//!
//! Firing a module: gather its inputs from the data table, convert and
//! type-check them, invoke the body under the execution wrappers, then
//! write the outputs back and record the status. A failed module never
//! cancels its batch; downstream cells simply stay empty and the modules
//! behind them stay `Unfired`.
//!
//! Inline-derived data nodes are evaluated eagerly after every write, so a
//! chain of transforms collapses inside the batch where its roots resolve.

use super::breaker::BreakerRegistry;
use super::cancel::RunCancellation;
use super::state::RunState;
use super::wrappers::{call_with_options, CallOutcome, ModuleCallOptions};
use super::RuntimeError;
use crate::graph::{Batch, DagSpec, DataId, ModuleId};
use crate::module::{check_output_types, Module, ModuleInputs, ModuleOutput, ModuleStatus};
use crate::transform;
use crate::value::{CValue, RawValue};
use futures_util::future::BoxFuture;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Module implementations keyed by module node id
pub type ModuleBindings = HashMap<ModuleId, Arc<dyn Module>>;

/// Everything a batch needs to fire
pub struct SchedulerContext {
    pub dag: Arc<DagSpec>,
    pub state: Arc<RunState>,
    pub bindings: ModuleBindings,
    pub module_options: HashMap<ModuleId, ModuleCallOptions>,
    pub default_options: ModuleCallOptions,
    pub semaphore: Arc<Semaphore>,
    pub breakers: Arc<BreakerRegistry>,
    pub cancellation: RunCancellation,
}

impl SchedulerContext {
    /// The options in force for `module`: its own entry, else the
    /// run-level defaults, with the graph's per-module timeout as a last
    /// resort
    pub fn effective_options(&self, module: ModuleId) -> ModuleCallOptions {
        let mut options = self
            .module_options
            .get(&module)
            .cloned()
            .unwrap_or_else(|| self.default_options.clone());
        if options.timeout.is_none() {
            if let Some(spec) = self.dag.modules.get(&module) {
                options.timeout = spec.config.module_timeout;
            }
        }
        options
    }
}

/// Evaluate every derived data node whose inputs are resolved, cascading
/// until a fixpoint. Returns how many nodes were computed.
pub fn evaluate_derived(dag: &DagSpec, state: &RunState) -> Result<usize, RuntimeError> {
    let mut computed = 0;
    loop {
        let mut progressed = false;
        for (id, node) in &dag.data {
            let Some(transform) = &node.transform else {
                continue;
            };
            if state.is_resolved(*id) {
                continue;
            }
            let mut inputs = HashMap::with_capacity(node.transform_inputs.len());
            let mut ready = true;
            for (param, input_id) in &node.transform_inputs {
                match state.value(*input_id) {
                    Some(value) => {
                        inputs.insert(param.clone(), RawValue::from_cvalue(&value));
                    }
                    None => {
                        ready = false;
                        break;
                    }
                }
            }
            if !ready {
                continue;
            }

            let raw = transform::evaluate(transform, &inputs)?;
            let value = raw.into_cvalue(&node.ctype)?;
            state.set_value(*id, value).map_err(|_| {
                RuntimeError::Internal(format!(
                    "derived node '{}' written twice",
                    node.name
                ))
            })?;
            debug!(node = %node.name, transform = transform.transform_type(), "derived_node_evaluated");
            computed += 1;
            progressed = true;
        }
        if !progressed {
            return Ok(computed);
        }
    }
}

/// What one module firing produced, computed inside the child task
struct FireResult {
    status: ModuleStatus,
    outputs: BTreeMap<String, CValue>,
}

fn bind_fallback_outputs(
    spec: &crate::graph::ModuleNodeSpec,
    value: &CValue,
) -> Result<BTreeMap<String, CValue>, String> {
    if let [(param, expected)] =
        spec.produces.iter().collect::<Vec<_>>().as_slice()
    {
        let actual = value.ctype();
        if actual != **expected {
            return Err(format!(
                "fallback value type {actual} does not match produced type {expected}"
            ));
        }
        let mut outputs = BTreeMap::new();
        outputs.insert((*param).clone(), value.clone());
        return Ok(outputs);
    }

    // Multi-output modules take a product fallback spread over the
    // produced parameters
    if let CValue::Product { fields, .. } = value {
        let mut outputs = BTreeMap::new();
        for (param, expected) in &spec.produces {
            let Some(field) = fields.get(param) else {
                return Err(format!("fallback product missing field '{param}'"));
            };
            let actual = field.ctype();
            if actual != *expected {
                return Err(format!(
                    "fallback field '{param}' type {actual} does not match produced type {expected}"
                ));
            }
            outputs.insert(param.clone(), field.clone());
        }
        return Ok(outputs);
    }
    Err("fallback value does not fit the produces schema".to_string())
}

async fn fire_module(
    dag: Arc<DagSpec>,
    state: Arc<RunState>,
    module_id: ModuleId,
    module_impl: Arc<dyn Module>,
    options: ModuleCallOptions,
    semaphore: Arc<Semaphore>,
    breakers: Arc<BreakerRegistry>,
) -> FireResult {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return FireResult {
            status: ModuleStatus::Failed {
                error: "scheduler semaphore closed".to_string(),
            },
            outputs: BTreeMap::new(),
        };
    };

    let spec = match dag.modules.get(&module_id) {
        Some(spec) => spec.clone(),
        None => {
            return FireResult {
                status: ModuleStatus::Failed {
                    error: format!("internal invariant: module {module_id} not in graph"),
                },
                outputs: BTreeMap::new(),
            }
        }
    };

    // Gather: batching guarantees upstream cells are filled by now; an
    // empty cell here is an internal invariant violation.
    let consumed: Vec<DataId> = dag
        .in_edges
        .iter()
        .filter(|(_, m)| *m == module_id)
        .map(|(d, _)| *d)
        .collect();
    let mut inputs = BTreeMap::new();
    for data_id in consumed {
        let Some(param) = dag.param_name(data_id, module_id) else {
            return FireResult {
                status: ModuleStatus::Failed {
                    error: format!("internal invariant: data {data_id} not in graph"),
                },
                outputs: BTreeMap::new(),
            };
        };
        let Some(value) = state.value(data_id) else {
            return FireResult {
                status: ModuleStatus::Failed {
                    error: format!(
                        "internal invariant: input '{param}' not resolved at fire time"
                    ),
                },
                outputs: BTreeMap::new(),
            };
        };
        // Convert/check against the declared consumed type
        if let Some(expected) = spec.consumes.get(&param) {
            let actual = value.ctype();
            if actual != *expected {
                return FireResult {
                    status: ModuleStatus::Failed {
                        error: format!(
                            "input '{param}' type mismatch: expected {expected}, found {actual}"
                        ),
                    },
                    outputs: BTreeMap::new(),
                };
            }
        }
        inputs.insert(param, value);
    }

    let breaker = options
        .circuit_breaker
        .as_ref()
        .map(|config| breakers.for_module(&spec.metadata.name, config));

    let call_inputs = ModuleInputs::new(inputs);
    let body = {
        let module_impl = Arc::clone(&module_impl);
        move || -> BoxFuture<'static, crate::module::ModuleResult<ModuleOutput>> {
            let module_impl = Arc::clone(&module_impl);
            let call_inputs = call_inputs.clone();
            Box::pin(async move { module_impl.call(call_inputs).await })
        }
    };

    let outcome = call_with_options(&body, &options, breaker.as_deref()).await;
    match outcome {
        CallOutcome::Success {
            output,
            latency,
            attempts,
        } => {
            if let Err(violation) = check_output_types(&spec, &output) {
                warn!(module = %spec.metadata.name, error = %violation, "module_output_contract_violation");
                return FireResult {
                    status: ModuleStatus::Failed {
                        error: violation.to_string(),
                    },
                    outputs: BTreeMap::new(),
                };
            }
            debug!(module = %spec.metadata.name, ?latency, attempts, "module_fired");
            FireResult {
                status: ModuleStatus::Fired {
                    latency,
                    context: output.context.clone(),
                },
                outputs: output.values,
            }
        }
        CallOutcome::Fallback {
            value,
            error,
            latency,
            attempts,
        } => match bind_fallback_outputs(&spec, &value) {
            Ok(outputs) => {
                debug!(module = %spec.metadata.name, attempts, "module_fell_back");
                let mut context = BTreeMap::new();
                context.insert("fallback".to_string(), json!(true));
                context.insert("error".to_string(), json!(error));
                FireResult {
                    status: ModuleStatus::Fired {
                        latency,
                        context: Some(context),
                    },
                    outputs,
                }
            }
            Err(mismatch) => FireResult {
                status: ModuleStatus::Failed { error: mismatch },
                outputs: BTreeMap::new(),
            },
        },
        CallOutcome::Failure { error, latency } => {
            warn!(module = %spec.metadata.name, error = %error, "module_failed");
            let status = if error.is_timeout() {
                ModuleStatus::Timed { latency }
            } else {
                ModuleStatus::Failed {
                    error: match &error {
                        super::wrappers::WrapperError::RetryExhausted(info) => {
                            info.detailed_message()
                        }
                        other => other.to_string(),
                    },
                }
            };
            FireResult {
                status,
                outputs: BTreeMap::new(),
            }
        }
    }
}

fn apply_fire_result(
    ctx: &SchedulerContext,
    module_id: ModuleId,
    result: FireResult,
) -> Result<(), RuntimeError> {
    for (param, value) in result.outputs {
        let Some(data_id) = ctx.dag.output_data_for(module_id, &param) else {
            // Produced parameter with no wired data node: dropped
            continue;
        };
        // A manually resolved cell keeps its value; the single-writer
        // rule otherwise makes this write the first
        if ctx.state.set_value(data_id, value).is_err() {
            debug!(module = %module_id, param = %param, "output_cell_already_resolved");
        }
    }
    ctx.state.set_status(module_id, result.status);
    evaluate_derived(&ctx.dag, &ctx.state)?;
    Ok(())
}

/// Fire one batch: spawn a child task per runnable module (priority order,
/// bounded by the semaphore) and fold their results back into the state as
/// they land.
pub async fn fire_batch(ctx: &SchedulerContext, batch: &Batch) -> Result<(), RuntimeError> {
    let mut modules = batch.modules.clone();
    modules.sort_by_key(|id| (std::cmp::Reverse(ctx.effective_options(*id).priority), *id));

    let mut join_set: JoinSet<(ModuleId, FireResult)> = JoinSet::new();
    for module_id in modules {
        if ctx.cancellation.is_cancelled() {
            break;
        }
        // Pre-seeded from a resumed execution: do not re-fire
        if ctx.state.status(module_id).is_fired() {
            continue;
        }
        // Every output already resolved (manual resolution): bypassed
        let outputs: Vec<DataId> = ctx
            .dag
            .out_edges
            .iter()
            .filter(|(m, _)| *m == module_id)
            .map(|(_, d)| *d)
            .collect();
        if !outputs.is_empty() && outputs.iter().all(|d| ctx.state.is_resolved(*d)) {
            debug!(module = %module_id, "module_bypassed_outputs_resolved");
            continue;
        }
        // Blocked by a missing input or an upstream failure: stays Unfired
        let blocked = ctx
            .dag
            .in_edges
            .iter()
            .filter(|(_, m)| *m == module_id)
            .any(|(d, _)| !ctx.state.is_resolved(*d));
        if blocked {
            debug!(module = %module_id, "module_blocked");
            continue;
        }

        let Some(module_impl) = ctx.bindings.get(&module_id) else {
            let name = ctx
                .dag
                .modules
                .get(&module_id)
                .map_or_else(|| module_id.to_string(), |spec| spec.metadata.name.clone());
            return Err(RuntimeError::ModuleNotBound(name));
        };

        let task = fire_module(
            Arc::clone(&ctx.dag),
            Arc::clone(&ctx.state),
            module_id,
            Arc::clone(module_impl),
            ctx.effective_options(module_id),
            Arc::clone(&ctx.semaphore),
            Arc::clone(&ctx.breakers),
        );
        join_set.spawn(async move { (module_id, task.await) });
    }

    while let Some(joined) = join_set.join_next().await {
        if ctx.cancellation.is_cancelled() {
            join_set.abort_all();
            return Err(RuntimeError::Cancelled);
        }
        match joined {
            Ok((module_id, result)) => apply_fire_result(ctx, module_id, result)?,
            Err(join_error) => {
                // Wrappers catch body panics; a join error means the task
                // itself died
                return Err(RuntimeError::Internal(format!(
                    "module task aborted: {join_error}"
                )));
            }
        }
    }
    Ok(())
}

/// Drive batches `from..` sequentially, honoring cancellation between
/// batches.
pub async fn drive(
    ctx: &SchedulerContext,
    batches: &[Batch],
    from: usize,
) -> Result<(), RuntimeError> {
    for batch in batches.iter().skip(from) {
        if ctx.cancellation.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }
        fire_batch(ctx, batch).await?;
    }
    Ok(())
}
