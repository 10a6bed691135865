//! Resuming a suspended execution.
//!
//! Per-execution mutual exclusion: a process-wide map of execution id to
//! mutex serializes resumes. Acquisition is try-lock, never wait; the loser
//! of a race fails immediately with `ResumeInProgress` and the winner's
//! state is untouched by it. The guard is scoped, so release happens on
//! every exit path, errors included.

use super::{SuspendError, SuspendResult, SuspendedExecution};
use crate::graph::hash::structural_hash;
use crate::graph::DagSpec;
use crate::module::ModuleStatus;
use crate::runtime::{
    validate::resolve_input_name, ExecutionOptions, ModuleBindings, RunReport, Runtime,
    ValidationError,
};
use crate::value::CValue;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

fn resume_locks() -> &'static DashMap<Uuid, Arc<Mutex<()>>> {
    static LOCKS: OnceLock<DashMap<Uuid, Arc<Mutex<()>>>> = OnceLock::new();
    LOCKS.get_or_init(DashMap::new)
}

/// What a caller brings to a resume
#[derive(Default)]
pub struct ResumeRequest {
    /// Inputs not provided before, by name
    pub additional_inputs: BTreeMap<String, CValue>,
    /// Manually resolved data nodes, by name
    pub resolved_nodes: BTreeMap<String, CValue>,
    /// Live graph with executable transforms; must match the suspension's
    /// structural hash
    pub dag: Option<Arc<DagSpec>>,
}

/// Resume `suspended` with additional inputs and/or manually resolved
/// nodes, driving the scheduler to the next terminal state.
pub async fn resume(
    runtime: &Runtime,
    suspended: &SuspendedExecution,
    request: ResumeRequest,
    bindings: &ModuleBindings,
    options: &ExecutionOptions,
) -> SuspendResult<RunReport> {
    let execution_id = suspended.execution_id;
    let lock = resume_locks()
        .entry(execution_id)
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone();
    let _guard = lock
        .try_lock_owned()
        .map_err(|_| SuspendError::ResumeInProgress(execution_id))?;

    // Prefer the caller's live graph; verify it is the same pipeline
    let dag = match &request.dag {
        Some(dag) => {
            let actual = structural_hash(dag);
            if actual != suspended.structural_hash {
                return Err(SuspendError::PipelineChanged {
                    expected: suspended.structural_hash.clone(),
                    actual,
                });
            }
            Arc::clone(dag)
        }
        None => Arc::clone(&suspended.dag),
    };

    // Additional inputs: known user-input node, matching type, not yet
    // provided
    for (name, value) in &request.additional_inputs {
        let id = resolve_input_name(&dag, name)
            .ok_or_else(|| ValidationError::UnknownNode(name.clone()))?;
        let node = &dag.data[&id];
        let actual = value.ctype();
        if actual != node.ctype {
            return Err(ValidationError::InputTypeMismatch {
                name: name.clone(),
                expected: node.ctype.clone(),
                actual,
            }
            .into());
        }
        if suspended.provided_inputs.contains_key(name) {
            return Err(ValidationError::InputAlreadyProvided(name.clone()).into());
        }
    }

    // Resolved nodes: any known data node, not already resolved, matching
    // type
    let mut resolved_by_id = BTreeMap::new();
    for (name, value) in &request.resolved_nodes {
        let id = dag
            .data_id_by_name(name)
            .ok_or_else(|| ValidationError::UnknownNode(name.clone()))?;
        if suspended.computed_values.contains_key(&id) {
            return Err(ValidationError::NodeAlreadyResolved(name.clone()).into());
        }
        let node = &dag.data[&id];
        let actual = value.ctype();
        if actual != node.ctype {
            return Err(ValidationError::NodeTypeMismatch {
                name: name.clone(),
                expected: node.ctype.clone(),
                actual,
            }
            .into());
        }
        resolved_by_id.insert(id, value.clone());
    }

    // Merge the prior state with the new contributions
    let mut provided_inputs = suspended.provided_inputs.clone();
    provided_inputs.extend(request.additional_inputs.clone());

    let mut preresolved = suspended.computed_values.clone();
    preresolved.extend(resolved_by_id);

    // Only Fired survives: it alone suppresses re-firing
    let preset_statuses: BTreeMap<_, _> = suspended
        .module_statuses
        .iter()
        .filter(|(_, status)| status.as_str() == "Fired")
        .map(|(id, _)| {
            (
                *id,
                ModuleStatus::Fired {
                    latency: std::time::Duration::ZERO,
                    context: None,
                },
            )
        })
        .collect();

    let resolved_names: BTreeSet<String> = request.resolved_nodes.keys().cloned().collect();

    info!(
        execution_id = %execution_id,
        resumption = suspended.resumption_count + 1,
        "execution_resumed"
    );

    let report = runtime
        .run_seeded(
            dag,
            bindings,
            provided_inputs,
            preresolved,
            preset_statuses,
            resolved_names,
            suspended
                .module_options
                .iter()
                .map(|(id, options)| (*id, options.clone()))
                .collect(),
            options,
            Some(execution_id),
            suspended.resumption_count + 1,
        )
        .await?;

    Ok(report)
}
