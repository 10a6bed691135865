//! # Runtime Core
//!
//! Drives a compiled pipeline to completion: validates initial inputs,
//! computes topological batches, fires modules concurrently per batch under
//! the execution wrappers, and propagates produced values into downstream
//! data nodes.
//!
//! ## Task model
//!
//! One run is one scheduler task. Per batch the scheduler spawns a child
//! task per module and awaits them jointly; children communicate only
//! through the per-run data table of write-once cells. A global semaphore
//! caps in-flight module bodies; per-module priority orders spawning.
//!
//! ## Suspension
//!
//! When required user inputs are missing and the run is suspendable, the
//! scheduler still fires everything reachable, then returns a
//! [`SuspendedExecution`] capturing provided inputs, computed values, and
//! module statuses for a later resume.

pub mod breaker;
pub mod cancel;
pub mod cell;
pub mod scheduler;
pub mod state;
pub mod validate;
pub mod wrappers;

pub use breaker::{BreakerRegistry, BreakerStats, CircuitBreaker, CircuitBreakerConfig};
pub use cancel::{CancelHandle, CancelledError, RunCancellation};
pub use cell::{CellAlreadySet, OneShotCell};
pub use scheduler::{ModuleBindings, SchedulerContext};
pub use state::{RunState, RuntimePool};
pub use validate::{validate_initial_inputs, ValidatedInputs, ValidationError};
pub use wrappers::{
    compute_delay, BackoffStrategy, CallOutcome, ModuleCallOptions, RetryExhausted, WrapperError,
};

use crate::graph::{compute_batches, DagSpec, DataId, GraphError, ModuleId};
use crate::module::ModuleStatus;
use crate::suspend::SuspendedExecution;
use crate::transform::TransformError;
use crate::value::{CValue, CodecError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::info;
use uuid::Uuid;

/// Unrecoverable runtime errors. Per-module failures are captured in
/// statuses instead and never raise.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A module node has no bound implementation
    #[error("module '{0}' has no bound implementation")]
    ModuleNotBound(String),

    /// Stepped executor driven before initialization
    #[error("Runtime not initialized")]
    RuntimeNotInitialized,

    /// The run was cancelled; partial state was retained
    #[error("run cancelled")]
    Cancelled,

    /// Violated scheduler invariant
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Run-level options: metadata flags, wrapper defaults, suspension mode.
#[derive(Clone, Default)]
pub struct ExecutionOptions {
    pub include_timings: bool,
    pub include_provenance: bool,
    pub include_blocked_graph: bool,
    pub include_resolution_sources: bool,

    /// Default retry count for modules without their own options
    pub retry: Option<u32>,
    /// Default per-attempt timeout
    pub timeout: Option<Duration>,
    /// Default fallback value
    pub fallback: Option<CValue>,
    pub backoff: BackoffStrategy,
    /// Default base delay between attempts
    pub delay: Option<Duration>,
    pub max_delay: Option<Duration>,

    /// When false, missing inputs fail the run instead of suspending it
    pub no_suspend: bool,
    /// Scheduler concurrency cap override
    pub max_concurrency: Option<usize>,
    /// External cancellation controller for this run
    pub cancellation: Option<RunCancellation>,
}

impl ExecutionOptions {
    /// The wrapper defaults implied by these options
    pub fn default_call_options(&self) -> ModuleCallOptions {
        ModuleCallOptions {
            timeout: self.timeout,
            retry: self.retry.unwrap_or(0),
            delay: self.delay,
            backoff: self.backoff,
            max_delay: self.max_delay,
            fallback: self.fallback.clone(),
            priority: 0,
            circuit_breaker: None,
            on_retry: None,
            on_fallback: None,
        }
    }
}

/// How a run ended
#[derive(Debug)]
pub enum RunTermination {
    /// Every reachable module fired and every output resolved
    Completed,
    /// Required inputs were missing; the captured state can resume
    Suspended(Box<SuspendedExecution>),
    /// At least one module failed, or the run was cancelled
    Failed { error: String },
}

/// Final state of one run plus everything the metadata builder needs.
#[derive(Debug)]
pub struct RunReport {
    pub state: Arc<RunState>,
    pub termination: RunTermination,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Declared outputs that resolved, by output name
    pub outputs: BTreeMap<String, CValue>,
    /// Names of user inputs provided to this run
    pub input_names: BTreeSet<String>,
    /// Names of manually resolved nodes (resume path)
    pub resolved_names: BTreeSet<String>,
}

/// The engine's scheduler/runtime.
pub struct Runtime {
    max_concurrency: usize,
    breakers: Arc<BreakerRegistry>,
    pool: Option<Arc<RuntimePool>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

impl Runtime {
    /// Runtime with the default concurrency cap (one permit per CPU)
    pub fn new() -> Self {
        Runtime {
            max_concurrency: num_cpus::get().max(1),
            breakers: Arc::new(BreakerRegistry::new()),
            pool: None,
        }
    }

    /// Override the scheduler concurrency cap
    pub fn with_max_concurrency(mut self, cap: usize) -> Self {
        self.max_concurrency = cap.max(1);
        self
    }

    /// Share a breaker registry (the process-wide one, usually)
    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    /// Reuse state allocations across runs
    pub fn with_pool(mut self, pool: Arc<RuntimePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Breaker stats snapshot for this runtime's registry
    pub fn breaker_stats(&self) -> BTreeMap<String, BreakerStats> {
        self.breakers.all_stats()
    }

    /// Execute `dag` with `inputs`.
    pub async fn execute(
        &self,
        dag: Arc<DagSpec>,
        bindings: &ModuleBindings,
        inputs: BTreeMap<String, CValue>,
        module_options: HashMap<ModuleId, ModuleCallOptions>,
        options: &ExecutionOptions,
    ) -> RuntimeResult<RunReport> {
        self.run_seeded(
            dag,
            bindings,
            inputs,
            BTreeMap::new(),
            BTreeMap::new(),
            BTreeSet::new(),
            module_options,
            options,
            None,
            0,
        )
        .await
    }

    /// Execute with pre-seeded values and statuses (the resume path).
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn run_seeded(
        &self,
        dag: Arc<DagSpec>,
        bindings: &ModuleBindings,
        provided_inputs: BTreeMap<String, CValue>,
        preresolved: BTreeMap<DataId, CValue>,
        preset_statuses: BTreeMap<ModuleId, ModuleStatus>,
        resolved_names: BTreeSet<String>,
        module_options: HashMap<ModuleId, ModuleCallOptions>,
        options: &ExecutionOptions,
        execution_id: Option<Uuid>,
        resumption_count: u32,
    ) -> RuntimeResult<RunReport> {
        let started_at = Utc::now();

        // A deserialized graph may carry closure-less transform markers;
        // running one is illegal.
        for node in dag.data.values() {
            if let Some(transform) = &node.transform {
                if !transform.is_executable() {
                    return Err(RuntimeError::Transform(TransformError::NotExecutable {
                        transform: transform.transform_type().to_string(),
                    }));
                }
            }
        }

        let validated = validate_initial_inputs(&dag, &provided_inputs)?;
        // A node already resolved from a prior run no longer counts as
        // missing
        let missing: BTreeMap<String, DataId> = validated
            .missing
            .iter()
            .filter(|(_, (id, _))| !preresolved.contains_key(id))
            .map(|(name, (id, _))| (name.clone(), *id))
            .collect();

        if options.no_suspend && !missing.is_empty() {
            return Err(RuntimeError::Validation(ValidationError::MissingInputs(
                missing.keys().cloned().collect(),
            )));
        }

        let batches = compute_batches(&dag)?;

        let state = Arc::new(match &self.pool {
            Some(pool) => RunState::with_pool(Arc::clone(&dag), pool),
            None => RunState::new(Arc::clone(&dag)),
        });

        for (id, value) in &preresolved {
            state.set_value(*id, value.clone()).map_err(|_| {
                RuntimeError::Internal(format!("preresolved node {id} written twice"))
            })?;
        }
        for (id, value) in &validated.resolved {
            if !state.is_resolved(*id) {
                state.set_value(*id, value.clone()).map_err(|_| {
                    RuntimeError::Internal(format!("input node {id} written twice"))
                })?;
            }
        }
        for (module, status) in preset_statuses {
            state.set_status(module, status);
        }

        let cap = options.max_concurrency.unwrap_or(self.max_concurrency);
        let ctx = SchedulerContext {
            dag: Arc::clone(&dag),
            state: Arc::clone(&state),
            bindings: bindings.clone(),
            module_options: module_options.clone(),
            default_options: options.default_call_options(),
            semaphore: Arc::new(Semaphore::new(cap.max(1))),
            breakers: Arc::clone(&self.breakers),
            cancellation: options.cancellation.clone().unwrap_or_default(),
        };

        scheduler::evaluate_derived(&dag, &state)?;
        let mut cancelled = false;
        if let Err(error) = scheduler::drive(&ctx, &batches, 0).await {
            match error {
                // Cancellation keeps the partial state instead of raising
                RuntimeError::Cancelled => cancelled = true,
                other => return Err(other),
            }
        }

        let completed_at = Utc::now();
        let outputs = collect_outputs(&dag, &state);

        let termination = if cancelled {
            RunTermination::Failed {
                error: "run cancelled".to_string(),
            }
        } else if !missing.is_empty() {
            let suspension = SuspendedExecution {
                execution_id: execution_id.unwrap_or_else(Uuid::new_v4),
                structural_hash: crate::graph::hash::structural_hash(&dag),
                resumption_count,
                dag: Arc::clone(&dag),
                module_options: module_options.into_iter().collect(),
                provided_inputs: provided_inputs.clone(),
                computed_values: state.resolved_values(),
                module_statuses: state
                    .statuses()
                    .into_iter()
                    .map(|(id, status)| (id, status.name().to_string()))
                    .collect(),
            };
            info!(
                execution_id = %suspension.execution_id,
                missing = ?missing.keys().collect::<Vec<_>>(),
                "run_suspended"
            );
            RunTermination::Suspended(Box::new(suspension))
        } else if state.has_failures() {
            let failed: Vec<String> = state
                .statuses()
                .into_iter()
                .filter_map(|(id, status)| match status {
                    ModuleStatus::Failed { error } => {
                        let name = dag
                            .modules
                            .get(&id)
                            .map_or_else(|| id.to_string(), |m| m.metadata.name.clone());
                        Some(format!("{name}: {error}"))
                    }
                    ModuleStatus::Timed { latency } => {
                        let name = dag
                            .modules
                            .get(&id)
                            .map_or_else(|| id.to_string(), |m| m.metadata.name.clone());
                        Some(format!("{name}: timed out after {latency:?}"))
                    }
                    _ => None,
                })
                .collect();
            RunTermination::Failed {
                error: failed.join("; "),
            }
        } else {
            RunTermination::Completed
        };

        Ok(RunReport {
            state,
            termination,
            started_at,
            completed_at,
            outputs,
            input_names: provided_inputs.keys().cloned().collect(),
            resolved_names,
        })
    }
}

fn collect_outputs(dag: &DagSpec, state: &RunState) -> BTreeMap<String, CValue> {
    let mut outputs = BTreeMap::new();
    for name in &dag.declared_outputs {
        if let Some(data_id) = dag.output_bindings.get(name) {
            if let Some(value) = state.value(*data_id) {
                outputs.insert(name.clone(), value);
            }
        }
    }
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ModuleNodeSpec;
    use crate::module::{FnModule, Module, ModuleInputs, ModuleOutput};
    use crate::value::CType;

    fn uppercase_pipeline() -> (Arc<DagSpec>, ModuleBindings) {
        let mut b = DagSpec::builder("uppercase");
        let text = b.data("text", CType::String);
        let result = b.data("result", CType::String);
        let spec = ModuleNodeSpec::new(
            "Uppercase",
            [("text", CType::String)],
            [("result", CType::String)],
        );
        let module = b.module(spec.clone());
        b.consume(text, module);
        b.produce(module, result);
        b.output("result", result);
        let dag = Arc::new(b.build().unwrap());

        let implementation: Arc<dyn Module> = Arc::new(FnModule::new(
            spec,
            |inputs: ModuleInputs| async move {
                let text = inputs.require_str("text")?.to_uppercase();
                Ok(ModuleOutput::single("result", CValue::str(text)))
            },
        ));
        let bindings: ModuleBindings = [(module, implementation)].into_iter().collect();
        (dag, bindings)
    }

    #[tokio::test]
    async fn test_single_module_run() {
        let (dag, bindings) = uppercase_pipeline();
        let runtime = Runtime::new();
        let mut inputs = BTreeMap::new();
        inputs.insert("text".to_string(), CValue::str("hello"));

        let report = runtime
            .execute(dag, &bindings, inputs, HashMap::new(), &ExecutionOptions::default())
            .await
            .unwrap();

        assert!(matches!(report.termination, RunTermination::Completed));
        assert_eq!(report.outputs.get("result"), Some(&CValue::str("HELLO")));
    }

    #[tokio::test]
    async fn test_missing_input_suspends() {
        let (dag, bindings) = uppercase_pipeline();
        let runtime = Runtime::new();

        let report = runtime
            .execute(
                dag,
                &bindings,
                BTreeMap::new(),
                HashMap::new(),
                &ExecutionOptions::default(),
            )
            .await
            .unwrap();

        match report.termination {
            RunTermination::Suspended(suspension) => {
                assert_eq!(suspension.resumption_count, 0);
                assert!(suspension.provided_inputs.is_empty());
            }
            other => panic!("expected suspension, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_input_fails_when_not_suspendable() {
        let (dag, bindings) = uppercase_pipeline();
        let runtime = Runtime::new();
        let options = ExecutionOptions {
            no_suspend: true,
            ..ExecutionOptions::default()
        };

        let err = runtime
            .execute(dag, &bindings, BTreeMap::new(), HashMap::new(), &options)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Validation(ValidationError::MissingInputs(_))
        ));
    }

    #[tokio::test]
    async fn test_type_mismatch_fails_before_firing() {
        let (dag, bindings) = uppercase_pipeline();
        let runtime = Runtime::new();
        let mut inputs = BTreeMap::new();
        inputs.insert("text".to_string(), CValue::int(123));

        let err = runtime
            .execute(dag, &bindings, inputs, HashMap::new(), &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Validation(ValidationError::InputTypeMismatch { .. })
        ));
    }
}
