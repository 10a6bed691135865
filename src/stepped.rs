//! Stepped execution: the same graph, driven one batch at a time.
//!
//! Interactive tooling walks a pipeline batch by batch, inspecting per-node
//! state between steps. Batching and firing are shared with the main
//! runtime; only the drive loop differs.
//!
//! ## Lifecycle
//!
//! 1. `SteppedSession::create` computes batches and marks every node
//!    `Pending`.
//! 2. `initialize_runtime` validates inputs, seeds the state, completes
//!    batch 0.
//! 3. `execute_next_batch` fires one batch per call until `is_complete`.
//! 4. `get_outputs` reads the declared outputs that completed.

use crate::graph::{compute_batches, Batch, DagSpec, GraphResult, ModuleId};
use crate::module::ModuleStatus;
use crate::runtime::{
    scheduler, validate_initial_inputs, ModuleBindings, ModuleCallOptions, RunCancellation,
    RunState, RuntimeError, RuntimeResult, SchedulerContext,
};
use crate::value::{CValue, preview::DEFAULT_PREVIEW_LENGTH, value_preview};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Observable state of one node (module or data) in a stepped session
#[derive(Debug, Clone)]
pub enum NodeState {
    /// Not reached yet
    Pending,
    /// Resolved; data nodes carry their value, modules their latency
    Completed {
        value: Option<CValue>,
        latency_nanos: u128,
    },
    /// Module failed or timed out
    Failed { error: String },
}

impl NodeState {
    /// True for `Completed`
    pub fn is_completed(&self) -> bool {
        matches!(self, NodeState::Completed { .. })
    }
}

/// One interactive execution of a pipeline.
pub struct SteppedSession {
    pub session_id: String,
    dag: Arc<DagSpec>,
    batches: Vec<Batch>,
    current_batch_index: usize,
    node_states: HashMap<Uuid, NodeState>,
    bindings: ModuleBindings,
    module_options: HashMap<ModuleId, ModuleCallOptions>,
    inputs: BTreeMap<String, CValue>,
    runtime: Option<SchedulerContext>,
    start_time: Instant,
}

impl SteppedSession {
    /// Compute batches and mark every node pending. The runtime is not
    /// initialized yet.
    pub fn create(
        session_id: impl Into<String>,
        dag: Arc<DagSpec>,
        bindings: ModuleBindings,
        module_options: HashMap<ModuleId, ModuleCallOptions>,
        inputs: BTreeMap<String, CValue>,
    ) -> GraphResult<Self> {
        let batches = compute_batches(&dag)?;
        let mut node_states = HashMap::new();
        for id in dag.data.keys() {
            node_states.insert(*id, NodeState::Pending);
        }
        for id in dag.modules.keys() {
            node_states.insert(*id, NodeState::Pending);
        }
        Ok(SteppedSession {
            session_id: session_id.into(),
            dag,
            batches,
            current_batch_index: 0,
            node_states,
            bindings,
            module_options,
            inputs,
            runtime: None,
            start_time: Instant::now(),
        })
    }

    /// Validate inputs, seed the run state, complete batch 0, and point
    /// the session at the first module batch.
    pub fn initialize_runtime(&mut self) -> RuntimeResult<()> {
        let validated = validate_initial_inputs(&self.dag, &self.inputs)?;

        let state = Arc::new(RunState::new(Arc::clone(&self.dag)));
        for (id, value) in &validated.resolved {
            state.set_value(*id, value.clone()).map_err(|_| {
                RuntimeError::Internal(format!("input node {id} written twice"))
            })?;
        }
        scheduler::evaluate_derived(&self.dag, &state)?;

        let ctx = SchedulerContext {
            dag: Arc::clone(&self.dag),
            state: Arc::clone(&state),
            bindings: self.bindings.clone(),
            module_options: self.module_options.clone(),
            default_options: ModuleCallOptions::default(),
            semaphore: Arc::new(Semaphore::new(num_cpus::get().max(1))),
            breakers: Arc::new(crate::runtime::BreakerRegistry::new()),
            cancellation: RunCancellation::new(),
        };
        self.runtime = Some(ctx);
        self.refresh_node_states(&state);
        self.current_batch_index = 1.min(self.batches.len());
        self.start_time = Instant::now();
        Ok(())
    }

    /// Fire the current batch. Returns true once every batch has run.
    /// Fails with `RuntimeNotInitialized` before `initialize_runtime`.
    pub async fn execute_next_batch(&mut self) -> RuntimeResult<bool> {
        if self.current_batch_index >= self.batches.len() {
            if self.runtime.is_none() {
                return Err(RuntimeError::RuntimeNotInitialized);
            }
            return Ok(true);
        }
        let state = {
            let Some(ctx) = &self.runtime else {
                return Err(RuntimeError::RuntimeNotInitialized);
            };
            scheduler::fire_batch(ctx, &self.batches[self.current_batch_index]).await?;
            Arc::clone(&ctx.state)
        };
        self.refresh_node_states(&state);
        self.current_batch_index += 1;
        Ok(self.current_batch_index >= self.batches.len())
    }

    /// Drive every remaining batch
    pub async fn execute_to_completion(&mut self) -> RuntimeResult<()> {
        while !self.execute_next_batch().await? {}
        Ok(())
    }

    fn refresh_node_states(&mut self, state: &RunState) {
        let data_ids: Vec<Uuid> = self.dag.data.keys().copied().collect();
        for id in data_ids {
            if let Some(value) = state.value(id) {
                self.node_states.insert(
                    id,
                    NodeState::Completed {
                        value: Some(value),
                        latency_nanos: 0,
                    },
                );
            }
        }
        for (id, status) in state.statuses() {
            match status {
                ModuleStatus::Fired { latency, .. } => {
                    self.node_states.insert(
                        id,
                        NodeState::Completed {
                            value: None,
                            latency_nanos: latency.as_nanos(),
                        },
                    );
                }
                ModuleStatus::Failed { error } => {
                    self.node_states.insert(id, NodeState::Failed { error });
                }
                ModuleStatus::Timed { latency } => {
                    self.node_states.insert(
                        id,
                        NodeState::Failed {
                            error: format!("timed out after {latency:?}"),
                        },
                    );
                }
                ModuleStatus::Unfired => {}
            }
        }
    }

    /// State of one node
    pub fn node_state(&self, id: Uuid) -> Option<&NodeState> {
        self.node_states.get(&id)
    }

    /// How many batches the session has
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Index of the next batch to fire
    pub fn current_batch_index(&self) -> usize {
        self.current_batch_index
    }

    /// True once every batch has run
    pub fn is_complete(&self) -> bool {
        self.runtime.is_some() && self.current_batch_index >= self.batches.len()
    }

    /// Time since the runtime was initialized
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Declared outputs restricted to completed nodes. Missing or
    /// incomplete outputs are omitted silently.
    pub fn get_outputs(&self) -> BTreeMap<String, CValue> {
        let mut outputs = BTreeMap::new();
        for name in &self.dag.declared_outputs {
            let Some(data_id) = self.dag.output_bindings.get(name) else {
                continue;
            };
            if let Some(NodeState::Completed {
                value: Some(value), ..
            }) = self.node_states.get(data_id)
            {
                outputs.insert(name.clone(), value.clone());
            }
        }
        outputs
    }

    /// Preview of a completed node's value, truncated to the default width
    pub fn node_preview(&self, id: Uuid) -> Option<String> {
        match self.node_states.get(&id)? {
            NodeState::Completed {
                value: Some(value), ..
            } => Some(value_preview(value, DEFAULT_PREVIEW_LENGTH)),
            _ => None,
        }
    }
}
