//! # Suspension and Resume
//!
//! A run missing required user inputs does not fail: it fires everything
//! reachable and captures the rest as a [`SuspendedExecution`] — execution
//! identity, structural hash, provided inputs, computed values, and module
//! statuses. The record is JSON-serializable and can cross a process
//! restart through a [`SuspensionStore`].
//!
//! ## Resume
//!
//! 1. Acquire the per-execution mutex (try-lock; contention fails fast
//!    with `ResumeInProgress`, no waiting).
//! 2. Check structural-hash compatibility when the caller supplies a live
//!    graph.
//! 3. Validate additional inputs and manually resolved nodes.
//! 4. Seed a fresh run state with the prior values; modules already
//!    `Fired` are not re-fired.
//! 5. Drive the scheduler; the mutex releases on every exit path.

pub mod codec;
pub mod resume;
pub mod store;

pub use resume::{resume, ResumeRequest};
pub use store::{
    FileStore, MemoryStore, StoreError, StoreResult, SuspensionFilter, SuspensionHandle,
    SuspensionStore, SuspensionSummary,
};

use crate::graph::{DagSpec, DataId, ModuleId};
use crate::runtime::{ModuleCallOptions, RuntimeError, ValidationError};
use crate::value::{CodecError, CValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Suspension and resume errors
#[derive(Error, Debug)]
pub enum SuspendError {
    /// Another resume holds this execution's mutex
    #[error("resume already in progress for execution {0}")]
    ResumeInProgress(Uuid),

    /// Caller's graph does not match the suspended one
    #[error("pipeline changed: expected structural hash {expected}, found {actual}")]
    PipelineChanged { expected: String, actual: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Result type for suspension operations
pub type SuspendResult<T> = Result<T, SuspendError>;

/// The paused state of an execution awaiting inputs.
#[derive(Debug, Clone)]
pub struct SuspendedExecution {
    /// Stable across re-suspensions of the same execution
    pub execution_id: Uuid,
    /// Structural hash of the graph at suspension time
    pub structural_hash: String,
    /// How many times this execution has been resumed
    pub resumption_count: u32,
    pub dag: Arc<DagSpec>,
    pub module_options: BTreeMap<ModuleId, ModuleCallOptions>,
    /// Inputs received so far, by name
    pub provided_inputs: BTreeMap<String, CValue>,
    /// Every resolved data node at suspension time
    pub computed_values: BTreeMap<DataId, CValue>,
    /// Status name per module ("Unfired", "Fired", "Failed", "Timed")
    pub module_statuses: BTreeMap<ModuleId, String>,
}

impl SuspendedExecution {
    /// User inputs still missing: declared user-input nodes minus the
    /// provided ones, by name
    pub fn missing_inputs(&self) -> BTreeMap<String, crate::value::CType> {
        let mut missing = BTreeMap::new();
        for id in self.dag.user_input_ids() {
            if let Some(node) = self.dag.data.get(&id) {
                if !self.provided_inputs.contains_key(&node.name)
                    && !self.computed_values.contains_key(&id)
                {
                    missing.insert(node.name.clone(), node.ctype.clone());
                }
            }
        }
        missing
    }
}
