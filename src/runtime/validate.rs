//! Validation of initial inputs against the graph's top-level data nodes.
//!
//! An input name resolves against the primary `name` of a user-input data
//! node first; nicknames are consulted only when no primary name matches.
//! The supplied value's type must equal the node's declared type exactly.
//! Validation runs before any firing; a validation error leaves no partial
//! state behind.

use crate::graph::{DagSpec, DataId};
use crate::value::{CType, CValue};
use std::collections::BTreeMap;
use thiserror::Error;

/// Input and node validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Input name matches no top-level user-input data node
    #[error("unknown input name '{0}'")]
    UnknownInputName(String),

    /// Input value's type disagrees with the node's declared type
    #[error("input '{name}' type mismatch: expected {expected}, found {actual}")]
    InputTypeMismatch {
        name: String,
        expected: CType,
        actual: CType,
    },

    /// Input was already provided on a previous run of this execution
    #[error("input '{0}' already provided")]
    InputAlreadyProvided(String),

    /// Name matches no data node at all
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// Manually resolved value's type disagrees with the node's declared
    /// type
    #[error("node '{name}' type mismatch: expected {expected}, found {actual}")]
    NodeTypeMismatch {
        name: String,
        expected: CType,
        actual: CType,
    },

    /// Node already holds a value from a previous run of this execution
    #[error("node '{0}' already resolved")]
    NodeAlreadyResolved(String),

    /// Required inputs absent in a non-suspendable run
    #[error("missing required inputs: {0:?}")]
    MissingInputs(Vec<String>),
}

/// Result type for validation
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Outcome of initial-input validation
#[derive(Debug, Clone, Default)]
pub struct ValidatedInputs {
    /// Input values keyed by the data node they seed
    pub resolved: BTreeMap<DataId, CValue>,
    /// User-input nodes with no value yet, by primary name
    pub missing: BTreeMap<String, (DataId, CType)>,
}

/// Resolve an input name to a user-input data node: primary name first,
/// nickname fallback.
pub fn resolve_input_name(dag: &DagSpec, name: &str) -> Option<DataId> {
    let user_inputs = dag.user_input_ids();

    for id in &user_inputs {
        if dag.data.get(id).is_some_and(|node| node.name == name) {
            return Some(*id);
        }
    }
    for id in &user_inputs {
        if dag
            .data
            .get(id)
            .is_some_and(|node| node.nicknames.values().any(|nick| nick == name))
        {
            return Some(*id);
        }
    }
    None
}

/// Validate `inputs` against the graph's user-input nodes.
pub fn validate_initial_inputs(
    dag: &DagSpec,
    inputs: &BTreeMap<String, CValue>,
) -> ValidationResult<ValidatedInputs> {
    let mut resolved = BTreeMap::new();

    for (name, value) in inputs {
        let id = resolve_input_name(dag, name)
            .ok_or_else(|| ValidationError::UnknownInputName(name.clone()))?;
        let node = &dag.data[&id];
        let actual = value.ctype();
        if actual != node.ctype {
            return Err(ValidationError::InputTypeMismatch {
                name: name.clone(),
                expected: node.ctype.clone(),
                actual,
            });
        }
        resolved.insert(id, value.clone());
    }

    let mut missing = BTreeMap::new();
    for id in dag.user_input_ids() {
        if !resolved.contains_key(&id) {
            let node = &dag.data[&id];
            missing.insert(node.name.clone(), (id, node.ctype.clone()));
        }
    }

    Ok(ValidatedInputs { resolved, missing })
}
