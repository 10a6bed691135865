//! Top-level engine error sum.
//!
//! Subsystems keep their own error enums; this aggregates them at the
//! facade boundary so callers match on one type.

use crate::graph::GraphError;
use crate::runtime::RuntimeError;
use crate::suspend::{StoreError, SuspendError};
use crate::value::CodecError;
use thiserror::Error;

/// Engine-level errors surfaced by the [`crate::engine::Constellation`]
/// facade
#[derive(Error, Debug)]
pub enum EngineError {
    /// Run requested against an unknown pipeline reference
    #[error("pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Suspend(#[from] SuspendError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
