//! # Constellation Engine
//!
//! A typed dataflow DAG execution engine for heterogeneous computation
//! pipelines. A pipeline is a directed acyclic graph of module nodes
//! (side-effecting computations with declared schemas) and data nodes
//! (typed values: user-supplied, module-produced, or derived by inline
//! transforms). The engine validates inputs, computes topological batches,
//! fires modules concurrently per batch under resilience wrappers, and
//! returns the declared outputs with rich execution metadata.
//!
//! ## Pipeline of a run
//!
//! ```text
//! (DagSpec, inputs, options)
//!     ↓
//! [Validation]          → typed inputs + missing set
//!     ↓
//! [Batching]            → topological batches (cycle detection)
//!     ↓
//! [Scheduler]           → concurrent module firing per batch
//!     ├── [Wrappers]    → retry, timeout, backoff, fallback, breaker
//!     └── [Transforms]  → eager inline-derived node evaluation
//!     ↓
//! [Metadata Builder]    → timings, provenance, blocked graph
//!     ↓
//! DataSignature { status, outputs, metadata }
//! ```
//!
//! Missing inputs do not fail a suspendable run: everything reachable
//! fires, and the rest is captured as a [`suspend::SuspendedExecution`]
//! that can be persisted through a [`suspend::SuspensionStore`] and
//! resumed later, possibly in another process.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use constellation::{Constellation, ExecutionOptions};
//! use constellation::value::CValue;
//!
//! let engine = Constellation::init()?;
//! engine.set_module(uppercase_module());
//!
//! let mut inputs = std::collections::BTreeMap::new();
//! inputs.insert("text".to_string(), CValue::str("hello"));
//!
//! let signature = engine.run(pipeline, inputs, &ExecutionOptions::default()).await?;
//! assert_eq!(signature.outputs["result"], CValue::str("HELLO"));
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `value` | `CType`/`CValue`/`RawValue` and the JSON codec |
//! | `graph` | `DagSpec`, hashes, topological batching |
//! | `transform` | Inline-transform operators and evaluator |
//! | `module` | The `Module` contract and statuses |
//! | `runtime` | Scheduler, cells, wrappers, circuit breakers |
//! | `suspend` | Suspension records, resume, stores |
//! | `metadata` | Post-run metadata derivation |
//! | `stepped` | Batch-at-a-time interactive execution |
//! | `engine` | The `Constellation` facade |

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod metadata;
pub mod module;
pub mod runtime;
pub mod stepped;
pub mod suspend;
pub mod transform;
pub mod value;

// Facade re-exports
pub use config::Config;
pub use engine::{Constellation, DataSignature, RunStatus};
pub use error::{EngineError, EngineResult};
pub use graph::{DagSpec, DagSpecBuilder, DataNodeSpec, ModuleNodeSpec};
pub use metadata::{ExecutionMetadata, ResolutionSource};
pub use module::{FnModule, Module, ModuleInputs, ModuleOutput, ModuleStatus};
pub use runtime::{
    BackoffStrategy, CircuitBreakerConfig, ExecutionOptions, ModuleCallOptions, Runtime,
};
pub use suspend::{
    FileStore, MemoryStore, ResumeRequest, SuspendedExecution, SuspensionFilter, SuspensionStore,
};
pub use value::{CType, CValue, RawValue};
