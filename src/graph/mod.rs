//! # Pipeline Graph Model
//!
//! A compiled pipeline is a [`DagSpec`]: module nodes (side-effecting
//! computations with declared input/output schemas), data nodes (typed
//! cells, some user-supplied, some module-produced, some derived by inline
//! transforms), and the directed edges between them.
//!
//! ## Node classification
//!
//! ```text
//! data node
//! ├── module-produced: appears as the target of an outEdge
//! └── top-level: no producing module
//!     ├── user input: no inline transform
//!     └── inline-derived: carries an inline transform
//! ```
//!
//! A data node outside `out_edges` and without a transform is a user input
//! regardless of its reachability from declared inputs; validation,
//! provenance, and missing-input collection all use this classification.
//!
//! `DagSpec` is immutable and compiler-produced; [`DagSpecBuilder`] exists
//! for hosts and tests that assemble graphs programmatically.

pub mod batching;
pub mod hash;

pub use batching::{compute_batches, Batch};

use crate::transform::InlineTransform;
use crate::value::CType;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a module node
pub type ModuleId = Uuid;

/// Identifier of a data node
pub type DataId = Uuid;

/// Graph construction and scheduling errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The module graph has a cycle; the set lists every module still
    /// blocked when layering stopped
    #[error("Cycle detected: blocked modules {module_ids:?}")]
    CycleDetected { module_ids: BTreeSet<ModuleId> },

    /// An edge references a module id absent from `modules`
    #[error("edge references unknown module {0}")]
    UnknownModule(ModuleId),

    /// An edge references a data id absent from `data`
    #[error("edge references unknown data node {0}")]
    UnknownData(DataId),

    /// An inEdge exists but the module does not consume the parameter the
    /// data node maps to it
    #[error("module '{module}' does not consume parameter '{param}'")]
    NotConsumed { module: String, param: String },

    /// An outEdge exists but the module does not produce the parameter
    #[error("module '{module}' does not produce parameter '{param}'")]
    NotProduced { module: String, param: String },

    /// A data node appears as the target of more than one outEdge
    #[error("data node '{0}' has more than one producing module")]
    MultipleProducers(String),
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Descriptive metadata of a module node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub major_version: u32,
    pub minor_version: u32,
}

impl ModuleMetadata {
    /// Metadata with just a name; everything else defaulted
    pub fn named(name: impl Into<String>) -> Self {
        ModuleMetadata {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            major_version: 1,
            minor_version: 0,
        }
    }
}

/// Per-module execution configuration carried by the graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Maximum time to wait for the module's inputs to resolve
    pub inputs_timeout: Option<Duration>,
    /// Maximum time for one invocation of the module body
    pub module_timeout: Option<Duration>,
}

/// Schema of a module node: what it consumes, what it produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNodeSpec {
    pub metadata: ModuleMetadata,
    /// Parameter name to expected input type
    pub consumes: BTreeMap<String, CType>,
    /// Parameter name to produced output type
    pub produces: BTreeMap<String, CType>,
    pub config: ModuleConfig,
    /// Opaque origin marker (source file, registry coordinate)
    pub definition_context: Option<String>,
}

impl ModuleNodeSpec {
    /// Spec with the given name and schemas
    pub fn new<I, O, S>(name: impl Into<String>, consumes: I, produces: O) -> Self
    where
        I: IntoIterator<Item = (S, CType)>,
        O: IntoIterator<Item = (S, CType)>,
        S: Into<String>,
    {
        ModuleNodeSpec {
            metadata: ModuleMetadata::named(name),
            consumes: consumes.into_iter().map(|(n, t)| (n.into(), t)).collect(),
            produces: produces.into_iter().map(|(n, t)| (n.into(), t)).collect(),
            config: ModuleConfig::default(),
            definition_context: None,
        }
    }
}

/// Spec of a data node
#[derive(Debug, Clone)]
pub struct DataNodeSpec {
    /// Primary external identifier
    pub name: String,
    /// Per-consumer aliases: consuming module id to the parameter name
    /// under which that module sees this data
    pub nicknames: BTreeMap<ModuleId, String>,
    pub ctype: CType,
    /// Present on derived nodes
    pub transform: Option<InlineTransform>,
    /// Transform parameter name to upstream data node
    pub transform_inputs: BTreeMap<String, DataId>,
}

impl DataNodeSpec {
    /// Plain data node (user input or module output)
    pub fn new(name: impl Into<String>, ctype: CType) -> Self {
        DataNodeSpec {
            name: name.into(),
            nicknames: BTreeMap::new(),
            ctype,
            transform: None,
            transform_inputs: BTreeMap::new(),
        }
    }

    /// Derived data node computed by an inline transform
    pub fn derived<I, S>(
        name: impl Into<String>,
        ctype: CType,
        transform: InlineTransform,
        transform_inputs: I,
    ) -> Self
    where
        I: IntoIterator<Item = (S, DataId)>,
        S: Into<String>,
    {
        DataNodeSpec {
            name: name.into(),
            nicknames: BTreeMap::new(),
            ctype,
            transform: Some(transform),
            transform_inputs: transform_inputs
                .into_iter()
                .map(|(n, id)| (n.into(), id))
                .collect(),
        }
    }

    /// True when this node carries an inline transform
    pub fn is_derived(&self) -> bool {
        self.transform.is_some()
    }
}

/// Descriptive metadata of the pipeline itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DagMetadata {
    pub name: String,
    pub description: String,
}

/// A compiled pipeline graph.
#[derive(Debug, Clone)]
pub struct DagSpec {
    pub metadata: DagMetadata,
    pub modules: BTreeMap<ModuleId, ModuleNodeSpec>,
    pub data: BTreeMap<DataId, DataNodeSpec>,
    /// (data consumed, consuming module)
    pub in_edges: BTreeSet<(DataId, ModuleId)>,
    /// (producing module, data produced)
    pub out_edges: BTreeSet<(ModuleId, DataId)>,
    /// Output names in declaration order
    pub declared_outputs: Vec<String>,
    /// Output name to the data node bound to it
    pub output_bindings: BTreeMap<String, DataId>,
}

impl DagSpec {
    /// Start building a pipeline graph
    pub fn builder(name: impl Into<String>) -> DagSpecBuilder {
        DagSpecBuilder::new(name)
    }

    /// Data ids produced by some module
    pub fn produced_data_ids(&self) -> BTreeSet<DataId> {
        self.out_edges.iter().map(|(_, data)| *data).collect()
    }

    /// The module producing `data`, if any
    pub fn producer_of(&self, data: DataId) -> Option<ModuleId> {
        self.out_edges
            .iter()
            .find(|(_, d)| *d == data)
            .map(|(m, _)| *m)
    }

    /// Modules consuming `data`
    pub fn consumers_of(&self, data: DataId) -> Vec<ModuleId> {
        self.in_edges
            .iter()
            .filter(|(d, _)| *d == data)
            .map(|(_, m)| *m)
            .collect()
    }

    /// Data ids with no producing module
    pub fn top_level_data_ids(&self) -> BTreeSet<DataId> {
        let produced = self.produced_data_ids();
        self.data
            .keys()
            .filter(|id| !produced.contains(id))
            .copied()
            .collect()
    }

    /// Top-level data nodes without an inline transform: the user inputs
    pub fn user_input_ids(&self) -> BTreeSet<DataId> {
        self.top_level_data_ids()
            .into_iter()
            .filter(|id| {
                self.data
                    .get(id)
                    .is_some_and(|node| !node.is_derived())
            })
            .collect()
    }

    /// Data nodes carrying an inline transform
    pub fn derived_ids(&self) -> BTreeSet<DataId> {
        self.data
            .iter()
            .filter(|(_, node)| node.is_derived())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Resolve a data node by primary name
    pub fn data_id_by_name(&self, name: &str) -> Option<DataId> {
        self.data
            .iter()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| *id)
    }

    /// The parameter name under which `module` sees `data`: the nickname
    /// registered for that module, else the node's primary name
    pub fn param_name(&self, data: DataId, module: ModuleId) -> Option<String> {
        let node = self.data.get(&data)?;
        Some(
            node.nicknames
                .get(&module)
                .cloned()
                .unwrap_or_else(|| node.name.clone()),
        )
    }

    /// The data node wired to consumed parameter `param` of `module`
    pub fn input_data_for(&self, module: ModuleId, param: &str) -> Option<DataId> {
        self.in_edges
            .iter()
            .filter(|(_, m)| *m == module)
            .map(|(d, _)| *d)
            .find(|d| self.param_name(*d, module).as_deref() == Some(param))
    }

    /// The data node wired to produced parameter `param` of `module`
    pub fn output_data_for(&self, module: ModuleId, param: &str) -> Option<DataId> {
        self.out_edges
            .iter()
            .filter(|(m, _)| *m == module)
            .map(|(_, d)| *d)
            .find(|d| self.param_name(*d, module).as_deref() == Some(param))
    }

    /// Check referential integrity, schema membership of every edge,
    /// single-writer discipline, and acyclicity.
    pub fn validate(&self) -> GraphResult<()> {
        for (data, module) in &self.in_edges {
            let node = self
                .data
                .get(data)
                .ok_or(GraphError::UnknownData(*data))?;
            let spec = self
                .modules
                .get(module)
                .ok_or(GraphError::UnknownModule(*module))?;
            let param = node
                .nicknames
                .get(module)
                .cloned()
                .unwrap_or_else(|| node.name.clone());
            if !spec.consumes.contains_key(&param) {
                return Err(GraphError::NotConsumed {
                    module: spec.metadata.name.clone(),
                    param,
                });
            }
        }

        let mut seen_targets: BTreeSet<DataId> = BTreeSet::new();
        for (module, data) in &self.out_edges {
            let node = self
                .data
                .get(data)
                .ok_or(GraphError::UnknownData(*data))?;
            let spec = self
                .modules
                .get(module)
                .ok_or(GraphError::UnknownModule(*module))?;
            let param = node
                .nicknames
                .get(module)
                .cloned()
                .unwrap_or_else(|| node.name.clone());
            if !spec.produces.contains_key(&param) {
                return Err(GraphError::NotProduced {
                    module: spec.metadata.name.clone(),
                    param,
                });
            }
            if !seen_targets.insert(*data) {
                return Err(GraphError::MultipleProducers(node.name.clone()));
            }
        }

        compute_batches(self).map(|_| ())
    }
}

/// Incremental assembly of a [`DagSpec`]. `build` validates the result.
pub struct DagSpecBuilder {
    dag: DagSpec,
}

impl DagSpecBuilder {
    /// New empty graph with the given pipeline name
    pub fn new(name: impl Into<String>) -> Self {
        DagSpecBuilder {
            dag: DagSpec {
                metadata: DagMetadata {
                    name: name.into(),
                    description: String::new(),
                },
                modules: BTreeMap::new(),
                data: BTreeMap::new(),
                in_edges: BTreeSet::new(),
                out_edges: BTreeSet::new(),
                declared_outputs: Vec::new(),
                output_bindings: BTreeMap::new(),
            },
        }
    }

    /// Register a module node
    pub fn module(&mut self, spec: ModuleNodeSpec) -> ModuleId {
        let id = Uuid::new_v4();
        self.dag.modules.insert(id, spec);
        id
    }

    /// Register a plain data node
    pub fn data(&mut self, name: impl Into<String>, ctype: CType) -> DataId {
        let id = Uuid::new_v4();
        self.dag.data.insert(id, DataNodeSpec::new(name, ctype));
        id
    }

    /// Register a derived data node
    pub fn derived<I, S>(
        &mut self,
        name: impl Into<String>,
        ctype: CType,
        transform: InlineTransform,
        transform_inputs: I,
    ) -> DataId
    where
        I: IntoIterator<Item = (S, DataId)>,
        S: Into<String>,
    {
        let id = Uuid::new_v4();
        self.dag.data.insert(
            id,
            DataNodeSpec::derived(name, ctype, transform, transform_inputs),
        );
        id
    }

    /// Alias `data` as parameter `param` for `module`
    pub fn nickname(&mut self, data: DataId, module: ModuleId, param: impl Into<String>) {
        if let Some(node) = self.dag.data.get_mut(&data) {
            node.nicknames.insert(module, param.into());
        }
    }

    /// Wire `data` into `module` (inEdge)
    pub fn consume(&mut self, data: DataId, module: ModuleId) {
        self.dag.in_edges.insert((data, module));
    }

    /// Wire `module` output into `data` (outEdge)
    pub fn produce(&mut self, module: ModuleId, data: DataId) {
        self.dag.out_edges.insert((module, data));
    }

    /// Declare output `name` bound to `data`
    pub fn output(&mut self, name: impl Into<String>, data: DataId) {
        let name = name.into();
        self.dag.declared_outputs.push(name.clone());
        self.dag.output_bindings.insert(name, data);
    }

    /// Validate and return the finished graph
    pub fn build(self) -> GraphResult<DagSpec> {
        self.dag.validate()?;
        Ok(self.dag)
    }

    /// Return the graph without validation. Scheduling will still reject
    /// cycles; referential holes surface as runtime invariant errors.
    pub fn build_unchecked(self) -> DagSpec {
        self.dag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uppercase_dag() -> DagSpec {
        let mut b = DagSpec::builder("uppercase");
        let text = b.data("text", CType::String);
        let result = b.data("result", CType::String);
        let module = b.module(ModuleNodeSpec::new(
            "Uppercase",
            [("text", CType::String)],
            [("result", CType::String)],
        ));
        b.consume(text, module);
        b.produce(module, result);
        b.output("result", result);
        b.build().unwrap()
    }

    #[test]
    fn test_classification() {
        let dag = uppercase_dag();
        let text = dag.data_id_by_name("text").unwrap();
        let result = dag.data_id_by_name("result").unwrap();

        assert_eq!(dag.user_input_ids(), BTreeSet::from([text]));
        assert_eq!(dag.produced_data_ids(), BTreeSet::from([result]));
        assert!(dag.producer_of(result).is_some());
        assert!(dag.producer_of(text).is_none());
    }

    #[test]
    fn test_nickname_wins_for_param_resolution() {
        let mut b = DagSpec::builder("nick");
        let data = b.data("payload", CType::Int);
        let sink = b.data("sink", CType::Int);
        let module = b.module(ModuleNodeSpec::new(
            "Consumer",
            [("value", CType::Int)],
            [("sink", CType::Int)],
        ));
        b.nickname(data, module, "value");
        b.consume(data, module);
        b.produce(module, sink);
        let dag = b.build().unwrap();

        assert_eq!(
            dag.param_name(data, module).as_deref(),
            Some("value")
        );
        assert_eq!(dag.input_data_for(module, "value"), Some(data));
    }

    #[test]
    fn test_validate_rejects_unconsumed_edge() {
        let mut b = DagSpec::builder("bad");
        let data = b.data("unexpected", CType::Int);
        let module = b.module(ModuleNodeSpec::new(
            "M",
            [("something_else", CType::Int)],
            Vec::<(&str, CType)>::new(),
        ));
        b.consume(data, module);
        let err = b.build().unwrap_err();
        assert!(matches!(err, GraphError::NotConsumed { .. }));
    }

    #[test]
    fn test_validate_rejects_double_producer() {
        let mut b = DagSpec::builder("bad");
        let out = b.data("out", CType::Int);
        let m1 = b.module(ModuleNodeSpec::new(
            "M1",
            Vec::<(&str, CType)>::new(),
            [("out", CType::Int)],
        ));
        let m2 = b.module(ModuleNodeSpec::new(
            "M2",
            Vec::<(&str, CType)>::new(),
            [("out", CType::Int)],
        ));
        b.produce(m1, out);
        b.produce(m2, out);
        let err = b.build().unwrap_err();
        assert!(matches!(err, GraphError::MultipleProducers(_)));
    }
}
