//! The `Constellation` facade: module registry, pipeline registry, and the
//! run/resume entry points that assemble a [`DataSignature`] from a
//! finished run.

use crate::config::{init_tracing, Config};
use crate::error::{EngineError, EngineResult};
use crate::graph::{DagSpec, ModuleId};
use crate::metadata::{build_metadata, ExecutionMetadata};
use crate::module::Module;
use crate::runtime::{
    ExecutionOptions, ModuleBindings, ModuleCallOptions, RunReport, RunTermination, Runtime,
};
use crate::suspend::{resume as resume_run, ResumeRequest, SuspendedExecution};
use crate::value::CValue;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Suspended,
    Failed,
}

/// What a caller gets back from a run: outputs, metadata, and (when
/// suspended) the resumable record.
#[derive(Debug)]
pub struct DataSignature {
    pub status: RunStatus,
    pub outputs: BTreeMap<String, CValue>,
    pub metadata: ExecutionMetadata,
    /// The inputs this run was invoked with
    pub inputs: BTreeMap<String, CValue>,
    /// Present iff `status == Suspended`
    pub suspension: Option<Box<SuspendedExecution>>,
    /// Present iff `status == Failed`
    pub failure: Option<String>,
}

/// Engine facade: holds the configuration, the module registry, and the
/// named-pipeline registry.
pub struct Constellation {
    config: Config,
    runtime: Runtime,
    modules: RwLock<HashMap<String, Arc<dyn Module>>>,
    pipelines: RwLock<HashMap<String, Arc<DagSpec>>>,
}

impl Constellation {
    /// Load configuration from the default locations and initialize
    /// logging
    pub fn init() -> EngineResult<Self> {
        let config = Config::load()?;
        Ok(Self::with_config(config))
    }

    /// Build from an explicit configuration
    pub fn with_config(config: Config) -> Self {
        init_tracing(&config.logging);
        let runtime = Runtime::new().with_max_concurrency(config.max_concurrency());
        Constellation {
            config,
            runtime,
            modules: RwLock::new(HashMap::new()),
            pipelines: RwLock::new(HashMap::new()),
        }
    }

    /// The active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register (or replace) a module implementation, keyed by its
    /// declared name
    pub fn set_module(&self, module: Arc<dyn Module>) {
        let name = module.spec().metadata.name.clone();
        info!(module = %name, "module_registered");
        self.modules.write().insert(name, module);
    }

    /// Names of every registered module
    pub fn get_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up a module implementation by name
    pub fn get_module_by_name(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.read().get(name).cloned()
    }

    /// Register a loaded pipeline under a reference name
    pub fn register_pipeline(&self, reference: impl Into<String>, dag: Arc<DagSpec>) {
        self.pipelines.write().insert(reference.into(), dag);
    }

    /// Bind every module node of `dag` to a registered implementation
    fn bind(&self, dag: &DagSpec) -> EngineResult<ModuleBindings> {
        let registry = self.modules.read();
        let mut bindings: ModuleBindings = HashMap::new();
        for (id, spec) in &dag.modules {
            let implementation = registry
                .get(&spec.metadata.name)
                .cloned()
                .ok_or_else(|| {
                    EngineError::Runtime(crate::runtime::RuntimeError::ModuleNotBound(
                        spec.metadata.name.clone(),
                    ))
                })?;
            bindings.insert(*id, implementation);
        }
        Ok(bindings)
    }

    /// Run a loaded pipeline with the given inputs
    pub async fn run(
        &self,
        dag: Arc<DagSpec>,
        inputs: BTreeMap<String, CValue>,
        options: &ExecutionOptions,
    ) -> EngineResult<DataSignature> {
        self.run_with_module_options(dag, inputs, HashMap::new(), options)
            .await
    }

    /// Run with per-module invocation options layered over the run-level
    /// defaults
    pub async fn run_with_module_options(
        &self,
        dag: Arc<DagSpec>,
        inputs: BTreeMap<String, CValue>,
        module_options: HashMap<ModuleId, ModuleCallOptions>,
        options: &ExecutionOptions,
    ) -> EngineResult<DataSignature> {
        let bindings = self.bind(&dag)?;
        let report = self
            .runtime
            .execute(dag, &bindings, inputs.clone(), module_options, options)
            .await?;
        Ok(self.signature(report, inputs, options))
    }

    /// Run a pipeline previously registered under `reference`
    pub async fn run_ref(
        &self,
        reference: &str,
        inputs: BTreeMap<String, CValue>,
        options: &ExecutionOptions,
    ) -> EngineResult<DataSignature> {
        let dag = self
            .pipelines
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| EngineError::PipelineNotFound(reference.to_string()))?;
        self.run(dag, inputs, options).await
    }

    /// Resume a suspended execution
    pub async fn resume(
        &self,
        suspended: &SuspendedExecution,
        request: ResumeRequest,
        options: &ExecutionOptions,
    ) -> EngineResult<DataSignature> {
        let dag = request
            .dag
            .clone()
            .unwrap_or_else(|| Arc::clone(&suspended.dag));
        let bindings = self.bind(&dag)?;
        let inputs = request.additional_inputs.clone();
        let report = resume_run(&self.runtime, suspended, request, &bindings, options).await?;
        Ok(self.signature(report, inputs, options))
    }

    /// Breaker stats snapshot from this engine's runtime
    pub fn breaker_stats(&self) -> BTreeMap<String, crate::runtime::BreakerStats> {
        self.runtime.breaker_stats()
    }

    fn signature(
        &self,
        report: RunReport,
        inputs: BTreeMap<String, CValue>,
        options: &ExecutionOptions,
    ) -> DataSignature {
        let metadata = build_metadata(
            &report.state,
            &report.state.dag,
            options,
            report.started_at,
            report.completed_at,
            &report.input_names,
            &report.resolved_names,
        );
        let (status, suspension, failure) = match report.termination {
            RunTermination::Completed => (RunStatus::Completed, None, None),
            RunTermination::Suspended(suspension) => {
                (RunStatus::Suspended, Some(suspension), None)
            }
            RunTermination::Failed { error } => (RunStatus::Failed, None, Some(error)),
        };
        DataSignature {
            status,
            outputs: report.outputs,
            metadata,
            inputs,
            suspension,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ModuleNodeSpec;
    use crate::module::{FnModule, ModuleInputs, ModuleOutput};
    use crate::value::CType;

    fn engine_with_uppercase() -> (Constellation, Arc<DagSpec>) {
        let engine = Constellation::with_config(Config::default());

        let spec = ModuleNodeSpec::new(
            "Uppercase",
            [("text", CType::String)],
            [("result", CType::String)],
        );
        engine.set_module(Arc::new(FnModule::new(
            spec.clone(),
            |inputs: ModuleInputs| async move {
                let text = inputs.require_str("text")?.to_uppercase();
                Ok(ModuleOutput::single("result", CValue::str(text)))
            },
        )));

        let mut b = DagSpec::builder("uppercase");
        let text = b.data("text", CType::String);
        let result = b.data("result", CType::String);
        let module = b.module(spec);
        b.consume(text, module);
        b.produce(module, result);
        b.output("result", result);
        (engine, Arc::new(b.build().unwrap()))
    }

    #[tokio::test]
    async fn test_run_completes() {
        let (engine, dag) = engine_with_uppercase();
        let mut inputs = BTreeMap::new();
        inputs.insert("text".to_string(), CValue::str("hello"));

        let signature = engine
            .run(dag, inputs, &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(signature.status, RunStatus::Completed);
        assert_eq!(signature.outputs.get("result"), Some(&CValue::str("HELLO")));
        assert!(signature.suspension.is_none());
    }

    #[tokio::test]
    async fn test_run_ref_unknown_pipeline() {
        let (engine, _dag) = engine_with_uppercase();
        let err = engine
            .run_ref("nope", BTreeMap::new(), &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PipelineNotFound(_)));
    }

    #[tokio::test]
    async fn test_run_ref_registered_pipeline() {
        let (engine, dag) = engine_with_uppercase();
        engine.register_pipeline("upper", dag);

        let mut inputs = BTreeMap::new();
        inputs.insert("text".to_string(), CValue::str("abc"));
        let signature = engine
            .run_ref("upper", inputs, &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(signature.outputs.get("result"), Some(&CValue::str("ABC")));
    }

    #[test]
    fn test_module_registry() {
        let (engine, _dag) = engine_with_uppercase();
        assert_eq!(engine.get_modules(), vec!["Uppercase".to_string()]);
        assert!(engine.get_module_by_name("Uppercase").is_some());
        assert!(engine.get_module_by_name("Lowercase").is_none());
    }
}
