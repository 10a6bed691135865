//! Module contract: the side-effecting computations fired by the scheduler.
//!
//! Implementations declare their schema through a [`ModuleNodeSpec`] and
//! receive inputs keyed by consumed parameter name. Outputs are checked
//! against the declared `produces` types before they reach the data table;
//! a disagreement is a contract violation reported as a failed firing, not
//! a crash.

use crate::graph::ModuleNodeSpec;
use crate::value::{CType, CValue};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by module bodies and input/output marshalling
#[derive(Error, Debug, Clone)]
pub enum ModuleError {
    /// Body-level failure
    #[error("{0}")]
    Failed(String),

    /// Declared input absent at call time
    #[error("missing input '{0}'")]
    MissingInput(String),

    /// Module produced no value for a declared output
    #[error("missing output '{0}'")]
    MissingOutput(String),

    /// Input value disagrees with the declared consumed type
    #[error("input '{name}' type mismatch: expected {expected}, found {actual}")]
    InputTypeMismatch {
        name: String,
        expected: CType,
        actual: CType,
    },

    /// Output value disagrees with the declared produced type
    #[error("output '{name}' type mismatch: expected {expected}, found {actual}")]
    OutputTypeMismatch {
        name: String,
        expected: CType,
        actual: CType,
    },
}

/// Result type for module calls
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Inputs handed to a module, keyed by consumed parameter name
#[derive(Debug, Clone, Default)]
pub struct ModuleInputs {
    values: BTreeMap<String, CValue>,
}

impl ModuleInputs {
    /// Wrap a parameter map
    pub fn new(values: BTreeMap<String, CValue>) -> Self {
        ModuleInputs { values }
    }

    /// Look up a parameter
    pub fn get(&self, name: &str) -> Option<&CValue> {
        self.values.get(name)
    }

    /// Look up a parameter, failing with `MissingInput` when absent
    pub fn require(&self, name: &str) -> ModuleResult<&CValue> {
        self.values
            .get(name)
            .ok_or_else(|| ModuleError::MissingInput(name.to_string()))
    }

    /// Require a string parameter
    pub fn require_str(&self, name: &str) -> ModuleResult<&str> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| ModuleError::InputTypeMismatch {
            name: name.to_string(),
            expected: CType::String,
            actual: value.ctype(),
        })
    }

    /// Require an integer parameter
    pub fn require_int(&self, name: &str) -> ModuleResult<i64> {
        let value = self.require(name)?;
        value.as_int().ok_or_else(|| ModuleError::InputTypeMismatch {
            name: name.to_string(),
            expected: CType::Int,
            actual: value.ctype(),
        })
    }

    /// Require a boolean parameter
    pub fn require_bool(&self, name: &str) -> ModuleResult<bool> {
        let value = self.require(name)?;
        value.as_bool().ok_or_else(|| ModuleError::InputTypeMismatch {
            name: name.to_string(),
            expected: CType::Boolean,
            actual: value.ctype(),
        })
    }

    /// Iterate parameters
    pub fn iter(&self) -> impl Iterator<Item = (&String, &CValue)> {
        self.values.iter()
    }
}

/// Output of a module call: values keyed by produced parameter name plus an
/// optional opaque context attached to the `Fired` status
#[derive(Debug, Clone, Default)]
pub struct ModuleOutput {
    pub values: BTreeMap<String, CValue>,
    pub context: Option<BTreeMap<String, Json>>,
}

impl ModuleOutput {
    /// Output with a single produced parameter
    pub fn single(name: impl Into<String>, value: CValue) -> Self {
        let mut values = BTreeMap::new();
        values.insert(name.into(), value);
        ModuleOutput {
            values,
            context: None,
        }
    }

    /// Output with several produced parameters
    pub fn new(values: BTreeMap<String, CValue>) -> Self {
        ModuleOutput {
            values,
            context: None,
        }
    }

    /// Attach a context entry
    pub fn with_context(mut self, key: impl Into<String>, value: Json) -> Self {
        self.context
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }
}

/// Per-module outcome of one run.
#[derive(Debug, Clone, Default)]
pub enum ModuleStatus {
    /// Never fired (blocked, skipped, or the run ended first)
    #[default]
    Unfired,
    /// Fired successfully
    Fired {
        latency: Duration,
        context: Option<BTreeMap<String, Json>>,
    },
    /// Fired and failed
    Failed { error: String },
    /// Timed out
    Timed { latency: Duration },
}

impl ModuleStatus {
    /// Status name used in suspension snapshots
    pub fn name(&self) -> &'static str {
        match self {
            ModuleStatus::Unfired => "Unfired",
            ModuleStatus::Fired { .. } => "Fired",
            ModuleStatus::Failed { .. } => "Failed",
            ModuleStatus::Timed { .. } => "Timed",
        }
    }

    /// True for `Fired`
    pub fn is_fired(&self) -> bool {
        matches!(self, ModuleStatus::Fired { .. })
    }
}

/// A module implementation bound into a pipeline.
#[async_trait]
pub trait Module: Send + Sync {
    /// The schema this implementation conforms to
    fn spec(&self) -> &ModuleNodeSpec;

    /// Execute with resolved inputs
    async fn call(&self, inputs: ModuleInputs) -> ModuleResult<ModuleOutput>;
}

type FnModuleBody =
    Arc<dyn Fn(ModuleInputs) -> BoxFuture<'static, ModuleResult<ModuleOutput>> + Send + Sync>;

/// Closure-backed module, mostly for hosts and tests that do not want a
/// dedicated type per module.
pub struct FnModule {
    spec: ModuleNodeSpec,
    body: FnModuleBody,
}

impl FnModule {
    /// Wrap an async closure as a module
    pub fn new<F, Fut>(spec: ModuleNodeSpec, f: F) -> Self
    where
        F: Fn(ModuleInputs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ModuleResult<ModuleOutput>> + Send + 'static,
    {
        FnModule {
            spec,
            body: Arc::new(move |inputs| -> BoxFuture<'static, ModuleResult<ModuleOutput>> {
                Box::pin(f(inputs))
            }),
        }
    }
}

#[async_trait]
impl Module for FnModule {
    fn spec(&self) -> &ModuleNodeSpec {
        &self.spec
    }

    async fn call(&self, inputs: ModuleInputs) -> ModuleResult<ModuleOutput> {
        (self.body)(inputs).await
    }
}

/// Check a module's output values against its declared `produces` schema.
pub fn check_output_types(
    spec: &ModuleNodeSpec,
    output: &ModuleOutput,
) -> ModuleResult<()> {
    for (name, expected) in &spec.produces {
        let Some(value) = output.values.get(name) else {
            return Err(ModuleError::MissingOutput(name.clone()));
        };
        let actual = value.ctype();
        if actual != *expected {
            return Err(ModuleError::OutputTypeMismatch {
                name: name.clone(),
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uppercase_module() -> FnModule {
        FnModule::new(
            ModuleNodeSpec::new(
                "Uppercase",
                [("text", CType::String)],
                [("result", CType::String)],
            ),
            |inputs: ModuleInputs| async move {
                let text = inputs.require_str("text")?.to_uppercase();
                Ok(ModuleOutput::single("result", CValue::str(text)))
            },
        )
    }

    #[tokio::test]
    async fn test_fn_module_calls_body() {
        let module = uppercase_module();
        let mut values = BTreeMap::new();
        values.insert("text".to_string(), CValue::str("hello"));
        let output = module.call(ModuleInputs::new(values)).await.unwrap();
        assert_eq!(
            output.values.get("result"),
            Some(&CValue::str("HELLO"))
        );
    }

    #[tokio::test]
    async fn test_typed_getters_reject_mismatch() {
        let module = uppercase_module();
        let mut values = BTreeMap::new();
        values.insert("text".to_string(), CValue::int(5));
        let err = module
            .call(ModuleInputs::new(values))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::InputTypeMismatch { .. }));
    }

    #[test]
    fn test_check_output_types() {
        let spec = ModuleNodeSpec::new(
            "M",
            Vec::<(&str, CType)>::new(),
            [("out", CType::Int)],
        );
        assert!(check_output_types(&spec, &ModuleOutput::single("out", CValue::int(1))).is_ok());

        let err =
            check_output_types(&spec, &ModuleOutput::single("out", CValue::str("x"))).unwrap_err();
        assert!(matches!(err, ModuleError::OutputTypeMismatch { .. }));
    }

    #[test]
    fn test_status_names() {
        assert_eq!(ModuleStatus::Unfired.name(), "Unfired");
        assert_eq!(
            ModuleStatus::Failed {
                error: "boom".to_string()
            }
            .name(),
            "Failed"
        );
    }
}
