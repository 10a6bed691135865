//! End-to-end pipeline execution tests
//!
//! Covers:
//! - Single-module runs
//! - Diamond topologies and batch shapes
//! - Input validation failures before any firing
//! - Cycle rejection
//! - Suspension and resume round trips
//! - Retry exhaustion converted by fallback
//! - Inline-transform data nodes

use constellation::graph::compute_batches;
use constellation::transform::InlineTransform;
use constellation::value::{CType, CValue};
use constellation::{
    Config, Constellation, DagSpec, ExecutionOptions, FnModule, Module, ModuleInputs,
    ModuleNodeSpec, ModuleOutput, ResumeRequest, RunStatus,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

fn engine() -> Constellation {
    Constellation::with_config(Config::default())
}

fn inputs(pairs: Vec<(&str, CValue)>) -> BTreeMap<String, CValue> {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

fn uppercase_spec() -> ModuleNodeSpec {
    ModuleNodeSpec::new(
        "Uppercase",
        [("text", CType::String)],
        [("result", CType::String)],
    )
}

fn uppercase_module() -> Arc<dyn Module> {
    Arc::new(FnModule::new(uppercase_spec(), |inputs: ModuleInputs| async move {
        let text = inputs.require_str("text")?.to_uppercase();
        Ok(ModuleOutput::single("result", CValue::str(text)))
    }))
}

fn uppercase_dag() -> Arc<DagSpec> {
    let mut b = DagSpec::builder("uppercase");
    let text = b.data("text", CType::String);
    let result = b.data("result", CType::String);
    let module = b.module(uppercase_spec());
    b.consume(text, module);
    b.produce(module, result);
    b.output("result", result);
    Arc::new(b.build().unwrap())
}

// ============================================================================
// Scenario: single module
// ============================================================================

#[tokio::test]
async fn test_single_module_uppercase() {
    let engine = engine();
    engine.set_module(uppercase_module());

    let signature = engine
        .run(
            uppercase_dag(),
            inputs(vec![("text", CValue::str("hello"))]),
            &ExecutionOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(signature.status, RunStatus::Completed);
    assert_eq!(signature.outputs.get("result"), Some(&CValue::str("HELLO")));
}

// ============================================================================
// Scenario: diamond
// ============================================================================

fn passthrough(name: &str, in_param: &str, out_param: &str) -> (ModuleNodeSpec, Arc<dyn Module>) {
    let spec = ModuleNodeSpec::new(
        name,
        [(in_param.to_string(), CType::Int)],
        [(out_param.to_string(), CType::Int)],
    );
    let out_param = out_param.to_string();
    let in_param = in_param.to_string();
    let implementation: Arc<dyn Module> = Arc::new(FnModule::new(
        spec.clone(),
        move |module_inputs: ModuleInputs| {
            let in_param = in_param.clone();
            let out_param = out_param.clone();
            async move {
                let value = module_inputs.require_int(&in_param)?;
                Ok(ModuleOutput::single(out_param, CValue::int(value + 1)))
            }
        },
    ));
    (spec, implementation)
}

#[tokio::test]
async fn test_diamond_three_batches_and_result() {
    let engine = engine();
    let (spec1, impl1) = passthrough("M1", "input", "mid1");
    let (spec2, impl2) = passthrough("M2", "input", "mid2");
    engine.set_module(impl1);
    engine.set_module(impl2);

    let sum_spec = ModuleNodeSpec::new(
        "M3",
        [("mid1", CType::Int), ("mid2", CType::Int)],
        [("output", CType::Int)],
    );
    engine.set_module(Arc::new(FnModule::new(
        sum_spec.clone(),
        |module_inputs: ModuleInputs| async move {
            let a = module_inputs.require_int("mid1")?;
            let b = module_inputs.require_int("mid2")?;
            Ok(ModuleOutput::single("output", CValue::int(a + b)))
        },
    )));

    let mut b = DagSpec::builder("diamond");
    let input = b.data("input", CType::Int);
    let mid1 = b.data("mid1", CType::Int);
    let mid2 = b.data("mid2", CType::Int);
    let output = b.data("output", CType::Int);
    let m1 = b.module(spec1);
    let m2 = b.module(spec2);
    let m3 = b.module(sum_spec);
    b.consume(input, m1);
    b.consume(input, m2);
    b.produce(m1, mid1);
    b.produce(m2, mid2);
    b.consume(mid1, m3);
    b.consume(mid2, m3);
    b.produce(m3, output);
    b.output("output", output);
    let dag = Arc::new(b.build().unwrap());

    // Three batches: inputs, the two parallel middles, the join
    let batches = compute_batches(&dag).unwrap();
    assert_eq!(batches.len(), 3);
    assert!(batches[0].modules.is_empty());
    assert_eq!(batches[1].modules.len(), 2);
    assert_eq!(batches[2].modules, vec![m3]);

    let signature = engine
        .run(
            dag,
            inputs(vec![("input", CValue::int(10))]),
            &ExecutionOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(signature.status, RunStatus::Completed);
    // (10 + 1) + (10 + 1)
    assert_eq!(signature.outputs.get("output"), Some(&CValue::int(22)));
}

// ============================================================================
// Scenario: validation failure
// ============================================================================

#[tokio::test]
async fn test_type_mismatch_fails_before_any_firing() {
    let fired = Arc::new(AtomicU32::new(0));
    let fired_inner = Arc::clone(&fired);

    let engine = engine();
    engine.set_module(Arc::new(FnModule::new(
        uppercase_spec(),
        move |_: ModuleInputs| {
            let fired = Arc::clone(&fired_inner);
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
                Ok(ModuleOutput::single("result", CValue::str("x")))
            }
        },
    )));

    let err = engine
        .run(
            uppercase_dag(),
            inputs(vec![("text", CValue::int(123))]),
            &ExecutionOptions::default(),
        )
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("input 'text' type mismatch"), "{message}");
    assert!(message.contains("expected String"), "{message}");
    assert!(message.contains("found Int"), "{message}");
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_input_name_rejected() {
    let engine = engine();
    engine.set_module(uppercase_module());

    let err = engine
        .run(
            uppercase_dag(),
            inputs(vec![("nonsense", CValue::str("x"))]),
            &ExecutionOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unknown input name 'nonsense'"));
}

// ============================================================================
// Scenario: cycle
// ============================================================================

#[test]
fn test_cycle_detected_names_both_modules() {
    let mut b = DagSpec::builder("cycle");
    let data_a = b.data("dataA", CType::Int);
    let data_b = b.data("dataB", CType::Int);
    let m1 = b.module(ModuleNodeSpec::new(
        "M1",
        [("dataA", CType::Int)],
        [("dataB", CType::Int)],
    ));
    let m2 = b.module(ModuleNodeSpec::new(
        "M2",
        [("dataB", CType::Int)],
        [("dataA", CType::Int)],
    ));
    b.consume(data_a, m1);
    b.produce(m1, data_b);
    b.consume(data_b, m2);
    b.produce(m2, data_a);
    let dag = b.build_unchecked();

    let err = compute_batches(&dag).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Cycle detected"), "{message}");
    assert!(message.contains(&m1.to_string()), "{message}");
    assert!(message.contains(&m2.to_string()), "{message}");
}

// ============================================================================
// Scenario: suspension round trip
// ============================================================================

#[tokio::test]
async fn test_suspend_then_resume_completes() {
    let engine = engine();
    engine.set_module(uppercase_module());
    let dag = uppercase_dag();

    let suspended = engine
        .run(
            Arc::clone(&dag),
            BTreeMap::new(),
            &ExecutionOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(suspended.status, RunStatus::Suspended);
    let suspension = suspended.suspension.unwrap();
    assert_eq!(suspension.resumption_count, 0);
    assert_eq!(
        suspension.missing_inputs().keys().collect::<Vec<_>>(),
        vec!["text"]
    );

    let resumed = engine
        .resume(
            &suspension,
            ResumeRequest {
                additional_inputs: inputs(vec![("text", CValue::str("hi"))]),
                ..ResumeRequest::default()
            },
            &ExecutionOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.outputs.get("result"), Some(&CValue::str("HI")));
}

// ============================================================================
// Scenario: retry then fallback
// ============================================================================

#[tokio::test]
async fn test_retry_exhaustion_converted_by_fallback() {
    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_inner = Arc::clone(&attempts);

    let engine = engine();
    engine.set_module(Arc::new(FnModule::new(
        uppercase_spec(),
        move |_: ModuleInputs| {
            let attempts = Arc::clone(&attempts_inner);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(constellation::module::ModuleError::Failed(
                    "flaky".to_string(),
                ))
            }
        },
    )));

    let options = ExecutionOptions {
        retry: Some(2),
        fallback: Some(CValue::str("dflt")),
        ..ExecutionOptions::default()
    };
    let signature = engine
        .run(
            uppercase_dag(),
            inputs(vec![("text", CValue::str("anything"))]),
            &options,
        )
        .await
        .unwrap();

    // Fallback makes the run complete, with three attempts behind it
    assert_eq!(signature.status, RunStatus::Completed);
    assert_eq!(signature.outputs.get("result"), Some(&CValue::str("dflt")));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_exhaustion_without_fallback_fails_run() {
    let engine = engine();
    engine.set_module(Arc::new(FnModule::new(
        uppercase_spec(),
        |_: ModuleInputs| async move {
            Err(constellation::module::ModuleError::Failed(
                "flaky".to_string(),
            ))
        },
    )));

    let options = ExecutionOptions {
        retry: Some(1),
        ..ExecutionOptions::default()
    };
    let signature = engine
        .run(
            uppercase_dag(),
            inputs(vec![("text", CValue::str("x"))]),
            &options,
        )
        .await
        .unwrap();

    assert_eq!(signature.status, RunStatus::Failed);
    let failure = signature.failure.unwrap();
    assert!(failure.contains("attempt 1: flaky"), "{failure}");
    assert!(failure.contains("attempt 2: flaky"), "{failure}");
    assert!(signature.outputs.is_empty());
}

// ============================================================================
// Scenario: inline conditional
// ============================================================================

#[tokio::test]
async fn test_inline_conditional_selects_then_branch() {
    let mut b = DagSpec::builder("conditional");
    let cond = b.data("cond", CType::Boolean);
    let then_br = b.data("thenBr", CType::String);
    let else_br = b.data("elseBr", CType::String);
    let result = b.derived(
        "result",
        CType::String,
        InlineTransform::Conditional,
        [("cond", cond), ("thenBr", then_br), ("elseBr", else_br)],
    );
    b.output("result", result);
    let dag = Arc::new(b.build().unwrap());

    let engine = engine();
    let signature = engine
        .run(
            dag,
            inputs(vec![
                ("cond", CValue::boolean(true)),
                ("thenBr", CValue::str("yes")),
                ("elseBr", CValue::str("no")),
            ]),
            &ExecutionOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(signature.status, RunStatus::Completed);
    assert_eq!(signature.outputs.get("result"), Some(&CValue::str("yes")));
}

#[tokio::test]
async fn test_inline_transform_chain_collapses_in_one_batch() {
    // guard -> coalesce chain over plain inputs: no module batches at all
    let mut b = DagSpec::builder("chain");
    let cond = b.data("cond", CType::Boolean);
    let expr = b.data("expr", CType::Int);
    let fallback = b.data("fallback", CType::Int);
    let guarded = b.derived(
        "guarded",
        CType::optional(CType::Int),
        InlineTransform::Guard,
        [("cond", cond), ("expr", expr)],
    );
    let result = b.derived(
        "result",
        CType::Int,
        InlineTransform::Coalesce,
        [("left", guarded), ("right", fallback)],
    );
    b.output("result", result);
    let dag = Arc::new(b.build().unwrap());

    assert_eq!(compute_batches(&dag).unwrap().len(), 1);

    let engine = engine();
    let signature = engine
        .run(
            Arc::clone(&dag),
            inputs(vec![
                ("cond", CValue::boolean(false)),
                ("expr", CValue::int(1)),
                ("fallback", CValue::int(42)),
            ]),
            &ExecutionOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(signature.outputs.get("result"), Some(&CValue::int(42)));
}

// ============================================================================
// Failure propagation
// ============================================================================

#[tokio::test]
async fn test_upstream_failure_leaves_downstream_unfired() {
    let engine = engine();

    let failing_spec = ModuleNodeSpec::new(
        "Failing",
        [("input", CType::Int)],
        [("mid", CType::Int)],
    );
    engine.set_module(Arc::new(FnModule::new(
        failing_spec.clone(),
        |_: ModuleInputs| async move {
            Err(constellation::module::ModuleError::Failed(
                "boom".to_string(),
            ))
        },
    )));
    let (down_spec, down_impl) = passthrough("Down", "mid", "out");
    engine.set_module(down_impl);

    let mut b = DagSpec::builder("failure-chain");
    let input = b.data("input", CType::Int);
    let mid = b.data("mid", CType::Int);
    let out = b.data("out", CType::Int);
    let m1 = b.module(failing_spec);
    let m2 = b.module(down_spec);
    b.consume(input, m1);
    b.produce(m1, mid);
    b.consume(mid, m2);
    b.produce(m2, out);
    b.output("out", out);
    let dag = Arc::new(b.build().unwrap());

    let options = ExecutionOptions {
        include_timings: true,
        ..ExecutionOptions::default()
    };
    let signature = engine
        .run(dag, inputs(vec![("input", CValue::int(1))]), &options)
        .await
        .unwrap();

    assert_eq!(signature.status, RunStatus::Failed);
    assert!(signature.failure.unwrap().contains("Failing: boom"));
    assert!(signature.outputs.is_empty());
    // Neither module fired successfully, so timings are empty
    assert!(signature.metadata.node_timings.unwrap().is_empty());
}
