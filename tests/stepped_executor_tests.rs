//! Stepped (interactive) executor tests
//!
//! Covers session lifecycle, per-node observability, derived nodes in
//! batch 0, output omission before completion, and value previews.

use constellation::graph::ModuleId;
use constellation::stepped::{NodeState, SteppedSession};
use constellation::transform::InlineTransform;
use constellation::value::{value_preview, CType, CValue};
use constellation::{
    DagSpec, FnModule, Module, ModuleInputs, ModuleNodeSpec, ModuleOutput,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

fn inputs(pairs: Vec<(&str, CValue)>) -> BTreeMap<String, CValue> {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// flag + raw -> derived label -> Stamp module -> stamped
fn mixed_pipeline() -> (Arc<DagSpec>, HashMap<ModuleId, Arc<dyn Module>>) {
    let mut b = DagSpec::builder("mixed");
    let flag = b.data("flag", CType::Boolean);
    let yes = b.data("yes", CType::String);
    let no = b.data("no", CType::String);
    let label = b.derived(
        "label",
        CType::String,
        InlineTransform::Conditional,
        [("cond", flag), ("thenBr", yes), ("elseBr", no)],
    );
    let stamped = b.data("stamped", CType::String);
    let spec = ModuleNodeSpec::new(
        "Stamp",
        [("label", CType::String)],
        [("stamped", CType::String)],
    );
    let module = b.module(spec.clone());
    b.consume(label, module);
    b.produce(module, stamped);
    b.output("stamped", stamped);
    let dag = Arc::new(b.build().unwrap());

    let implementation: Arc<dyn Module> = Arc::new(FnModule::new(
        spec,
        |module_inputs: ModuleInputs| async move {
            let label = module_inputs.require_str("label")?;
            Ok(ModuleOutput::single(
                "stamped",
                CValue::str(format!("[{label}]")),
            ))
        },
    ));
    let bindings = [(module, implementation)].into_iter().collect();
    (dag, bindings)
}

#[tokio::test]
async fn test_session_walks_batches_with_observable_state() {
    let (dag, bindings) = mixed_pipeline();
    let mut session = SteppedSession::create(
        "interactive-1",
        Arc::clone(&dag),
        bindings,
        HashMap::new(),
        inputs(vec![
            ("flag", CValue::boolean(false)),
            ("yes", CValue::str("picked-yes")),
            ("no", CValue::str("picked-no")),
        ]),
    )
    .unwrap();

    // Two batches: inputs + derived label, then the module
    assert_eq!(session.batch_count(), 2);

    session.initialize_runtime().unwrap();

    // Derived node completed during initialization (batch 0)
    let label = dag.data_id_by_name("label").unwrap();
    match session.node_state(label).unwrap() {
        NodeState::Completed {
            value: Some(value), ..
        } => assert_eq!(value, &CValue::str("picked-no")),
        other => panic!("expected completed label, got {other:?}"),
    }

    // Output omitted until its node completes
    assert!(session.get_outputs().is_empty());

    let complete = session.execute_next_batch().await.unwrap();
    assert!(complete);
    assert!(session.is_complete());
    assert_eq!(
        session.get_outputs().get("stamped"),
        Some(&CValue::str("[picked-no]"))
    );

    let stamped = dag.data_id_by_name("stamped").unwrap();
    assert_eq!(
        session.node_preview(stamped).unwrap(),
        "\"[picked-no]\""
    );
}

#[tokio::test]
async fn test_failed_module_marks_node_failed() {
    let mut b = DagSpec::builder("failing");
    let input = b.data("input", CType::Int);
    let out = b.data("out", CType::Int);
    let spec = ModuleNodeSpec::new(
        "Exploder",
        [("input", CType::Int)],
        [("out", CType::Int)],
    );
    let module = b.module(spec.clone());
    b.consume(input, module);
    b.produce(module, out);
    b.output("out", out);
    let dag = Arc::new(b.build().unwrap());

    let implementation: Arc<dyn Module> = Arc::new(FnModule::new(
        spec,
        |_: ModuleInputs| async move {
            Err(constellation::module::ModuleError::Failed(
                "no thanks".to_string(),
            ))
        },
    ));
    let bindings: HashMap<ModuleId, Arc<dyn Module>> =
        [(module, implementation)].into_iter().collect();

    let mut session = SteppedSession::create(
        "interactive-2",
        Arc::clone(&dag),
        bindings,
        HashMap::new(),
        inputs(vec![("input", CValue::int(1))]),
    )
    .unwrap();
    session.initialize_runtime().unwrap();
    session.execute_to_completion().await.unwrap();

    match session.node_state(module).unwrap() {
        NodeState::Failed { error } => assert!(error.contains("no thanks")),
        other => panic!("expected failed module, got {other:?}"),
    }
    // The output never completed, so it is omitted
    assert!(session.get_outputs().is_empty());
}

#[test]
fn test_value_preview_grammar() {
    let list = CValue::list(CType::Int, vec![CValue::int(1), CValue::int(2)]).unwrap();
    assert_eq!(value_preview(&list, 80), "[2 items]");

    let mut variants = BTreeMap::new();
    variants.insert("ok".to_string(), CType::Int);
    let union = CValue::union(variants, "ok", CValue::int(1)).unwrap();
    assert_eq!(value_preview(&union, 80), "ok(...)");

    assert_eq!(
        value_preview(&CValue::some(CValue::str("v")), 80),
        "Some(\"v\")"
    );

    // Boundary: exactly max stays, one over truncates, tiny max collapses
    let value = CValue::str("1234567890"); // renders as 12 chars
    assert_eq!(value_preview(&value, 12), "\"1234567890\"");
    assert_eq!(value_preview(&value, 11), "\"1234567...");
    assert_eq!(value_preview(&value, 2), "...");
}
