//! Engine benchmarks: batching, the transform evaluator's hot path, codec
//! round trips, and a full single-module run.

use constellation::graph::compute_batches;
use constellation::transform::{self, InlineTransform};
use constellation::value::codec::{decode_value, encode_value};
use constellation::value::{CType, CValue, RawValue};
use constellation::{
    Config, Constellation, DagSpec, ExecutionOptions, FnModule, ModuleInputs, ModuleNodeSpec,
    ModuleOutput,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A chain of `depth` modules, each feeding the next
fn layered_dag(depth: usize) -> DagSpec {
    let mut b = DagSpec::builder("layered");
    let mut previous = b.data("input", CType::Int);
    for index in 0..depth {
        let next = b.data(format!("stage{index}"), CType::Int);
        let module = b.module(ModuleNodeSpec::new(
            format!("Stage{index}"),
            [(format!("in{index}"), CType::Int)],
            [(format!("stage{index}"), CType::Int)],
        ));
        b.nickname(previous, module, format!("in{index}"));
        b.consume(previous, module);
        b.produce(module, next);
        previous = next;
    }
    b.output("final", previous);
    b.build_unchecked()
}

fn bench_batching(c: &mut Criterion) {
    let dag = layered_dag(64);
    c.bench_function("compute_batches_64_layers", |b| {
        b.iter(|| compute_batches(black_box(&dag)).unwrap());
    });
}

fn bench_transform_evaluator(c: &mut Criterion) {
    let double: transform::MapFn = Arc::new(|v| match v {
        RawValue::Int(i) => Ok(RawValue::Int(i * 2)),
        other => Ok(other.clone()),
    });
    let map = InlineTransform::Map { f: double };
    let mut inputs = HashMap::new();
    inputs.insert(
        "source".to_string(),
        RawValue::IntList((0..1024).collect()),
    );

    c.bench_function("map_transform_1k_ints", |b| {
        b.iter(|| transform::evaluate(black_box(&map), black_box(&inputs)).unwrap());
    });
}

fn bench_codec(c: &mut Criterion) {
    let value = CValue::list(
        CType::Int,
        (0..256).map(CValue::int).collect(),
    )
    .unwrap();
    let encoded = encode_value(&value);

    c.bench_function("encode_int_list_256", |b| {
        b.iter(|| encode_value(black_box(&value)));
    });
    c.bench_function("decode_int_list_256", |b| {
        b.iter(|| decode_value(black_box(&encoded)).unwrap());
    });
}

fn bench_single_module_run(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let engine = Constellation::with_config(Config::default());
    let spec = ModuleNodeSpec::new(
        "Echo",
        [("input", CType::Int)],
        [("out", CType::Int)],
    );
    engine.set_module(Arc::new(FnModule::new(
        spec.clone(),
        |module_inputs: ModuleInputs| async move {
            let value = module_inputs.require_int("input")?;
            Ok(ModuleOutput::single("out", CValue::int(value)))
        },
    )));

    let mut b = DagSpec::builder("echo");
    let input = b.data("input", CType::Int);
    let out = b.data("out", CType::Int);
    let module = b.module(spec);
    b.consume(input, module);
    b.produce(module, out);
    b.output("out", out);
    let dag = Arc::new(b.build().unwrap());

    c.bench_function("single_module_run", |b| {
        b.iter(|| {
            let mut inputs = BTreeMap::new();
            inputs.insert("input".to_string(), CValue::int(1));
            runtime
                .block_on(engine.run(
                    Arc::clone(&dag),
                    inputs,
                    &ExecutionOptions::default(),
                ))
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_batching,
    bench_transform_evaluator,
    bench_codec,
    bench_single_module_run
);
criterion_main!(benches);
