//! Topological batching of a pipeline graph.
//!
//! Kahn-style layering over modules only. Batch 0 carries the top-level
//! data nodes (user inputs plus derived nodes with no module dependencies)
//! and no modules. Batch *k* (k >= 1) carries every module whose consumed
//! data resolved in earlier batches, the data those modules produce, and
//! any derived node whose last dependency resolves in batch *k*.
//!
//! If layering stalls with modules unassigned, the graph has a cycle
//! (self-cycles included) and the blocked module ids are reported.

use super::{DagSpec, DataId, GraphError, GraphResult, ModuleId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One schedulable layer of the graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Modules fireable concurrently in this layer
    pub modules: Vec<ModuleId>,
    /// Data nodes that resolve in this layer
    pub data: Vec<DataId>,
}

/// Compute the batch sequence for `dag`.
pub fn compute_batches(dag: &DagSpec) -> GraphResult<Vec<Batch>> {
    let produced = dag.produced_data_ids();

    // Producer lookup for module-produced data
    let mut producer: HashMap<DataId, ModuleId> = HashMap::new();
    for (module, data) in &dag.out_edges {
        producer.insert(*data, *module);
    }

    // Consumed data per module
    let mut consumed: HashMap<ModuleId, Vec<DataId>> = HashMap::new();
    for module in dag.modules.keys() {
        consumed.insert(*module, Vec::new());
    }
    for (data, module) in &dag.in_edges {
        consumed.entry(*module).or_default().push(*data);
    }

    let mut data_batch: HashMap<DataId, usize> = HashMap::new();
    let mut module_batch: HashMap<ModuleId, usize> = HashMap::new();

    // Seed: top-level user inputs resolve in batch 0. Derived nodes join
    // the fixpoint below; module-produced data resolves with its producer.
    for (id, node) in &dag.data {
        if !produced.contains(id) && !node.is_derived() {
            data_batch.insert(*id, 0);
        }
    }

    loop {
        let mut progressed = false;

        // Derived data resolves once every transform input has a batch
        for (id, node) in &dag.data {
            if data_batch.contains_key(id) || !node.is_derived() || produced.contains(id) {
                continue;
            }
            let inputs: Vec<DataId> = node.transform_inputs.values().copied().collect();
            if inputs.iter().all(|input| data_batch.contains_key(input)) {
                let batch = inputs
                    .iter()
                    .map(|input| data_batch[input])
                    .max()
                    .unwrap_or(0);
                data_batch.insert(*id, batch);
                progressed = true;
            }
        }

        // A module fires one batch after its last consumed dependency
        for module in dag.modules.keys() {
            if module_batch.contains_key(module) {
                continue;
            }
            let deps = &consumed[module];
            if deps.iter().all(|data| data_batch.contains_key(data)) {
                let batch = deps
                    .iter()
                    .map(|data| data_batch[data])
                    .max()
                    .map_or(1, |latest| latest + 1);
                module_batch.insert(*module, batch);
                // Its outputs resolve in the same batch
                for (m, data) in &dag.out_edges {
                    if m == module {
                        data_batch.insert(*data, batch);
                    }
                }
                progressed = true;
            }
        }

        if !progressed {
            break;
        }
    }

    let blocked: BTreeSet<ModuleId> = dag
        .modules
        .keys()
        .filter(|module| !module_batch.contains_key(*module))
        .copied()
        .collect();
    if !blocked.is_empty() {
        return Err(GraphError::CycleDetected {
            module_ids: blocked,
        });
    }

    let last = module_batch
        .values()
        .copied()
        .chain(data_batch.values().copied())
        .max()
        .unwrap_or(0);

    let mut batches = vec![Batch::default(); last + 1];
    // BTreeMap iteration keeps batch contents deterministic
    let sorted_modules: BTreeMap<ModuleId, usize> = module_batch.into_iter().collect();
    for (module, batch) in sorted_modules {
        batches[batch].modules.push(module);
    }
    let sorted_data: BTreeMap<DataId, usize> = data_batch.into_iter().collect();
    for (data, batch) in sorted_data {
        batches[batch].data.push(data);
    }

    Ok(batches)
}
