//! Execution metadata derived from a finished run.
//!
//! Timestamps and total duration are always populated. Everything else is
//! opt-in through the execution flags, and each field depends only on its
//! own flag.

use crate::graph::{DagSpec, DataId};
use crate::module::ModuleStatus;
use crate::runtime::{ExecutionOptions, RunState};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

/// How a data node's value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// Provided directly as an input
    FromInput,
    /// Resolved manually at resume time
    FromManualResolution,
    /// Produced by a module firing
    FromModuleExecution,
}

/// Report attached to a completed, suspended, or failed run.
#[derive(Debug, Clone)]
pub struct ExecutionMetadata {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// `completed_at - started_at` at nanosecond precision
    pub total_duration: Duration,
    /// Per-module latency, `Fired` modules only
    pub node_timings: Option<BTreeMap<String, Duration>>,
    /// Data name to value source: `"<input>"`, `"<inline-transform>"`, or
    /// the producing module's name
    pub provenance: Option<BTreeMap<String, String>>,
    /// Missing input name to every downstream node name it blocks
    pub blocked_graph: Option<BTreeMap<String, Vec<String>>>,
    pub resolution_sources: Option<BTreeMap<String, ResolutionSource>>,
}

/// Build metadata from a final run state.
pub fn build_metadata(
    state: &RunState,
    dag: &DagSpec,
    options: &ExecutionOptions,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    input_names: &BTreeSet<String>,
    resolved_names: &BTreeSet<String>,
) -> ExecutionMetadata {
    let total_duration = (completed_at - started_at)
        .to_std()
        .unwrap_or(Duration::ZERO);

    let node_timings = options.include_timings.then(|| {
        state
            .statuses()
            .into_iter()
            .filter_map(|(id, status)| match status {
                ModuleStatus::Fired { latency, .. } => {
                    // Defensive fallback for state/graph mismatches: the
                    // raw UUID keys the entry
                    let key = dag
                        .modules
                        .get(&id)
                        .map_or_else(|| id.to_string(), |spec| spec.metadata.name.clone());
                    Some((key, latency))
                }
                _ => None,
            })
            .collect()
    });

    let provenance = options.include_provenance.then(|| {
        let mut sources = BTreeMap::new();
        for (id, _) in state.resolved_values() {
            // Nodes present in state but absent from the graph are
            // silently skipped
            let Some(node) = dag.data.get(&id) else {
                continue;
            };
            let source = if let Some(producer) = dag.producer_of(id) {
                dag.modules
                    .get(&producer)
                    .map_or_else(|| producer.to_string(), |spec| spec.metadata.name.clone())
            } else if node.is_derived() {
                "<inline-transform>".to_string()
            } else {
                "<input>".to_string()
            };
            sources.insert(node.name.clone(), source);
        }
        sources
    });

    let blocked_graph = options
        .include_blocked_graph
        .then(|| build_blocked_graph(state, dag));

    let resolution_sources = options.include_resolution_sources.then(|| {
        let mut sources = BTreeMap::new();
        for (id, _) in state.resolved_values() {
            let Some(node) = dag.data.get(&id) else {
                continue;
            };
            // Manual resolution wins over input when a name appears in
            // both sets
            let source = if resolved_names.contains(&node.name) {
                ResolutionSource::FromManualResolution
            } else if input_names.contains(&node.name) {
                ResolutionSource::FromInput
            } else if dag.producer_of(id).is_some() {
                ResolutionSource::FromModuleExecution
            } else {
                continue;
            };
            sources.insert(node.name.clone(), source);
        }
        sources
    });

    ExecutionMetadata {
        started_at,
        completed_at,
        total_duration,
        node_timings,
        provenance,
        blocked_graph,
        resolution_sources,
    }
}

/// Every unresolved user input mapped to the node names transitively
/// blocked behind it, through both module edges and transform inputs.
fn build_blocked_graph(state: &RunState, dag: &DagSpec) -> BTreeMap<String, Vec<String>> {
    let mut blocked = BTreeMap::new();
    for input_id in dag.user_input_ids() {
        if state.is_resolved(input_id) {
            continue;
        }
        let Some(input_node) = dag.data.get(&input_id) else {
            continue;
        };

        let mut downstream: BTreeSet<String> = BTreeSet::new();
        let mut frontier: VecDeque<DataId> = VecDeque::from([input_id]);
        let mut visited: BTreeSet<DataId> = BTreeSet::from([input_id]);

        while let Some(current) = frontier.pop_front() {
            // Through modules consuming this node
            for module in dag.consumers_of(current) {
                for (m, produced) in &dag.out_edges {
                    if *m == module && visited.insert(*produced) {
                        if let Some(node) = dag.data.get(produced) {
                            downstream.insert(node.name.clone());
                        }
                        frontier.push_back(*produced);
                    }
                }
            }
            // Through derived nodes referencing this node
            for (id, node) in &dag.data {
                if node.transform_inputs.values().any(|input| *input == current)
                    && visited.insert(*id)
                {
                    downstream.insert(node.name.clone());
                    frontier.push_back(*id);
                }
            }
        }

        blocked.insert(input_node.name.clone(), downstream.into_iter().collect());
    }
    blocked
}
