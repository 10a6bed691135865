//! Per-run shared state: the data table and the module-status table.
//!
//! The data table maps every data node to a write-once cell. The status
//! table is mutated only by the scheduler task after a child task joins,
//! and read afterwards by the metadata builder; a lock keeps the occasional
//! concurrent observer (stepped tooling) safe.

use super::cell::{CellAlreadySet, OneShotCell};
use crate::graph::{DagSpec, DataId, ModuleId};
use crate::module::ModuleStatus;
use crate::value::CValue;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Shared state of one run.
#[derive(Debug)]
pub struct RunState {
    /// Identity of the executing process; recorded for diagnostics
    pub process_uuid: Uuid,
    pub dag: Arc<DagSpec>,
    cells: HashMap<DataId, Arc<OneShotCell<CValue>>>,
    statuses: RwLock<HashMap<ModuleId, ModuleStatus>>,
}

impl RunState {
    /// Fresh state with one empty cell per data node and every module
    /// `Unfired`
    pub fn new(dag: Arc<DagSpec>) -> Self {
        let mut cells = HashMap::with_capacity(dag.data.len());
        for id in dag.data.keys() {
            cells.insert(*id, Arc::new(OneShotCell::new()));
        }
        let mut statuses = HashMap::with_capacity(dag.modules.len());
        for id in dag.modules.keys() {
            statuses.insert(*id, ModuleStatus::Unfired);
        }
        RunState {
            process_uuid: Uuid::new_v4(),
            dag,
            cells,
            statuses: RwLock::new(statuses),
        }
    }

    /// Fresh state drawing its table allocations from `pool`
    pub fn with_pool(dag: Arc<DagSpec>, pool: &RuntimePool) -> Self {
        let mut cells = pool.acquire_cells();
        for id in dag.data.keys() {
            cells.insert(*id, Arc::new(OneShotCell::new()));
        }
        let mut statuses = pool.acquire_statuses();
        for id in dag.modules.keys() {
            statuses.insert(*id, ModuleStatus::Unfired);
        }
        RunState {
            process_uuid: Uuid::new_v4(),
            dag,
            cells,
            statuses: RwLock::new(statuses),
        }
    }

    /// The cell backing `data`
    pub fn cell(&self, data: DataId) -> Option<Arc<OneShotCell<CValue>>> {
        self.cells.get(&data).cloned()
    }

    /// Write a data node's value; single-writer discipline makes a second
    /// write an error
    pub fn set_value(&self, data: DataId, value: CValue) -> Result<(), CellAlreadySet> {
        match self.cells.get(&data) {
            Some(cell) => cell.set(value),
            None => Err(CellAlreadySet),
        }
    }

    /// Non-blocking read of a data node's value
    pub fn value(&self, data: DataId) -> Option<CValue> {
        self.cells.get(&data).and_then(|cell| cell.try_get())
    }

    /// True once the data node's cell is filled
    pub fn is_resolved(&self, data: DataId) -> bool {
        self.cells
            .get(&data)
            .is_some_and(|cell| cell.is_set())
    }

    /// Snapshot of every resolved data node
    pub fn resolved_values(&self) -> BTreeMap<DataId, CValue> {
        self.cells
            .iter()
            .filter_map(|(id, cell)| cell.try_get().map(|value| (*id, value)))
            .collect()
    }

    /// Record a module's outcome
    pub fn set_status(&self, module: ModuleId, status: ModuleStatus) {
        self.statuses.write().insert(module, status);
    }

    /// A module's current status (`Unfired` when unknown)
    pub fn status(&self, module: ModuleId) -> ModuleStatus {
        self.statuses
            .read()
            .get(&module)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every module status
    pub fn statuses(&self) -> BTreeMap<ModuleId, ModuleStatus> {
        self.statuses
            .read()
            .iter()
            .map(|(id, status)| (*id, status.clone()))
            .collect()
    }

    /// True if any module failed or timed out
    pub fn has_failures(&self) -> bool {
        self.statuses
            .read()
            .values()
            .any(|status| matches!(status, ModuleStatus::Failed { .. } | ModuleStatus::Timed { .. }))
    }
}

/// Optional allocation reuse across runs.
///
/// One-shot cells cannot be recycled once written, but the table backing
/// them can: releasing a finished run's tables keeps their capacity for the
/// next run. Orthogonal to correctness; a runtime without a pool allocates
/// per run.
#[derive(Default)]
pub struct RuntimePool {
    cell_tables: Mutex<Vec<HashMap<DataId, Arc<OneShotCell<CValue>>>>>,
    status_tables: Mutex<Vec<HashMap<ModuleId, ModuleStatus>>>,
}

impl RuntimePool {
    /// Empty pool
    pub fn new() -> Self {
        RuntimePool::default()
    }

    fn acquire_cells(&self) -> HashMap<DataId, Arc<OneShotCell<CValue>>> {
        self.cell_tables.lock().pop().unwrap_or_default()
    }

    fn acquire_statuses(&self) -> HashMap<ModuleId, ModuleStatus> {
        self.status_tables.lock().pop().unwrap_or_default()
    }

    /// Return a finished run's tables to the pool
    pub fn release(&self, state: RunState) {
        let RunState {
            mut cells,
            statuses,
            ..
        } = state;
        cells.clear();
        self.cell_tables.lock().push(cells);

        let mut statuses = statuses.into_inner();
        statuses.clear();
        self.status_tables.lock().push(statuses);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ModuleNodeSpec;
    use crate::value::CType;

    fn tiny_dag() -> Arc<DagSpec> {
        let mut b = DagSpec::builder("tiny");
        let input = b.data("input", CType::Int);
        let output = b.data("output", CType::Int);
        let module = b.module(ModuleNodeSpec::new(
            "M",
            [("input", CType::Int)],
            [("output", CType::Int)],
        ));
        b.consume(input, module);
        b.produce(module, output);
        Arc::new(b.build().unwrap())
    }

    #[test]
    fn test_state_starts_empty_and_unfired() {
        let dag = tiny_dag();
        let state = RunState::new(Arc::clone(&dag));
        let input = dag.data_id_by_name("input").unwrap();
        let module = *dag.modules.keys().next().unwrap();

        assert_eq!(state.value(input), None);
        assert!(matches!(state.status(module), ModuleStatus::Unfired));
        assert!(!state.has_failures());
    }

    #[test]
    fn test_value_write_and_snapshot() {
        let dag = tiny_dag();
        let state = RunState::new(Arc::clone(&dag));
        let input = dag.data_id_by_name("input").unwrap();

        state.set_value(input, CValue::int(5)).unwrap();
        assert_eq!(state.value(input), Some(CValue::int(5)));
        assert!(state.set_value(input, CValue::int(6)).is_err());

        let resolved = state.resolved_values();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved.get(&input), Some(&CValue::int(5)));
    }

    #[test]
    fn test_pool_recycles_tables() {
        let pool = RuntimePool::new();
        let dag = tiny_dag();

        let state = RunState::with_pool(Arc::clone(&dag), &pool);
        let input = dag.data_id_by_name("input").unwrap();
        state.set_value(input, CValue::int(1)).unwrap();
        pool.release(state);

        // A recycled table starts empty again
        let state = RunState::with_pool(dag, &pool);
        assert_eq!(state.value(input), None);
    }
}
