//! The single evaluation context threaded through the expression evaluator
//! and the CFG interpreter (spec.md §4.4: "The orchestrator threads a
//! single evaluation context containing the node map, the value cache, the
//! environment..., the ref-cell store, the effect log, the step
//! counter/limit, and (for async) the scheduler and channel store").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use spiral_value::{NodeId, RefCellStore, TaskId, Value};

use crate::channel::ChannelStore;
use crate::document::Document;
use crate::effectlog::EffectLog;
use crate::registry::{EffectRegistry, OperatorRegistry};
use crate::scheduler::Scheduler;

/// Shared, `Clone`-cheap evaluation context. Every field is itself `Arc`-
/// backed (or a thin `Arc` wrapper), so cloning a `Ctx` to hand to a spawned
/// task is O(1) and all clones observe the same node-value cache, ref-cell
/// store, effect log, scheduler, and channel table.
#[derive(Clone)]
pub struct Ctx {
    pub document: Arc<Document>,
    node_values: Arc<Mutex<HashMap<NodeId, Value>>>,
    pub operators: Arc<OperatorRegistry>,
    pub effects: Arc<EffectRegistry>,
    pub refcells: RefCellStore,
    pub effect_log: EffectLog,
    pub scheduler: Scheduler,
    pub channels: ChannelStore,
    /// The task this `Ctx` is currently evaluating on behalf of, for effect-
    /// log attribution. `par`/`spawn`/`race` derive child contexts with
    /// [`Ctx::with_task`] rather than mutating this one, since every other
    /// field stays shared across the whole document's tasks.
    pub task_id: TaskId,
}

impl Ctx {
    pub fn new(
        document: Arc<Document>,
        operators: Arc<OperatorRegistry>,
        effects: Arc<EffectRegistry>,
        max_steps: u64,
    ) -> Self {
        Ctx {
            document,
            node_values: Arc::new(Mutex::new(HashMap::new())),
            operators,
            effects,
            refcells: RefCellStore::new(),
            effect_log: EffectLog::new(),
            scheduler: Scheduler::new(max_steps),
            channels: ChannelStore::new(),
            task_id: TaskId::MAIN,
        }
    }

    /// A context identical to this one (sharing every cache, registry,
    /// scheduler and store) but attributed to a different task.
    pub fn with_task(&self, task_id: TaskId) -> Self {
        Ctx {
            task_id,
            ..self.clone()
        }
    }

    pub fn cached(&self, id: &NodeId) -> Option<Value> {
        self.node_values.lock().unwrap().get(id).cloned()
    }

    pub fn memoize(&self, id: NodeId, value: Value) {
        self.node_values.lock().unwrap().insert(id, value);
    }

    pub fn node_value_count(&self) -> usize {
        self.node_values.lock().unwrap().len()
    }
}
