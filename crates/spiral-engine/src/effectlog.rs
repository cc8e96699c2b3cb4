//! The concurrent effect log (spec.md §4.6): a monotonically numbered,
//! timestamped log of `(taskId, seqNum, effect)` records, the authoritative
//! observed order across tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use spiral_value::{TaskId, Value};

use crate::registry::OpKey;

#[derive(Debug, Clone)]
pub struct EffectLogEntry {
    pub task_id: TaskId,
    pub seq: u64,
    pub op: OpKey,
    pub args: Vec<Value>,
}

#[derive(Default)]
struct Inner {
    entries: Vec<EffectLogEntry>,
    next_seq: u64,
}

#[derive(Debug, Default)]
pub struct EffectLogStats {
    pub count_by_task: HashMap<TaskId, usize>,
    pub count_by_op: HashMap<OpKey, usize>,
}

/// Cloning an `EffectLog` shares the same underlying log (spec.md §5: "Any
/// task" may append).
#[derive(Clone, Default)]
pub struct EffectLog(Arc<Mutex<Inner>>);

impl EffectLog {
    pub fn new() -> Self {
        EffectLog::default()
    }

    /// Appends one record and returns its assigned sequence number.
    pub fn append(&self, task_id: TaskId, op: OpKey, args: Vec<Value>) -> u64 {
        let mut inner = self.0.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push(EffectLogEntry { task_id, seq, op, args });
        seq
    }

    /// All entries, already in seqNum order (append is monotonic).
    pub fn query_ordered(&self) -> Vec<EffectLogEntry> {
        self.0.lock().unwrap().entries.clone()
    }

    pub fn query_by_task(&self, task_id: TaskId) -> Vec<EffectLogEntry> {
        self.0
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Removes every entry belonging to `task_id` (spec.md §5: cancellation
    /// "removes their entries").
    pub fn discard_task(&self, task_id: TaskId) {
        self.0.lock().unwrap().entries.retain(|e| e.task_id != task_id);
    }

    pub fn clear(&self) {
        let mut inner = self.0.lock().unwrap();
        inner.entries.clear();
    }

    pub fn statistics(&self) -> EffectLogStats {
        let inner = self.0.lock().unwrap();
        let mut stats = EffectLogStats::default();
        for entry in &inner.entries {
            *stats.count_by_task.entry(entry.task_id).or_insert(0) += 1;
            *stats.count_by_op.entry(entry.op.clone()).or_insert(0) += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> OpKey {
        OpKey::new("demo", name)
    }

    #[test]
    fn append_assigns_increasing_seq_numbers() {
        let log = EffectLog::new();
        let task = TaskId::fresh();
        let a = log.append(task, key("a"), vec![]);
        let b = log.append(task, key("b"), vec![]);
        assert!(b > a);
    }

    #[test]
    fn discard_task_removes_only_that_tasks_entries() {
        let log = EffectLog::new();
        let t1 = TaskId::fresh();
        let t2 = TaskId::fresh();
        log.append(t1, key("a"), vec![]);
        log.append(t2, key("b"), vec![]);
        log.discard_task(t1);
        let remaining = log.query_ordered();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].task_id, t2);
    }

    #[test]
    fn statistics_count_by_task_and_op() {
        let log = EffectLog::new();
        let t1 = TaskId::fresh();
        log.append(t1, key("a"), vec![]);
        log.append(t1, key("a"), vec![]);
        log.append(t1, key("b"), vec![]);
        let stats = log.statistics();
        assert_eq!(stats.count_by_task[&t1], 3);
        assert_eq!(stats.count_by_op[&key("a")], 2);
        assert_eq!(stats.count_by_op[&key("b")], 1);
    }
}
