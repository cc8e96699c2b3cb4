//! The ref-cell store: a document-scoped map of mutable, name-keyed value
//! slots (spec.md §3, §4.2's `refCell`/`deref`, §4.3's `assignRef`).
//!
//! Modeled on a global-registry-behind-a-mutex idiom (the same shape as
//! `seq-runtime/src/channel.rs`'s `CHANNEL_REGISTRY`): a single `Mutex`-
//! guarded map, keyed by an identifier, shared by `Arc` so every task
//! evaluating the same document sees the same cells (spec.md §5's
//! shared-resource table: "Ref-cell store ... All tasks of one document").
//!
//! This is deliberately *not* the async, mutex-per-cell `AsyncRefCell` from
//! spiral-engine::concurrency — that one exists for the concurrent overlay,
//! where spec.md §4.5 calls for per-cell FIFO-fair locking. Here, in the
//! synchronous evaluator, reads and writes never block, so a plain
//! `std::sync::Mutex` held for a few instructions is the right tool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::SpiralError;
use crate::value::Value;

#[derive(Debug, Default)]
struct Inner {
    cells: HashMap<String, Value>,
}

/// Cheaply cloneable handle to one document's ref-cell store.
#[derive(Debug, Clone, Default)]
pub struct RefCellStore(Arc<Mutex<Inner>>);

impl RefCellStore {
    pub fn new() -> Self {
        RefCellStore::default()
    }

    /// `refCell(target)`: creates the cell on first use, otherwise leaves
    /// its current value untouched (spec.md §3: "created by the first
    /// `refCell(target)` for a name").
    pub fn create_if_absent(&self, name: &str, initial: Value) {
        let mut inner = self.0.lock().expect("ref-cell store mutex poisoned");
        inner.cells.entry(name.to_string()).or_insert(initial);
    }

    /// `deref(target)`: spec.md §4.2 — "missing cell → DomainError".
    pub fn read(&self, name: &str) -> Result<Value, SpiralError> {
        let inner = self.0.lock().expect("ref-cell store mutex poisoned");
        inner
            .cells
            .get(name)
            .cloned()
            .ok_or_else(|| SpiralError::domain_error(format!("no ref-cell named {name}")))
    }

    /// `assign`/`assignRef`: writes (creating the cell if absent, per
    /// spec.md §4.3's `assignRef` contract: "creating one if absent").
    pub fn write(&self, name: &str, value: Value) {
        let mut inner = self.0.lock().expect("ref-cell store mutex poisoned");
        inner.cells.insert(name.to_string(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        let inner = self.0.lock().expect("ref-cell store mutex poisoned");
        inner.cells.contains_key(name)
    }
}
