//! Identifier newtypes shared across the evaluator, the CFG interpreter and
//! the scheduler.
//!
//! Keeping these as distinct types (rather than passing `String`/`u64`
//! around) means a node id can never be accidentally compared against a
//! task id, even though both are ultimately small owned values.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A document-scoped node identifier, as it appears in IR documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// A scheduler-scoped task identifier.
///
/// Generated by [`TaskId::fresh`], which draws from a process-wide atomic
/// counter. A document's scheduler never reuses an id within its lifetime,
/// satisfying the invariant in spec.md §3 ("A future's task id, once
/// created, is unique within its scheduler").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// The implicit task a document's top-level (non-spawned) evaluation
    /// runs as. `fresh()` never returns this id, since its counter starts
    /// at 1, so it is safe to use as a sentinel for effect-log attribution
    /// outside of any `spawn`.
    pub const MAIN: TaskId = TaskId(0);

    pub fn fresh() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// A scheduler-scoped channel identifier, minted the same way as [`TaskId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

impl ChannelId {
    pub fn fresh() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan#{}", self.0)
    }
}
