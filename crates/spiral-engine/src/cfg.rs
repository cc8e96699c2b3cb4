//! The LIR control-flow-graph data model (spec.md §3's "CFG (LIR)").
//!
//! Instructions whose operands are themselves expressions (`assign`'s
//! value, an `op`/`effect`'s arguments, a `branch`'s condition, ...) read
//! from two different namespaces, exactly as spec.md §4.3 describes:
//! - a `target`/variable name is always a plain string key into the block's
//!   local `vars` map, resolved with no further evaluation;
//! - an expression operand (`assign`'s `value`, `spawn`'s task body, a
//!   `channelOp`'s buffer size) is a [`NodeId`] into the enclosing
//!   document, re-entering the expression evaluator with an environment
//!   built from the current `vars` (so a referenced `var(name)` expression
//!   sees the CFG's locals).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use spiral_value::NodeId;

/// A block identifier, local to one CFG region (distinct from [`NodeId`],
/// which names document-level nodes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        BlockId(id.into())
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpRef {
    pub ns: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Instruction {
    Assign {
        target: String,
        value: NodeId,
    },
    Call {
        target: String,
        callee: String,
        args: Vec<String>,
    },
    Op {
        ns: String,
        name: String,
        target: String,
        args: Vec<String>,
    },
    Phi {
        target: String,
        /// predecessor block id -> local variable name
        sources: BTreeMap<String, String>,
    },
    Effect {
        op: OpRef,
        args: Vec<String>,
        target: String,
    },
    AssignRef {
        target: String,
        value: NodeId,
    },
    Spawn {
        target: String,
        task: NodeId,
    },
    ChannelOp(ChannelOp),
    Await {
        target: String,
        future: String,
    },
}

/// `channelOp`'s "unified entry for create/send/recv/close; argument shape
/// encodes which" (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ChannelOp {
    Create {
        target: String,
        #[serde(default, rename = "bufferSize", skip_serializing_if = "Option::is_none")]
        buffer_size: Option<NodeId>,
    },
    Send {
        channel: String,
        value: String,
    },
    Recv {
        channel: String,
        target: String,
    },
    Close {
        channel: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkBranch {
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub block: BlockId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Terminator {
    Jump {
        to: BlockId,
    },
    Branch {
        cond: String,
        then: BlockId,
        #[serde(rename = "else")]
        else_: BlockId,
    },
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    Exit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    Fork {
        branches: Vec<ForkBranch>,
        continuation: BlockId,
    },
    Join {
        tasks: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        results: Option<Vec<String>>,
        to: BlockId,
    },
    Suspend {
        future: String,
        #[serde(rename = "resumeBlock")]
        resume_block: BlockId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

/// A block-node's payload: an ordered list of blocks and an entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfgRegion {
    pub blocks: Vec<Block>,
    pub entry: BlockId,
}

impl CfgRegion {
    pub fn block(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| &b.id == id)
    }
}
