//! The document model (spec.md §3): "Document — recognised top-level
//! fields only (`version`, `capabilities`, `functionSigs`, `airDefs`,
//! `nodes`, `result`). Unknown fields are stripped for any hashing/
//! canonicalisation."
//!
//! [`Document::from_json`] is where spec.md §4.4 step 1's validation lives:
//! "Build nodeMap: id → node. Reject documents with duplicate ids or a
//! result that does not exist." The `nodes` field arrives as a JSON array
//! of `{"id": ..., "node": {...}}` records (rather than an object keyed by
//! id) precisely so a duplicate id is observable at parse time instead of
//! silently collapsing the way a JSON object's repeated key would. The
//! node's own fields nest under `"node"` rather than sitting flat alongside
//! `"id"`, since a `ref` expression's target field is itself spelled `"id"`
//! (spec.md §3) and flattening the two would collide.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use spiral_value::{ErrorKind, NodeId, SpiralError};

use crate::cfg::{ChannelOp, CfgRegion, Instruction};
use crate::expr::Expression;

/// An AIR definition, resolved by `airRef` (spec.md §4.2: "looks up AIR
/// definition; creates a fresh env binding params to argument values;
/// evaluates definition body in that isolated env").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirDef {
    pub params: Vec<String>,
    pub body: NodeId,
}

/// A document node: either an expression or a CFG region (spec.md §3:
/// "a block-node owns an ordered list of blocks and an entry block id").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Expr(Expression),
    Block(CfgRegion),
}

impl Node {
    pub fn is_block(&self) -> bool {
        matches!(self, Node::Block(_))
    }

    /// Node ids this node references directly, across both expression nodes
    /// (`Expression::referenced_nodes`) and block nodes (instructions whose
    /// operand is itself a node-id: `assign`'s value, `assignRef`'s value,
    /// `spawn`'s task, a `channelOp create`'s buffer size). Used for cycle
    /// detection (spec.md §3's DAG invariant) and has nothing to do with a
    /// block's own `BlockId` jump graph, which is local to the region.
    pub fn referenced_nodes(&self) -> Vec<&NodeId> {
        match self {
            Node::Expr(expr) => expr.referenced_nodes(),
            Node::Block(region) => {
                let mut out = Vec::new();
                for block in &region.blocks {
                    for instr in &block.instructions {
                        match instr {
                            Instruction::Assign { value, .. } | Instruction::AssignRef { value, .. } => {
                                out.push(value)
                            }
                            Instruction::Spawn { task, .. } => out.push(task),
                            Instruction::ChannelOp(ChannelOp::Create {
                                buffer_size: Some(id),
                                ..
                            }) => out.push(id),
                            _ => {}
                        }
                    }
                }
                out
            }
        }
    }
}

/// A SPIRAL document: the orchestrator's unit of work (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<serde_json::Value>,
    #[serde(default, rename = "functionSigs", skip_serializing_if = "Option::is_none")]
    pub function_sigs: Option<serde_json::Value>,
    #[serde(default, rename = "airDefs")]
    pub air_defs: BTreeMap<String, AirDef>,
    pub nodes: BTreeMap<NodeId, Node>,
    /// Document order of `nodes`, as the ids appeared in the input array.
    /// The orchestrator's top-level loop (spec.md §4.4 step 4: "For each
    /// non-bound node in document order") walks this, not `nodes`'
    /// alphabetical `BTreeMap` order. Defaults to `nodes`' key order for
    /// documents built programmatically via [`Document::new`], where no
    /// array ordering exists to preserve.
    #[serde(default)]
    pub order: Vec<NodeId>,
    pub result: NodeId,
}

impl Document {
    pub fn new(nodes: BTreeMap<NodeId, Node>, result: NodeId) -> Self {
        let order = nodes.keys().cloned().collect();
        Document {
            version: None,
            capabilities: None,
            function_sigs: None,
            air_defs: BTreeMap::new(),
            nodes,
            order,
            result,
        }
    }

    /// Parses and validates a document from its JSON form (spec.md §4.4
    /// step 1, plus the DAG invariant from §3). This is the one place a
    /// malformed or ill-formed document is rejected before evaluation ever
    /// begins; the evaluator itself assumes its input already passed this
    /// gate (spec.md §1: "the core assumes only: (a) validated IR documents
    /// on input").
    pub fn from_json(value: serde_json::Value) -> Result<Document, SpiralError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SpiralError::new(ErrorKind::ValidationError, "document must be a JSON object"))?;

        let version = match obj.get("version") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(SpiralError::new(ErrorKind::InvalidTypeFormat, "`version` must be a string"))
            }
        };
        let capabilities = obj.get("capabilities").cloned();
        let function_sigs = obj.get("functionSigs").cloned();
        let air_defs = match obj.get("airDefs") {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| SpiralError::new(ErrorKind::InvalidExprFormat, format!("airDefs: {e}")))?,
            None => BTreeMap::new(),
        };

        let nodes_value = obj
            .get("nodes")
            .ok_or_else(|| SpiralError::new(ErrorKind::MissingRequiredField, "missing `nodes`"))?;
        let nodes_array = nodes_value
            .as_array()
            .ok_or_else(|| SpiralError::new(ErrorKind::InvalidExprFormat, "`nodes` must be an array"))?;

        let mut nodes = BTreeMap::new();
        let mut order = Vec::with_capacity(nodes_array.len());
        for entry in nodes_array {
            let id_value = entry
                .get("id")
                .ok_or_else(|| SpiralError::new(ErrorKind::MissingRequiredField, "node is missing `id`"))?;
            let id_str = id_value
                .as_str()
                .ok_or_else(|| SpiralError::new(ErrorKind::InvalidIdFormat, "node `id` must be a string"))?;
            let id = NodeId::new(id_str);
            let node_value = entry
                .get("node")
                .ok_or_else(|| SpiralError::new(ErrorKind::MissingRequiredField, format!("node {id} is missing `node`")))?;
            let node: Node = serde_json::from_value(node_value.clone())
                .map_err(|e| SpiralError::new(ErrorKind::InvalidExprFormat, format!("node {id}: {e}")))?;
            if nodes.insert(id.clone(), node).is_some() {
                return Err(SpiralError::new(ErrorKind::DuplicateNodeId, format!("duplicate node id {id}")));
            }
            order.push(id);
        }

        let result_value = obj
            .get("result")
            .ok_or_else(|| SpiralError::new(ErrorKind::MissingRequiredField, "missing `result`"))?;
        let result_str = result_value
            .as_str()
            .ok_or_else(|| SpiralError::new(ErrorKind::InvalidIdFormat, "`result` must be a string"))?;
        let result = NodeId::new(result_str);
        if !nodes.contains_key(&result) {
            return Err(SpiralError::new(
                ErrorKind::InvalidResultReference,
                format!("result references unknown node {result}"),
            ));
        }

        let doc = Document {
            version,
            capabilities,
            function_sigs,
            air_defs,
            nodes,
            order,
            result,
        };
        doc.check_references_resolve()?;
        doc.check_acyclic()?;
        Ok(doc)
    }

    /// spec.md §3 invariant: "every reference resolves." Checked up front
    /// so a dangling `ref`/`spawn`/`assign` target surfaces as a document-
    /// level `DomainError` before any evaluation starts, rather than
    /// partway through a run.
    fn check_references_resolve(&self) -> Result<(), SpiralError> {
        for (id, node) in &self.nodes {
            for referenced in node.referenced_nodes() {
                if !self.nodes.contains_key(referenced) {
                    return Err(SpiralError::new(
                        ErrorKind::DomainError,
                        format!("node {id} references unknown node {referenced}"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// spec.md §3 invariant: "Expression references form a DAG; cycles are
    /// permitted only via `fix` or at φ-nodes." Neither of those exceptions
    /// shows up as a node-to-node back-edge in this graph — `fix` closes its
    /// recursive loop through the environment (spec.md §9), and a CFG's
    /// loop-back jumps move between `BlockId`s inside one region, never
    /// between document `NodeId`s — so a plain reachability cycle in the
    /// reference graph this function builds is unconditionally an error.
    fn check_acyclic(&self) -> Result<(), SpiralError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: std::collections::HashMap<&NodeId, Mark> = std::collections::HashMap::new();

        for start in self.nodes.keys() {
            if marks.contains_key(start) {
                continue;
            }
            let mut stack: Vec<(&NodeId, VecDeque<&NodeId>)> = vec![(start, self.node_refs(start))];
            marks.insert(start, Mark::Visiting);
            while let Some((current, refs)) = stack.last_mut() {
                match refs.pop_front() {
                    Some(next) => match marks.get(next) {
                        Some(Mark::Visiting) => {
                            return Err(SpiralError::new(
                                ErrorKind::CyclicReference,
                                format!("cyclic reference through node {next}"),
                            ))
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(next, Mark::Visiting);
                            stack.push((next, self.node_refs(next)));
                        }
                    },
                    None => {
                        marks.insert(current, Mark::Done);
                        stack.pop();
                    }
                }
            }
        }
        Ok(())
    }

    fn node_refs(&self, id: &NodeId) -> VecDeque<&NodeId> {
        self.nodes
            .get(id)
            .map(|n| n.referenced_nodes().into_iter().collect())
            .unwrap_or_default()
    }

    /// Node ids that must not be visited standalone by the orchestrator's
    /// top-level walk (spec.md §4.4 step 3, §9): a `let`/`if`/`lambda` body,
    /// a loop's condition/body/update, or a `seq` step — each only has a
    /// meaningful value inside the environment its binder threads through
    /// it, not against `initial_env`.
    ///
    /// This is a transitive closure, not just the direct structural fields
    /// [`Expression::bound_nodes`] names: once a node is bound, everything
    /// it in turn references is reachable only by *it* running (whenever
    /// its own ancestor runs), never standalone, so it inherits the same
    /// treatment. Without this, a loop's `cond`/`body` would be correctly
    /// excluded but a helper node they call through `core:*`/`assign` (an
    /// arithmetic step reading the loop variable, say) would still be
    /// walked on its own against `initial_env` and fail with
    /// `UnboundIdentifier` before the loop that actually defines it ever
    /// runs.
    pub fn bound_node_ids(&self) -> HashSet<NodeId> {
        let mut bound = HashSet::new();
        let mut frontier: VecDeque<NodeId> = VecDeque::new();
        for node in self.nodes.values() {
            if let Node::Expr(expr) = node {
                for id in expr.bound_nodes() {
                    if bound.insert(id.clone()) {
                        frontier.push_back(id.clone());
                    }
                }
            }
        }
        while let Some(id) = frontier.pop_front() {
            if let Some(node) = self.nodes.get(&id) {
                for child in node.referenced_nodes() {
                    if bound.insert(child.clone()) {
                        frontier.push_back(child.clone());
                    }
                }
            }
        }
        bound
    }
}
