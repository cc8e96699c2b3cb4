//! The expression data model: AIR, CIR, EIR, and the concurrent overlay
//! (spec.md §3's "Expression" sum type).
//!
//! Every field is a node-id reference into the enclosing [`Document`]'s
//! node map unless spec.md calls it out as inline data (a `var`/`assign`
//! *name*, a `lambda`'s parameter list, a literal's payload). Keeping
//! sub-expressions as ids rather than embedding them means the same
//! sub-expression node can be shared by several parents, exactly as
//! spec.md §3 describes the document: "a directed acyclic graph of nodes
//! identified by string IDs".
//!
//! Deserialization uses an internally-tagged `kind` discriminator matching
//! spec.md's expression names (`lit`, `var`, `ref`, `call`, ...). A few
//! variant names collide with Rust keywords (`if`, `for`); those are
//! spelled `IfExpr`/`ForExpr` etc. in Rust and renamed back to the bare
//! keyword for serde.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use spiral_value::{NodeId, Type};

/// Spec.md §3's literal payload: the same shape as `Value`, minus the
/// variants that cannot appear as document-literal data (closures, futures,
/// ref-cells, opaque handles, errors). Converting a `LiteralValue` into a
/// runtime `Value` is `eval::literal_to_value`, which also validates it
/// against the node's declared `Type` (spec.md §4.2: "container literals
/// validate shape and fail with TypeError on mismatch").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<LiteralValue>),
    Map(BTreeMap<String, LiteralValue>),
    Option(Option<Box<LiteralValue>>),
}

/// `ns:name` pair used by `call`, `airRef`, and `effect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpRef {
    pub ns: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Expression {
    // --- AIR ---
    Lit {
        #[serde(rename = "type")]
        ty: Type,
        value: LiteralValue,
    },
    Var {
        name: String,
    },
    Ref {
        id: NodeId,
    },
    Call {
        ns: String,
        name: String,
        args: Vec<NodeId>,
    },
    #[serde(rename = "if")]
    IfExpr {
        cond: NodeId,
        then: NodeId,
        #[serde(rename = "else")]
        else_: NodeId,
    },
    #[serde(rename = "let")]
    LetExpr {
        name: String,
        value: NodeId,
        body: NodeId,
    },
    AirRef {
        ns: String,
        name: String,
        args: Vec<NodeId>,
    },
    Predicate {
        name: String,
        value: NodeId,
    },

    // --- CIR ---
    Lambda {
        params: Vec<String>,
        body: NodeId,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        ty: Option<Type>,
    },
    CallExpr {
        #[serde(rename = "fn")]
        callee: NodeId,
        args: Vec<NodeId>,
    },
    Fix {
        #[serde(rename = "fn")]
        callee: NodeId,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        ty: Option<Type>,
    },

    // --- EIR ---
    Seq {
        first: NodeId,
        then: NodeId,
    },
    Assign {
        target: String,
        value: NodeId,
    },
    #[serde(rename = "while")]
    WhileExpr {
        cond: NodeId,
        body: NodeId,
    },
    #[serde(rename = "for")]
    ForExpr {
        var: String,
        init: NodeId,
        cond: NodeId,
        update: NodeId,
        body: NodeId,
    },
    Iter {
        var: String,
        iter: NodeId,
        body: NodeId,
    },
    Effect {
        op: OpRef,
        args: Vec<NodeId>,
    },
    RefCell {
        target: String,
    },
    Deref {
        target: String,
    },
    #[serde(rename = "try")]
    TryExpr {
        #[serde(rename = "tryBody")]
        try_body: NodeId,
        #[serde(rename = "catchParam")]
        catch_param: String,
        #[serde(rename = "catchBody")]
        catch_body: NodeId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<NodeId>,
    },

    // --- Concurrent overlay (EIR-async) ---
    Par {
        branches: Vec<NodeId>,
    },
    Spawn {
        task: NodeId,
    },
    Await {
        future: NodeId,
    },
    Channel {
        #[serde(default, rename = "bufferSize", skip_serializing_if = "Option::is_none")]
        buffer_size: Option<NodeId>,
    },
    Send {
        channel: NodeId,
        value: NodeId,
    },
    Recv {
        channel: NodeId,
    },
    Select {
        futures: Vec<NodeId>,
    },
    Race {
        tasks: Vec<NodeId>,
    },
}

impl Expression {
    /// Node ids this expression references directly as sub-nodes (used by
    /// the orchestrator's bound-node pass, §4.4 step 3, and for cycle
    /// detection). Does not include `var`/`assign`/`refCell`/`deref` names,
    /// which resolve through the environment or ref-cell store, not the
    /// node map.
    pub fn referenced_nodes(&self) -> Vec<&NodeId> {
        match self {
            Expression::Lit { .. } | Expression::Var { .. } | Expression::RefCell { .. } | Expression::Deref { .. } => {
                vec![]
            }
            Expression::Ref { id } => vec![id],
            Expression::Call { args, .. } | Expression::AirRef { args, .. } => args.iter().collect(),
            Expression::IfExpr { cond, then, else_ } => vec![cond, then, else_],
            Expression::LetExpr { value, body, .. } => vec![value, body],
            Expression::Predicate { value, .. } => vec![value],
            Expression::Lambda { body, .. } => vec![body],
            Expression::CallExpr { callee, args } => {
                let mut v = vec![callee];
                v.extend(args.iter());
                v
            }
            Expression::Fix { callee, .. } => vec![callee],
            Expression::Seq { first, then } => vec![first, then],
            Expression::Assign { value, .. } => vec![value],
            Expression::WhileExpr { cond, body } => vec![cond, body],
            Expression::ForExpr { init, cond, update, body, .. } => vec![init, cond, update, body],
            Expression::Iter { iter, body, .. } => vec![iter, body],
            Expression::Effect { args, .. } => args.iter().collect(),
            Expression::TryExpr { try_body, catch_body, fallback, .. } => {
                let mut v = vec![try_body, catch_body];
                v.extend(fallback.iter());
                v
            }
            Expression::Par { branches } => branches.iter().collect(),
            Expression::Spawn { task } => vec![task],
            Expression::Await { future } => vec![future],
            Expression::Channel { buffer_size } => buffer_size.iter().collect(),
            Expression::Send { channel, value } => vec![channel, value],
            Expression::Recv { channel } => vec![channel],
            Expression::Select { futures } => futures.iter().collect(),
            Expression::Race { tasks } => tasks.iter().collect(),
        }
    }

    /// Sub-nodes that are "bound" by this expression: evaluated on demand
    /// inside the binder rather than eagerly at top level (spec.md §4.4
    /// step 3, §9's "Bound-node on-demand evaluation").
    ///
    /// This covers every sub-node whose value depends on bindings the
    /// orchestrator's top-level walk does not have — a loop variable, a
    /// `seq`'s preceding side effect — and that must therefore be
    /// (re-)evaluated by its parent rather than visited standalone against
    /// `initial_env`. `while`'s `cond`/`body` and `for`/`iter`'s `body` run
    /// once per iteration against a loop-local environment; `for`'s `cond`/
    /// `update` likewise see the loop variable and must not run ahead of
    /// it. `for`'s `init` is the one exception: it evaluates exactly once,
    /// before the loop, against the same environment the top-level walk
    /// already uses, so it is safe (and, for a standalone `init` subnode,
    /// necessary) to visit independently. `seq`'s `first`/`then` run
    /// in the order its parent imposes, each against the previous step's
    /// extended environment, so visiting them standalone out of that order
    /// would re-run effects or miss assignments.
    pub fn bound_nodes(&self) -> Vec<&NodeId> {
        match self {
            Expression::IfExpr { then, else_, .. } => vec![then, else_],
            Expression::LetExpr { body, .. } => vec![body],
            Expression::Lambda { body, .. } => vec![body],
            Expression::Seq { first, then } => vec![first, then],
            Expression::WhileExpr { cond, body } => vec![cond, body],
            Expression::ForExpr { cond, update, body, .. } => vec![cond, update, body],
            Expression::Iter { body, .. } => vec![body],
            _ => vec![],
        }
    }
}
