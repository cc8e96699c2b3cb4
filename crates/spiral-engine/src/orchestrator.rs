//! The document orchestrator (spec.md §4.4): "Owns the top-level evaluation
//! loop over a validated document and produces the document's final value."
//!
//! The orchestrator is deliberately thin — almost everything it needs
//! already lives on [`Ctx`] or [`Document`]. Its whole job is: validate (via
//! [`Document::from_json`], done before construction), find the bound
//! nodes, walk the rest in document order memoizing each one, stop early on
//! the first error value, then resolve the document's declared result.

use std::sync::Arc;

use spiral_value::{Env, NodeId, SpiralError, Value};
use tracing::{debug, trace};

use crate::config::EvalConfig;
use crate::ctx::Ctx;
use crate::document::Document;
use crate::eval::eval_node;
use crate::registry::{EffectRegistry, OperatorRegistry};

pub struct Orchestrator {
    ctx: Ctx,
    trace: bool,
    /// The environment top-level nodes evaluate against (spec.md §6:
    /// "Initial environment mapping"). Built once from `EvalConfig.inputs`
    /// via [`Env::with_bindings`]; empty when a caller supplies none.
    initial_env: Env,
}

impl Orchestrator {
    /// Builds an orchestrator for `document`, wiring in whichever operator
    /// and effect registries `config` supplies (empty registries otherwise —
    /// a document with no registered operators can still evaluate `lit`,
    /// `var`, `if`, and the other registry-free forms).
    pub fn new(document: Document, config: EvalConfig) -> Self {
        let operators = Arc::new(config.operators.unwrap_or_default());
        let effects = Arc::new(config.effects.unwrap_or_default());
        let initial_env = Env::with_bindings(config.inputs.clone());
        let ctx = Ctx::new(Arc::new(document), operators, effects, config.max_steps);
        Orchestrator { ctx, trace: config.trace, initial_env }
    }

    /// Constructs directly from an already-assembled [`Ctx`], for callers
    /// (tests, `spiral-cli`) that want to inspect the context — its effect
    /// log, its channel store — after the run completes. No initial
    /// environment bindings; use [`Orchestrator::new`] to supply `inputs`.
    pub fn from_ctx(ctx: Ctx, trace: bool) -> Self {
        Orchestrator { ctx, trace, initial_env: Env::empty() }
    }

    pub fn ctx(&self) -> &Ctx {
        &self.ctx
    }

    /// Runs the full document (spec.md §4.4 steps 1-5). Step 1's validation
    /// already happened in [`Document::from_json`]; what's left is:
    /// 2. find bound nodes, 3/4. evaluate and memoize every other node in
    /// document order (halting on the first error value), 5. resolve the
    /// declared result.
    pub async fn run(&self) -> Result<Value, SpiralError> {
        let bound = self.ctx.document.bound_node_ids();

        for id in &self.ctx.document.order {
            if bound.contains(id) {
                continue;
            }
            if self.trace {
                trace!(node = %id, "evaluating top-level node");
            }
            let value = self.eval_top_level(id).await?;
            if let Some(err) = value.as_error() {
                debug!(node = %id, kind = %err.kind, "node produced an error value, halting");
                return Ok(value);
            }
        }

        self.resolve_result().await
    }

    /// Evaluates and memoizes a single top-level node. A `SpiralError`
    /// surfacing from [`eval_node`] (an unbound identifier, a step-budget
    /// trip, an unknown operator, ...) is reified into a `Value::Error`
    /// here rather than left to propagate as a Rust `Err`: spec.md §7 is
    /// explicit that "all failures materialise as error values", and §4.4
    /// step 4's "if the result is an error, halt and return it" only makes
    /// sense if that error is itself a `Value` the orchestrator's own
    /// `Result<Value, _>` can carry as its `Ok` payload. `run`'s only
    /// remaining `Err` case is a genuine host-level failure (there are none
    /// at this layer today; the signature stays fallible for callers that
    /// build their own `Ctx`/`Orchestrator` wiring).
    async fn eval_top_level(&self, id: &NodeId) -> Result<Value, SpiralError> {
        if let Some(cached) = self.ctx.cached(id) {
            return Ok(cached);
        }
        let value = match eval_node(&self.ctx, self.initial_env.clone(), id).await {
            Ok((v, _env)) => v,
            Err(e) => Value::error(e),
        };
        self.ctx.memoize(id.clone(), value.clone());
        Ok(value)
    }

    /// The document's declared result (spec.md §4.4 step 5): read from the
    /// cache if it was a non-bound node visited by the loop above, otherwise
    /// (the result node is itself bound — unusual, but not forbidden)
    /// evaluated fresh against the initial environment.
    async fn resolve_result(&self) -> Result<Value, SpiralError> {
        if let Some(v) = self.ctx.cached(&self.ctx.document.result) {
            return Ok(v);
        }
        let value = match eval_node(&self.ctx, self.initial_env.clone(), &self.ctx.document.result).await {
            Ok((v, _env)) => v,
            Err(e) => Value::error(e),
        };
        Ok(value)
    }
}

/// Convenience constructor matching [`EvalConfig::default`]'s registries
/// plumbing, for callers that only have raw registries on hand rather than
/// a full `EvalConfig`.
pub fn orchestrator_with_registries(
    document: Document,
    operators: OperatorRegistry,
    effects: EffectRegistry,
    max_steps: u64,
) -> Orchestrator {
    let config = EvalConfig {
        operators: Some(operators),
        effects: Some(effects),
        max_steps,
        ..EvalConfig::default()
    };
    Orchestrator::new(document, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Node;
    use crate::expr::{Expression, LiteralValue};
    use spiral_value::Type;
    use std::collections::{BTreeMap, HashMap};

    fn lit_node(value: i64) -> Node {
        Node::Expr(Expression::Lit {
            ty: Type::Int,
            value: LiteralValue::Int(value),
        })
    }

    #[tokio::test]
    async fn runs_a_single_literal_document() {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::new("a"), lit_node(42));
        let document = Document::new(nodes, NodeId::new("a"));
        let orch = Orchestrator::new(document, EvalConfig::default());
        let result = orch.run().await.unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[tokio::test]
    async fn initial_env_inputs_are_visible_to_top_level_nodes() {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeId::new("r"),
            Node::Expr(Expression::Var { name: "seed".to_string() }),
        );
        let document = Document::new(nodes, NodeId::new("r"));
        let mut inputs = HashMap::new();
        inputs.insert("seed".to_string(), Value::Int(7));
        let config = EvalConfig { inputs, ..EvalConfig::default() };
        let orch = Orchestrator::new(document, config);
        let result = orch.run().await.unwrap();
        assert_eq!(result, Value::Int(7));
    }

    #[tokio::test]
    async fn skips_bound_nodes_at_top_level_but_still_resolves_them() {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::new("cond"), Node::Expr(Expression::Lit {
            ty: Type::Bool,
            value: LiteralValue::Bool(true),
        }));
        nodes.insert(NodeId::new("then"), lit_node(1));
        nodes.insert(NodeId::new("else"), lit_node(2));
        nodes.insert(
            NodeId::new("r"),
            Node::Expr(Expression::IfExpr {
                cond: NodeId::new("cond"),
                then: NodeId::new("then"),
                else_: NodeId::new("else"),
            }),
        );
        let document = Document::new(nodes, NodeId::new("r"));
        let orch = Orchestrator::new(document, EvalConfig::default());
        let result = orch.run().await.unwrap();
        assert_eq!(result, Value::Int(1));
        // `then`/`else` were never visited at top level.
        assert_eq!(orch.ctx().node_value_count(), 2);
    }

    #[tokio::test]
    async fn halts_early_on_an_error_value() {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeId::new("bad"),
            Node::Expr(Expression::Var { name: "missing".to_string() }),
        );
        nodes.insert(NodeId::new("after"), lit_node(1));
        let document = Document::new(nodes, NodeId::new("after"));
        let orch = Orchestrator::new(document, EvalConfig::default());
        let result = orch.run().await.unwrap();
        assert!(result.is_error());
    }
}
