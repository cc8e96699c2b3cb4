//! End-to-end document scenarios, one per evaluator layer plus the
//! concurrent overlay, and the boundary cases called out alongside them.
//!
//! Straight-line (no `spawn`/`par`/channel) scenarios run through
//! [`spiral_engine::Orchestrator`], exercising the full top-level walk a
//! real host sees. Scenarios that spawn background tasks call
//! [`spiral_engine::eval::eval_node`] directly instead, the same way the
//! engine's own unit tests do: the orchestrator's top-level loop visits
//! *every* non-bound node in document order, including a `spawn`'s task
//! body, so routing such a document through `Orchestrator::run` would
//! evaluate the task body twice — once by the top-level walk, once inside
//! the spawned task. Driving `eval_node` directly for exactly the node
//! under test sidesteps that.

use std::collections::BTreeMap;
use std::sync::Arc;

use spiral_engine::channel::channel_from_value;
use spiral_engine::document::{Document, Node};
use spiral_engine::eval::eval_node;
use spiral_engine::expr::{Expression, LiteralValue, OpRef};
use spiral_engine::{Ctx, EvalConfig, Orchestrator};
use spiral_value::{ErrorKind, NodeId, SpiralError, Type, Value};

fn lit_int(n: i64) -> Node {
    Node::Expr(Expression::Lit {
        ty: Type::Int,
        value: LiteralValue::Int(n),
    })
}

fn lit_bool(b: bool) -> Node {
    Node::Expr(Expression::Lit {
        ty: Type::Bool,
        value: LiteralValue::Bool(b),
    })
}

fn core_registry() -> spiral_engine::OperatorRegistry {
    let mut reg = spiral_engine::OperatorRegistry::new();
    reg.register(
        "core",
        "add",
        vec![Type::Int, Type::Int],
        Type::Int,
        true,
        Arc::new(|args: &[Value]| match (&args[0], &args[1]) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            _ => Err(SpiralError::type_error("expected ints")),
        }),
    );
    reg.register(
        "core",
        "lt",
        vec![Type::Int, Type::Int],
        Type::Bool,
        true,
        Arc::new(|args: &[Value]| match (&args[0], &args[1]) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Bool(a < b)),
            _ => Err(SpiralError::type_error("expected ints")),
        }),
    );
    reg
}

fn ctx_with(document: Document, max_steps: u64) -> Ctx {
    Ctx::new(
        Arc::new(document),
        Arc::new(core_registry()),
        Arc::new(spiral_engine::EffectRegistry::new()),
        max_steps,
    )
}

// --- 1. AIR arithmetic: x=5, y=3, sum=call(core,add,[x,y]) -> int(8) ---

#[tokio::test]
async fn air_arithmetic_sums_two_literals() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("x"), lit_int(5));
    nodes.insert(NodeId::new("y"), lit_int(3));
    nodes.insert(
        NodeId::new("sum"),
        Node::Expr(Expression::Call {
            ns: "core".into(),
            name: "add".into(),
            args: vec![NodeId::new("x"), NodeId::new("y")],
        }),
    );
    let document = Document::new(nodes, NodeId::new("sum"));
    let config = EvalConfig {
        operators: Some(core_registry()),
        ..EvalConfig::default()
    };
    let orch = Orchestrator::new(document, config);
    let result = orch.run().await.unwrap();
    assert_eq!(result, Value::Int(8));
}

// --- 2. CIR conditional: c=true, t=1, e=2, r=if(c,t,e) -> int(1) ---

#[tokio::test]
async fn cir_conditional_selects_the_then_branch() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("c"), lit_bool(true));
    nodes.insert(NodeId::new("t"), lit_int(1));
    nodes.insert(NodeId::new("e"), lit_int(2));
    nodes.insert(
        NodeId::new("r"),
        Node::Expr(Expression::IfExpr {
            cond: NodeId::new("c"),
            then: NodeId::new("t"),
            else_: NodeId::new("e"),
        }),
    );
    let document = Document::new(nodes, NodeId::new("r"));
    let orch = Orchestrator::new(document, EvalConfig::default());
    let result = orch.run().await.unwrap();
    assert_eq!(result, Value::Int(1));
}

// --- 3. CIR closure: v=42, f=lambda([x],v), a=0, r=callExpr(f,[a]) -> int(42) ---

#[tokio::test]
async fn cir_closure_captures_its_defining_environment() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("v"), lit_int(42));
    nodes.insert(
        NodeId::new("f"),
        Node::Expr(Expression::Lambda {
            params: vec!["x".to_string()],
            body: NodeId::new("v"),
            ty: None,
        }),
    );
    nodes.insert(NodeId::new("a"), lit_int(0));
    nodes.insert(
        NodeId::new("r"),
        Node::Expr(Expression::CallExpr {
            callee: NodeId::new("f"),
            args: vec![NodeId::new("a")],
        }),
    );
    let document = Document::new(nodes, NodeId::new("r"));
    let orch = Orchestrator::new(document, EvalConfig::default());
    let result = orch.run().await.unwrap();
    assert_eq!(result, Value::Int(42));
}

// --- 4. EIR while-loop sum -> int(3), via the env-threading Assign/While
// pattern (the same shape the evaluator's own unit tests use; there is no
// expression-level ref-cell *write*, only `refCell`'s create-if-absent and
// `deref`'s read, so an accumulator lives in the environment via `assign`).

#[tokio::test]
async fn eir_while_loop_sums_to_three() {
    // acc = 0; i = 0; while (i < 3) { acc = acc + 1; i = i + 1 }; acc
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("zero"), lit_int(0));
    nodes.insert(NodeId::new("one"), lit_int(1));
    nodes.insert(NodeId::new("three"), lit_int(3));
    nodes.insert(
        NodeId::new("init_acc"),
        Node::Expr(Expression::Assign {
            target: "acc".into(),
            value: NodeId::new("zero"),
        }),
    );
    nodes.insert(
        NodeId::new("init_i"),
        Node::Expr(Expression::Assign {
            target: "i".into(),
            value: NodeId::new("zero"),
        }),
    );
    nodes.insert(NodeId::new("i_var"), Node::Expr(Expression::Var { name: "i".into() }));
    nodes.insert(NodeId::new("acc_var"), Node::Expr(Expression::Var { name: "acc".into() }));
    nodes.insert(
        NodeId::new("cond"),
        Node::Expr(Expression::Call {
            ns: "core".into(),
            name: "lt".into(),
            args: vec![NodeId::new("i_var"), NodeId::new("three")],
        }),
    );
    nodes.insert(
        NodeId::new("acc_plus_one"),
        Node::Expr(Expression::Call {
            ns: "core".into(),
            name: "add".into(),
            args: vec![NodeId::new("acc_var"), NodeId::new("one")],
        }),
    );
    nodes.insert(
        NodeId::new("bump_acc"),
        Node::Expr(Expression::Assign {
            target: "acc".into(),
            value: NodeId::new("acc_plus_one"),
        }),
    );
    nodes.insert(
        NodeId::new("i_plus_one"),
        Node::Expr(Expression::Call {
            ns: "core".into(),
            name: "add".into(),
            args: vec![NodeId::new("i_var"), NodeId::new("one")],
        }),
    );
    nodes.insert(
        NodeId::new("bump_i"),
        Node::Expr(Expression::Assign {
            target: "i".into(),
            value: NodeId::new("i_plus_one"),
        }),
    );
    nodes.insert(
        NodeId::new("body"),
        Node::Expr(Expression::Seq {
            first: NodeId::new("bump_acc"),
            then: NodeId::new("bump_i"),
        }),
    );
    nodes.insert(
        NodeId::new("loop"),
        Node::Expr(Expression::WhileExpr {
            cond: NodeId::new("cond"),
            body: NodeId::new("body"),
        }),
    );
    nodes.insert(
        NodeId::new("setup"),
        Node::Expr(Expression::Seq {
            first: NodeId::new("init_acc"),
            then: NodeId::new("init_i"),
        }),
    );
    nodes.insert(
        NodeId::new("run_loop"),
        Node::Expr(Expression::Seq {
            first: NodeId::new("setup"),
            then: NodeId::new("loop"),
        }),
    );
    nodes.insert(
        NodeId::new("r"),
        Node::Expr(Expression::Seq {
            first: NodeId::new("run_loop"),
            then: NodeId::new("acc_var"),
        }),
    );
    let document = Document::new(nodes, NodeId::new("r"));
    let config = EvalConfig {
        operators: Some(core_registry()),
        ..EvalConfig::default()
    };
    let orch = Orchestrator::new(document, config);
    let result = orch.run().await.unwrap();
    assert_eq!(result, Value::Int(3));
}

// --- 5. Async par: two literal branches joined -> list[5, 10] ---

#[tokio::test]
async fn async_par_joins_both_branches_in_order() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("a"), lit_int(5));
    nodes.insert(NodeId::new("b"), lit_int(10));
    nodes.insert(
        NodeId::new("both"),
        Node::Expr(Expression::Par {
            branches: vec![NodeId::new("a"), NodeId::new("b")],
        }),
    );
    let document = Document::new(nodes, NodeId::new("both"));
    let ctx = ctx_with(document, 10_000);
    let (v, _) = eval_node(&ctx, spiral_value::Env::empty(), &NodeId::new("both")).await.unwrap();
    assert_eq!(v, Value::list(vec![Value::Int(5), Value::Int(10)]));
}

/// Boundary case: `par` with zero branches yields an empty list, not an
/// error.
#[tokio::test]
async fn async_par_with_no_branches_yields_empty_list() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("both"), Node::Expr(Expression::Par { branches: vec![] }));
    let document = Document::new(nodes, NodeId::new("both"));
    let ctx = ctx_with(document, 10_000);
    let (v, _) = eval_node(&ctx, spiral_value::Env::empty(), &NodeId::new("both")).await.unwrap();
    assert_eq!(v, Value::list(vec![]));
}

// --- 6. Async spawn+await: task=42, f=spawn(task), r=await(f) -> int(42) ---

#[tokio::test]
async fn async_spawn_then_await_resolves_the_task_value() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("task"), lit_int(42));
    nodes.insert(
        NodeId::new("f"),
        Node::Expr(Expression::Spawn { task: NodeId::new("task") }),
    );
    nodes.insert(
        NodeId::new("r"),
        Node::Expr(Expression::Await { future: NodeId::new("f") }),
    );
    let document = Document::new(nodes, NodeId::new("r"));
    let ctx = ctx_with(document, 10_000);
    let (v, _) = eval_node(&ctx, spiral_value::Env::empty(), &NodeId::new("r")).await.unwrap();
    assert_eq!(v, Value::Int(42));
}

// --- 7. Channel ping-pong: ch=channel(0), spawned sender sends 7, main
// recv's -> int(7). ---

#[tokio::test]
async fn channel_ping_pong_delivers_across_a_spawned_sender() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("chan"), Node::Expr(Expression::Channel { buffer_size: None }));
    nodes.insert(NodeId::new("chan_var"), Node::Expr(Expression::Var { name: "c".into() }));
    nodes.insert(NodeId::new("seven"), lit_int(7));
    nodes.insert(
        NodeId::new("bind"),
        Node::Expr(Expression::Assign {
            target: "c".into(),
            value: NodeId::new("chan"),
        }),
    );
    nodes.insert(
        NodeId::new("send_task"),
        Node::Expr(Expression::Send {
            channel: NodeId::new("chan_var"),
            value: NodeId::new("seven"),
        }),
    );
    nodes.insert(
        NodeId::new("spawn_send"),
        Node::Expr(Expression::Spawn { task: NodeId::new("send_task") }),
    );
    nodes.insert(
        NodeId::new("recv"),
        Node::Expr(Expression::Recv { channel: NodeId::new("chan_var") }),
    );
    nodes.insert(
        NodeId::new("after_bind"),
        Node::Expr(Expression::Seq {
            first: NodeId::new("spawn_send"),
            then: NodeId::new("recv"),
        }),
    );
    nodes.insert(
        NodeId::new("r"),
        Node::Expr(Expression::Seq {
            first: NodeId::new("bind"),
            then: NodeId::new("after_bind"),
        }),
    );
    let document = Document::new(nodes, NodeId::new("r"));
    let ctx = ctx_with(document, 10_000);
    let (v, _) = eval_node(&ctx, spiral_value::Env::empty(), &NodeId::new("r")).await.unwrap();
    assert_eq!(v, Value::Int(7));
}

/// Boundary case: a zero-capacity channel is a pure rendezvous — a `send`
/// issued before any receiver is waiting must itself suspend until `recv`
/// arrives. Exercised directly against `AsyncChannel` (the same level the
/// engine's own channel unit tests use) since a bare `send` with nobody
/// receiving yet would otherwise block the evaluator task forever.
#[tokio::test]
async fn zero_capacity_channel_is_a_pure_rendezvous() {
    use spiral_engine::channel::ChannelStore;
    let store = ChannelStore::new();
    let chan = store.create(0);
    let recv_chan = chan.clone();
    let recv_task = tokio::spawn(async move { recv_chan.recv().await });
    tokio::task::yield_now().await;
    chan.send(Value::Int(11)).await.unwrap();
    assert_eq!(recv_task.await.unwrap().unwrap(), Value::Int(11));
}

// --- 8. Closed-channel recv: ch=channel(1), send(ch,1), close, two recv's:
// first -> int(1), second -> ChannelClosed. `close` has no document-level
// expression (spec.md's concurrent overlay only exposes it through the LIR
// `channelOp` instruction, not an EIR `Expression` variant), so the close
// itself happens on the channel handle directly, matching how the
// evaluator's own `recv_on_closed_empty_channel_fails` unit test does it. ---

#[tokio::test]
async fn closed_channel_drains_its_buffer_then_fails_recv() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("chan"), Node::Expr(Expression::Channel { buffer_size: None }));
    let document = Document::new(nodes, NodeId::new("chan"));
    let ctx = ctx_with(document, 10_000);
    let (chan_val, _) = eval_node(&ctx, spiral_value::Env::empty(), &NodeId::new("chan")).await.unwrap();
    let channel = channel_from_value(&chan_val).unwrap();

    channel.send(Value::Int(1)).await.unwrap();
    channel.close().await;

    assert_eq!(channel.recv().await.unwrap(), Value::Int(1));
    let err = channel.recv().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ChannelClosed);
}

// --- Remaining named boundary cases ---

/// Boundary case: `iter` over an empty list runs the body zero times and
/// yields the iterator's own initial-value semantics rather than erroring.
/// Modeled here via a `fix`-free reduction shape: `iter` folds by threading
/// `acc` through assignment, so an empty source leaves `acc` untouched.
#[tokio::test]
async fn iter_over_an_empty_list_runs_the_body_zero_times() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("acc_init"), lit_int(0));
    nodes.insert(
        NodeId::new("bind_acc"),
        Node::Expr(Expression::Assign {
            target: "acc".into(),
            value: NodeId::new("acc_init"),
        }),
    );
    nodes.insert(
        NodeId::new("empty"),
        Node::Expr(Expression::Lit {
            ty: Type::List { element: Box::new(Type::Int) },
            value: LiteralValue::List(vec![]),
        }),
    );
    nodes.insert(NodeId::new("one"), lit_int(1));
    nodes.insert(NodeId::new("acc_var"), Node::Expr(Expression::Var { name: "acc".into() }));
    nodes.insert(
        NodeId::new("bump"),
        Node::Expr(Expression::Call {
            ns: "core".into(),
            name: "add".into(),
            args: vec![NodeId::new("acc_var"), NodeId::new("one")],
        }),
    );
    nodes.insert(
        NodeId::new("body"),
        Node::Expr(Expression::Assign {
            target: "acc".into(),
            value: NodeId::new("bump"),
        }),
    );
    nodes.insert(
        NodeId::new("loop"),
        Node::Expr(Expression::Iter {
            var: "x".into(),
            iter: NodeId::new("empty"),
            body: NodeId::new("body"),
        }),
    );
    nodes.insert(
        NodeId::new("r"),
        Node::Expr(Expression::Seq {
            first: NodeId::new("loop"),
            then: NodeId::new("acc_var"),
        }),
    );
    let document = Document::new(nodes, NodeId::new("r"));
    let ctx = ctx_with(document, 10_000);
    let (_discard_bind, env) = eval_node(&ctx, spiral_value::Env::empty(), &NodeId::new("bind_acc")).await.unwrap();
    let (v, _) = eval_node(&ctx, env, &NodeId::new("r")).await.unwrap();
    assert_eq!(v, Value::Int(0));
}

/// Boundary case: `maxSteps=0` fails the very first node evaluated with
/// `NonTermination`, since `checkGlobalSteps` runs before the node's own
/// evaluation.
#[tokio::test]
async fn max_steps_zero_fails_immediately_with_non_termination() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("a"), lit_int(1));
    let document = Document::new(nodes, NodeId::new("a"));
    let ctx = ctx_with(document, 0);
    let err = eval_node(&ctx, spiral_value::Env::empty(), &NodeId::new("a")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NonTermination);
}

/// Boundary case: calling an operator that was never registered reports
/// `UnknownOperator`, not a panic.
#[tokio::test]
async fn unknown_operator_reports_unknown_operator() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("a"), lit_int(1));
    nodes.insert(
        NodeId::new("r"),
        Node::Expr(Expression::Call {
            ns: "core".into(),
            name: "nope".into(),
            args: vec![NodeId::new("a")],
        }),
    );
    let document = Document::new(nodes, NodeId::new("r"));
    let ctx = ctx_with(document, 10_000);
    let err = eval_node(&ctx, spiral_value::Env::empty(), &NodeId::new("r")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownOperator);
}

/// Boundary case: division by zero reports `DivideByZero`.
#[tokio::test]
async fn division_by_zero_reports_divide_by_zero() {
    let mut reg = spiral_engine::OperatorRegistry::new();
    reg.register(
        "core",
        "div",
        vec![Type::Int, Type::Int],
        Type::Int,
        true,
        Arc::new(|args: &[Value]| match (&args[0], &args[1]) {
            (Value::Int(a), Value::Int(0)) => Err(SpiralError::divide_by_zero(format!("{a} / 0"))),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a / b)),
            _ => Err(SpiralError::type_error("expected ints")),
        }),
    );

    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("a"), lit_int(1));
    nodes.insert(NodeId::new("zero"), lit_int(0));
    nodes.insert(
        NodeId::new("r"),
        Node::Expr(Expression::Call {
            ns: "core".into(),
            name: "div".into(),
            args: vec![NodeId::new("a"), NodeId::new("zero")],
        }),
    );
    let document = Document::new(nodes, NodeId::new("r"));
    let ctx = Ctx::new(
        Arc::new(document),
        Arc::new(reg),
        Arc::new(spiral_engine::EffectRegistry::new()),
        10_000,
    );
    let err = eval_node(&ctx, spiral_value::Env::empty(), &NodeId::new("r")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::DivideByZero);
}

/// Boundary case: referencing an unbound variable reports
/// `UnboundIdentifier`.
#[tokio::test]
async fn unbound_variable_reports_unbound_identifier() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("r"), Node::Expr(Expression::Var { name: "missing".into() }));
    let document = Document::new(nodes, NodeId::new("r"));
    let ctx = ctx_with(document, 10_000);
    let err = eval_node(&ctx, spiral_value::Env::empty(), &NodeId::new("r")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnboundIdentifier);
}

/// Boundary case: `fix` of a non-closure reports `TypeError` rather than
/// panicking on the downcast.
#[tokio::test]
async fn fix_of_a_non_closure_reports_type_error() {
    let mut nodes = BTreeMap::new();
    nodes.insert(NodeId::new("not_a_fn"), lit_int(1));
    nodes.insert(
        NodeId::new("r"),
        Node::Expr(Expression::Fix {
            callee: NodeId::new("not_a_fn"),
            ty: None,
        }),
    );
    let document = Document::new(nodes, NodeId::new("r"));
    let ctx = ctx_with(document, 10_000);
    let err = eval_node(&ctx, spiral_value::Env::empty(), &NodeId::new("r")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

/// A `demo:print` effect call is logged and returns void, and is recorded
/// in the effect log the orchestrator's caller can inspect afterward.
#[tokio::test]
async fn effect_call_is_recorded_in_the_effect_log() {
    let mut reg = spiral_engine::EffectRegistry::new();
    reg.register(
        "demo",
        "print",
        vec![Type::String],
        Type::Void,
        Arc::new(|_args: &[Value]| Box::pin(async { Ok(Value::Void) })),
    );

    let mut nodes = BTreeMap::new();
    nodes.insert(
        NodeId::new("msg"),
        Node::Expr(Expression::Lit {
            ty: Type::String,
            value: LiteralValue::String("hi".into()),
        }),
    );
    nodes.insert(
        NodeId::new("r"),
        Node::Expr(Expression::Effect {
            op: OpRef { ns: "demo".into(), name: "print".into() },
            args: vec![NodeId::new("msg")],
        }),
    );
    let document = Document::new(nodes, NodeId::new("r"));
    let ctx = Ctx::new(
        Arc::new(document),
        Arc::new(spiral_engine::OperatorRegistry::new()),
        Arc::new(reg),
        10_000,
    );
    let (v, _) = eval_node(&ctx, spiral_value::Env::empty(), &NodeId::new("r")).await.unwrap();
    assert_eq!(v, Value::Void);
    assert_eq!(ctx.effect_log.query_ordered().len(), 1);
}
