//! A seed operator/effect registry (spec.md §4.1's "host code supplies
//! concrete effects ... via config; the core treats them opaquely" and
//! §1's "the built-in standard library of operators" being explicitly out
//! of scope).
//!
//! This is *a* convenience registry, not *the* SPIRAL standard library:
//! enough `core:*` arithmetic/comparison/logic/string/collection operators
//! to run every scenario in spec.md §8, plus a handful of deterministic
//! `demo:*` effects (`io:print`, `demo:sleep`, `demo:counter`) so
//! `spiral-cli` and the integration test suite have something to evaluate
//! against without a host wiring up real file-system/HTTP/timer
//! collaborators. Gated behind the `stdlib` feature (on by default) so a
//! host that wants only the bare evaluator can opt out.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use spiral_value::{SpiralError, Type, Value};

use crate::registry::{EffectRegistry, OperatorRegistry};

fn int_binop(
    reg: &mut OperatorRegistry,
    name: &str,
    f: impl Fn(i64, i64) -> Result<Value, SpiralError> + Send + Sync + 'static,
) {
    reg.register(
        "core",
        name,
        vec![Type::Int, Type::Int],
        Type::Int,
        true,
        Arc::new(move |args: &[Value]| match (&args[0], &args[1]) {
            (Value::Int(a), Value::Int(b)) => f(*a, *b),
            (a, b) => Err(SpiralError::type_error(format!(
                "core:{name} expects (int, int), found ({}, {})",
                a.type_tag(),
                b.type_tag()
            ))),
        }),
    );
}

fn cmp_op(reg: &mut OperatorRegistry, name: &str, f: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static) {
    reg.register(
        "core",
        name,
        vec![Type::Int, Type::Int],
        Type::Bool,
        true,
        Arc::new(move |args: &[Value]| Ok(Value::Bool(f(&args[0], &args[1])))),
    );
}

fn ordering_value(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Builds the seed operator registry (spec.md §4.1's `(ns,name) -> record`
/// table). Namespace `core` throughout.
pub fn operators() -> OperatorRegistry {
    let mut reg = OperatorRegistry::new();

    int_binop(&mut reg, "add", |a, b| Ok(Value::Int(a.wrapping_add(b))));
    int_binop(&mut reg, "sub", |a, b| Ok(Value::Int(a.wrapping_sub(b))));
    int_binop(&mut reg, "mul", |a, b| Ok(Value::Int(a.wrapping_mul(b))));
    int_binop(&mut reg, "div", |a, b| {
        if b == 0 {
            Err(SpiralError::divide_by_zero(format!("{a} / 0")))
        } else {
            Ok(Value::Int(a / b))
        }
    });
    int_binop(&mut reg, "mod", |a, b| {
        if b == 0 {
            Err(SpiralError::divide_by_zero(format!("{a} % 0")))
        } else {
            Ok(Value::Int(a % b))
        }
    });

    reg.register(
        "core",
        "neg",
        vec![Type::Int],
        Type::Int,
        true,
        Arc::new(|args: &[Value]| match &args[0] {
            Value::Int(a) => Ok(Value::Int(-a)),
            other => Err(SpiralError::type_error(format!("core:neg expects int, found {}", other.type_tag()))),
        }),
    );

    cmp_op(&mut reg, "lt", |a, b| ordering_value(a, b) == Some(std::cmp::Ordering::Less));
    cmp_op(&mut reg, "lte", |a, b| {
        matches!(ordering_value(a, b), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal))
    });
    cmp_op(&mut reg, "gt", |a, b| ordering_value(a, b) == Some(std::cmp::Ordering::Greater));
    cmp_op(&mut reg, "gte", |a, b| {
        matches!(ordering_value(a, b), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal))
    });
    reg.register(
        "core",
        "eq",
        vec![Type::Int, Type::Int],
        Type::Bool,
        true,
        Arc::new(|args: &[Value]| Ok(Value::Bool(args[0] == args[1]))),
    );
    reg.register(
        "core",
        "neq",
        vec![Type::Int, Type::Int],
        Type::Bool,
        true,
        Arc::new(|args: &[Value]| Ok(Value::Bool(args[0] != args[1]))),
    );

    reg.register(
        "core",
        "and",
        vec![Type::Bool, Type::Bool],
        Type::Bool,
        true,
        Arc::new(|args: &[Value]| match (&args[0], &args[1]) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a && *b)),
            _ => Err(SpiralError::type_error("core:and expects (bool, bool)")),
        }),
    );
    reg.register(
        "core",
        "or",
        vec![Type::Bool, Type::Bool],
        Type::Bool,
        true,
        Arc::new(|args: &[Value]| match (&args[0], &args[1]) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a || *b)),
            _ => Err(SpiralError::type_error("core:or expects (bool, bool)")),
        }),
    );
    reg.register(
        "core",
        "not",
        vec![Type::Bool],
        Type::Bool,
        true,
        Arc::new(|args: &[Value]| match &args[0] {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(SpiralError::type_error(format!("core:not expects bool, found {}", other.type_tag()))),
        }),
    );

    reg.register(
        "core",
        "concat",
        vec![Type::String, Type::String],
        Type::String,
        true,
        Arc::new(|args: &[Value]| match (&args[0], &args[1]) {
            (Value::String(a), Value::String(b)) => Ok(Value::string(format!("{a}{b}"))),
            _ => Err(SpiralError::type_error("core:concat expects (string, string)")),
        }),
    );

    reg.register(
        "core",
        "len",
        vec![],
        Type::Int,
        true,
        Arc::new(|args: &[Value]| match &args[0] {
            Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            Value::Set(items) => Ok(Value::Int(items.len() as i64)),
            Value::Map(entries) => Ok(Value::Int(entries.len() as i64)),
            other => Err(SpiralError::type_error(format!(
                "core:len expects string/list/set/map, found {}",
                other.type_tag()
            ))),
        }),
    );

    reg.register(
        "core",
        "get",
        vec![],
        Type::Option {
            element: Box::new(Type::Void),
        },
        true,
        Arc::new(|args: &[Value]| match (&args[0], &args[1]) {
            (Value::List(items), Value::Int(i)) => {
                let idx = usize::try_from(*i).ok();
                Ok(idx.and_then(|i| items.get(i).cloned()).map(Value::some).unwrap_or_else(Value::none))
            }
            (Value::Map(entries), Value::String(key)) => {
                Ok(entries.get(key.as_ref()).cloned().map(Value::some).unwrap_or_else(Value::none))
            }
            (a, b) => Err(SpiralError::type_error(format!(
                "core:get expects (list,int) or (map,string), found ({}, {})",
                a.type_tag(),
                b.type_tag()
            ))),
        }),
    );

    reg.register(
        "core",
        "push",
        vec![],
        Type::List {
            element: Box::new(Type::Void),
        },
        true,
        Arc::new(|args: &[Value]| match &args[0] {
            Value::List(items) => {
                let mut next = items.as_ref().clone();
                next.push(args[1].clone());
                Ok(Value::list(next))
            }
            other => Err(SpiralError::type_error(format!("core:push expects a list, found {}", other.type_tag()))),
        }),
    );

    reg
}

/// Builds the seed effect registry (spec.md §4.1). `demo` namespace
/// throughout, since these are explicitly a convenience seed, not any
/// contractual `io`/`time` standard effect set.
pub fn effects() -> EffectRegistry {
    let mut reg = EffectRegistry::new();

    reg.register(
        "demo",
        "print",
        vec![Type::String],
        Type::Void,
        Arc::new(|args: &[Value]| {
            let v = args[0].clone();
            Box::pin(async move {
                match &v {
                    Value::String(s) => tracing::info!(target: "spiral::effect::print", "{s}"),
                    other => tracing::info!(target: "spiral::effect::print", "{other:?}"),
                }
                Ok(Value::Void)
            })
        }),
    );

    // spec.md §5/§9: "Sleep is an async effect returning a future resolved
    // after a delay." This effect's own future *is* the delay; wrapping a
    // call to it in `spawn(...)` is what produces the future value a
    // document can `select`/`race` against for a timeout (spec.md §9's
    // open question about `setTimeout`-style mocks is resolved here by not
    // special-casing sleep at all: it composes with the existing
    // spawn/await machinery instead of inventing a second future type).
    reg.register(
        "demo",
        "sleep",
        vec![Type::Int],
        Type::Void,
        Arc::new(|args: &[Value]| {
            let millis = args[0].as_int().unwrap_or(0).max(0) as u64;
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
                Ok(Value::Void)
            })
        }),
    );

    let counter = Arc::new(AtomicI64::new(0));
    reg.register(
        "demo",
        "counter",
        vec![],
        Type::Int,
        Arc::new(move |_args: &[Value]| {
            let counter = counter.clone();
            Box::pin(async move { Ok(Value::Int(counter.fetch_add(1, Ordering::SeqCst))) })
        }),
    );

    reg
}
