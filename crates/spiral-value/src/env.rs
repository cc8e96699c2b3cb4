//! The expression evaluator's environment (spec.md §4.2's `env ⊢ e ⇓ v`).
//!
//! This is the standard tree-walking-interpreter shape: an immutable
//! chain of frames, shared by `Arc` so that
//! "a later monotonic extension is visible inside [a previously captured]
//! closure" (design note in spec.md §9) falls out of ordinary reference
//! sharing rather than any special-casing — a closure just holds the `Env`
//! it was built with, and `assign` pushes new frames onto that same chain.
//!
//! `extend` never mutates a frame in place; it always returns a new `Env`
//! whose parent is the receiver. This is what spec.md §9 means by
//! "Implementations must not snapshot the environment by deep copy; use a
//! persistent map or an environment chain."

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::value::Value;

#[derive(Debug)]
enum Frame {
    Empty,
    Binding {
        parent: Env,
        name: String,
        value: Value,
    },
    /// A placeholder frame used by `fix` (spec.md §4.2, §9): the name is
    /// reserved before the value that should populate it is known. Lookups
    /// against an unfilled cell only happen if a closure body is invoked
    /// before `fix` finishes tying the knot, which would be a bug in the
    /// evaluator, not in the document, so it is reported as an internal
    /// `DomainError` rather than panicking.
    Recursive {
        parent: Env,
        name: String,
        cell: Arc<OnceLock<Value>>,
    },
}

/// An immutable, `Arc`-shared environment frame chain.
#[derive(Debug, Clone)]
pub struct Env(Arc<Frame>);

/// A handle returned by [`Env::extend_recursive`] that lets the caller fill
/// in the recursive binding exactly once, after the value that should
/// populate it has been computed.
pub struct RecHandle(Arc<OnceLock<Value>>);

impl RecHandle {
    /// Ties the knot. Called at most once per `fix` evaluation; a second
    /// call is a no-op (the cell keeps its first value), which can only
    /// happen if the same handle is reused, which the evaluator never does.
    pub fn fill(self, value: Value) {
        let _ = self.0.set(value);
    }
}

impl Env {
    pub fn empty() -> Env {
        Env(Arc::new(Frame::Empty))
    }

    /// Builds a fresh chain from a flat set of initial bindings (used for
    /// `EvalConfig.inputs` and for `airRef`'s isolated definition-call
    /// environments).
    pub fn with_bindings(bindings: impl IntoIterator<Item = (String, Value)>) -> Env {
        let mut env = Env::empty();
        for (name, value) in bindings {
            env = env.extend(name, value);
        }
        env
    }

    /// Returns a new environment with `name` bound to `value`, shadowing
    /// (but not destroying) any prior binding of the same name.
    #[must_use]
    pub fn extend(&self, name: impl Into<String>, value: Value) -> Env {
        Env(Arc::new(Frame::Binding {
            parent: self.clone(),
            name: name.into(),
            value,
        }))
    }

    /// Reserves `name` for a recursive binding; see [`RecHandle`].
    #[must_use]
    pub fn extend_recursive(&self, name: impl Into<String>) -> (Env, RecHandle) {
        let cell = Arc::new(OnceLock::new());
        let env = Env(Arc::new(Frame::Recursive {
            parent: self.clone(),
            name: name.into(),
            cell: cell.clone(),
        }));
        (env, RecHandle(cell))
    }

    /// Looks up `name`, walking outward through enclosing frames. Returns
    /// `None` on miss; the evaluator turns that into `UnboundIdentifier`.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut current = self;
        loop {
            match current.0.as_ref() {
                Frame::Empty => return None,
                Frame::Binding { parent, name: n, value } => {
                    if n == name {
                        return Some(value.clone());
                    }
                    current = parent;
                }
                Frame::Recursive { parent, name: n, cell } => {
                    if n == name {
                        return cell.get().cloned();
                    }
                    current = parent;
                }
            }
        }
    }

    /// Snapshot of all bindings visible from this frame, innermost wins.
    /// Used only for diagnostics/trace output, never on the evaluation hot
    /// path.
    pub fn to_map(&self) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        let mut current = self;
        loop {
            match current.0.as_ref() {
                Frame::Empty => return out,
                Frame::Binding { parent, name, value } => {
                    out.entry(name.clone()).or_insert_with(|| value.clone());
                    current = parent;
                }
                Frame::Recursive { parent, name, cell } => {
                    if let Some(v) = cell.get() {
                        out.entry(name.clone()).or_insert_with(|| v.clone());
                    }
                    current = parent;
                }
            }
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::empty()
    }
}
