//! Operator and effect registries (spec.md §4.1).
//!
//! Both map an `(ns, name)` pair to a record carrying parameter/return
//! types, a purity flag, and a host-supplied implementation closure.
//! Registration is additive and last-registration-wins for a given key,
//! mirroring `seq-runtime::builtins`'s table: a `HashMap` guarded for
//! concurrent registration, looked up by a composite key, with `register`
//! simply overwriting whatever was there.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use spiral_value::{SpiralError, Type, Value};

/// Key for an operator or effect: the `ns:name` pair used throughout the
/// expression and CFG data models.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpKey {
    pub ns: String,
    pub name: String,
}

impl OpKey {
    pub fn new(ns: impl Into<String>, name: impl Into<String>) -> Self {
        OpKey {
            ns: ns.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for OpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ns, self.name)
    }
}

/// A registered operator's implementation: a pure function from argument
/// values to a result value (or a `SpiralError`, e.g. `TypeError` on a
/// shape mismatch, `DivideByZero` for `core:div`).
pub type OperatorFn = Arc<dyn Fn(&[Value]) -> Result<Value, SpiralError> + Send + Sync>;

#[derive(Clone)]
pub struct OperatorRecord {
    pub params: Vec<Type>,
    pub ret: Type,
    pub pure: bool,
    pub implementation: OperatorFn,
}

/// spec.md §4.1: "maps (ns,name) to records of (parameter types, return
/// type, purity flag, implementation)".
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    entries: HashMap<OpKey, OperatorRecord>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        OperatorRegistry::default()
    }

    /// Registration is additive; later calls for the same key replace the
    /// earlier record (spec.md §4.1).
    pub fn register(
        &mut self,
        ns: impl Into<String>,
        name: impl Into<String>,
        params: Vec<Type>,
        ret: Type,
        pure: bool,
        implementation: OperatorFn,
    ) {
        self.entries.insert(
            OpKey::new(ns, name),
            OperatorRecord {
                params,
                ret,
                pure,
                implementation,
            },
        );
    }

    pub fn get(&self, ns: &str, name: &str) -> Option<&OperatorRecord> {
        self.entries.get(&OpKey::new(ns, name))
    }

    pub fn call(&self, ns: &str, name: &str, args: &[Value]) -> Result<Value, SpiralError> {
        match self.get(ns, name) {
            Some(rec) => (rec.implementation)(args),
            None => Err(SpiralError::unknown_operator(ns, name)),
        }
    }

    pub fn contains(&self, ns: &str, name: &str) -> bool {
        self.entries.contains_key(&OpKey::new(ns, name))
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// An effect's implementation may be impure and, per spec.md §4.5, may
/// itself suspend (an async-I/O effect awaiting the host). Modeled as an
/// async closure returning a boxed future so the scheduler can poll it
/// cooperatively alongside document-level awaits.
pub type EffectFn = Arc<
    dyn Fn(&[Value]) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, SpiralError>> + Send>>
        + Send
        + Sync,
>;

#[derive(Clone)]
pub struct EffectRecord {
    pub params: Vec<Type>,
    pub ret: Type,
    pub implementation: EffectFn,
}

/// spec.md §4.1 / §4.6: effects are always impure and are the only thing
/// that appends to the effect log.
#[derive(Clone, Default)]
pub struct EffectRegistry {
    entries: HashMap<OpKey, EffectRecord>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        EffectRegistry::default()
    }

    pub fn register(
        &mut self,
        ns: impl Into<String>,
        name: impl Into<String>,
        params: Vec<Type>,
        ret: Type,
        implementation: EffectFn,
    ) {
        self.entries.insert(
            OpKey::new(ns, name),
            EffectRecord {
                params,
                ret,
                implementation,
            },
        );
    }

    pub fn get(&self, ns: &str, name: &str) -> Option<&EffectRecord> {
        self.entries.get(&OpKey::new(ns, name))
    }

    pub async fn call(&self, ns: &str, name: &str, args: &[Value]) -> Result<Value, SpiralError> {
        match self.get(ns, name) {
            Some(rec) => (rec.implementation)(args).await,
            None => Err(SpiralError::unknown_operator(ns, name)),
        }
    }
}

impl fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}
