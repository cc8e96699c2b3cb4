//! The runtime value model (spec.md §3).
//!
//! `Value` is the tagged union every SPIRAL component passes around. It is
//! deliberately "shareable": containers hold `Arc`s so that cloning a list,
//! map, or closure to pass it into a spawned task is O(1) and safe to send
//! across the `tokio` worker pool the scheduler (spiral-engine::scheduler)
//! runs on.
//!
//! Structural equality and canonical hashing are hand-rolled rather than
//! derived, because spec.md pins down details `#[derive(PartialEq, Hash)]`
//! can't express on its own: `-0.0` canonicalises to `0` for hashing, sets
//! compare as multisets of canonical hashes rather than by representation,
//! and a handful of variants (closures, futures, opaque values) have
//! identity-based rather than structural equality.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::env::Env;
use crate::error::SpiralError;
use crate::ids::{NodeId, TaskId};

/// A structural type descriptor (spec.md §3: "A Type descriptor mirrors the
/// structural shape").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Type {
    Void,
    Bool,
    Int,
    Float,
    String,
    List {
        element: Box<Type>,
    },
    Set {
        element: Box<Type>,
    },
    Map {
        value: Box<Type>,
    },
    Option {
        element: Box<Type>,
    },
    Fn {
        params: Vec<Type>,
        #[serde(rename = "returns")]
        ret: Box<Type>,
    },
    Ref {
        element: Box<Type>,
    },
    Opaque {
        tag: String,
    },
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::List { element } => write!(f, "list<{element}>"),
            Type::Set { element } => write!(f, "set<{element}>"),
            Type::Map { value } => write!(f, "map<{value}>"),
            Type::Option { element } => write!(f, "option<{element}>"),
            Type::Fn { params, ret } => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")
            }
            Type::Ref { element } => write!(f, "ref<{element}>"),
            Type::Opaque { tag } => write!(f, "opaque<{tag}>"),
        }
    }
}

/// A host-owned payload carried inside `Value::Opaque`. The evaluator never
/// inspects it; it only moves it around and compares identity.
pub trait OpaquePayload: std::any::Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn std::any::Any;
}

impl<T: std::any::Any + Send + Sync + fmt::Debug> OpaquePayload for T {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// The runtime form of a `lambda` expression: captured environment,
/// ordered parameter list, body node, and (optionally) the declared type.
#[derive(Debug, Clone)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: NodeId,
    pub env: Env,
    pub type_annotation: Option<Type>,
}

/// Status of a spawned task, mirrored by `Value::Future` (spec.md §3: "task
/// id + status {pending, resolved, rejected}"). The resolved/rejected
/// payload itself lives in the scheduler's task table, not in the `Value` —
/// awaiting is what fetches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FutureStatus {
    Pending,
    Resolved,
    Rejected,
}

/// The tagged union of runtime values (spec.md §3).
#[derive(Debug, Clone)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    List(Arc<Vec<Value>>),
    /// Deduplicated by canonical hash at construction time; see
    /// [`Value::set`].
    Set(Arc<Vec<Value>>),
    Map(Arc<BTreeMap<String, Value>>),
    Option(Option<Arc<Value>>),
    Closure(Arc<Closure>),
    /// A handle into a document's `RefCellStore`; identity is the store key.
    RefCell(Arc<str>),
    Future {
        task_id: TaskId,
        status: FutureStatus,
    },
    Opaque {
        tag: Arc<str>,
        payload: Arc<dyn OpaquePayload>,
    },
    Error(Arc<SpiralError>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(Arc::from(s.into()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(items))
    }

    /// Builds a set value, deduplicating members by canonical hash
    /// (spec.md §3: "set of canonical hashes of Value").
    pub fn set(items: Vec<Value>) -> Value {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if seen.insert(item.canonical_hash()) {
                out.push(item);
            }
        }
        Value::Set(Arc::new(out))
    }

    pub fn map(entries: BTreeMap<String, Value>) -> Value {
        Value::Map(Arc::new(entries))
    }

    pub fn some(v: Value) -> Value {
        Value::Option(Some(Arc::new(v)))
    }

    pub fn none() -> Value {
        Value::Option(None)
    }

    pub fn ref_cell(key: impl Into<String>) -> Value {
        Value::RefCell(Arc::from(key.into()))
    }

    pub fn error(e: SpiralError) -> Value {
        Value::Error(Arc::new(e))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn as_error(&self) -> Option<&SpiralError> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// A short tag naming the variant, used in type-error messages.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Option(_) => "option",
            Value::Closure(_) => "closure",
            Value::RefCell(_) => "ref-cell",
            Value::Future { .. } => "future",
            Value::Opaque { .. } => "opaque",
            Value::Error(_) => "error",
        }
    }

    /// A deterministic hash stable across runs and processes (spec.md §8
    /// property 1 requires structurally equal results "across runs").
    /// `std`'s default `RandomState` hasher is deliberately NOT used here,
    /// since its seed is randomized per-process.
    pub fn canonical_hash(&self) -> u64 {
        let mut h = Fnv1a::new();
        self.hash_into(&mut h);
        h.finish()
    }

    fn hash_into(&self, h: &mut Fnv1a) {
        match self {
            Value::Void => h.write_u8(0),
            Value::Bool(b) => {
                h.write_u8(1);
                h.write_u8(*b as u8);
            }
            Value::Int(i) => {
                h.write_u8(2);
                h.write_bytes(&i.to_le_bytes());
            }
            Value::Float(f) => {
                h.write_u8(3);
                // -0.0 canonicalises to 0 for hashing (spec.md §3).
                let canon = if *f == 0.0 { 0.0 } else { *f };
                h.write_bytes(&canon.to_bits().to_le_bytes());
            }
            Value::String(s) => {
                h.write_u8(4);
                h.write_bytes(s.as_bytes());
            }
            Value::List(items) => {
                h.write_u8(5);
                h.write_bytes(&(items.len() as u64).to_le_bytes());
                for item in items.iter() {
                    item.hash_into(h);
                }
            }
            Value::Set(items) => {
                h.write_u8(6);
                // Order-irrelevant: combine member hashes with XOR.
                let mut acc: u64 = 0;
                for item in items.iter() {
                    acc ^= item.canonical_hash();
                }
                h.write_bytes(&acc.to_le_bytes());
            }
            Value::Map(entries) => {
                h.write_u8(7);
                let mut acc: u64 = 0;
                for (k, v) in entries.iter() {
                    let mut kh = Fnv1a::new();
                    kh.write_bytes(k.as_bytes());
                    acc ^= kh.finish() ^ v.canonical_hash().rotate_left(1);
                }
                h.write_bytes(&acc.to_le_bytes());
            }
            Value::Option(None) => h.write_u8(8),
            Value::Option(Some(v)) => {
                h.write_u8(9);
                v.hash_into(h);
            }
            Value::Closure(c) => {
                h.write_u8(10);
                h.write_bytes(&(Arc::as_ptr(c) as usize as u64).to_le_bytes());
            }
            Value::RefCell(key) => {
                h.write_u8(11);
                h.write_bytes(key.as_bytes());
            }
            Value::Future { task_id, status } => {
                h.write_u8(12);
                h.write_bytes(&task_id.0.to_le_bytes());
                h.write_u8(*status as u8);
            }
            Value::Opaque { tag, payload } => {
                h.write_u8(13);
                h.write_bytes(tag.as_bytes());
                h.write_bytes(&(Arc::as_ptr(payload) as *const () as usize as u64).to_le_bytes());
            }
            Value::Error(e) => {
                h.write_u8(14);
                h.write_bytes(e.kind.to_string().as_bytes());
                h.write_bytes(e.message.as_bytes());
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => {
                // Multiset-of-hashes comparison: order-irrelevant, per
                // spec.md §3 ("insertion-order-irrelevant").
                if a.len() != b.len() {
                    return false;
                }
                let mut a_hashes: Vec<u64> = a.iter().map(Value::canonical_hash).collect();
                let mut b_hashes: Vec<u64> = b.iter().map(Value::canonical_hash).collect();
                a_hashes.sort_unstable();
                b_hashes.sort_unstable();
                a_hashes == b_hashes
            }
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Option(a), Value::Option(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::RefCell(a), Value::RefCell(b)) => a == b,
            (Value::Future { task_id: a, .. }, Value::Future { task_id: b, .. }) => a == b,
            (Value::Opaque { tag: ta, payload: pa }, Value::Opaque { tag: tb, payload: pb }) => {
                ta == tb && Arc::ptr_eq(pa, pb)
            }
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

/// A small non-cryptographic deterministic hasher (FNV-1a). Hand-rolled
/// rather than pulled in from a crate: it's a dozen lines, needs no
/// dependency, and (unlike `std::collections::hash_map::DefaultHasher`) its
/// output is stable across runs and platforms.
struct Fnv1a(u64);

impl Fnv1a {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    fn new() -> Self {
        Fnv1a(Self::OFFSET)
    }

    fn write_u8(&mut self, byte: u8) {
        self.0 ^= byte as u64;
        self.0 = self.0.wrapping_mul(Self::PRIME);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.write_u8(*b);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
