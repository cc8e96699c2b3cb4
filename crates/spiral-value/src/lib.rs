//! spiral-value: the value model, environment, and ref-cell store shared by
//! every other SPIRAL crate (spec.md §3, components 1-2 of §2).
//!
//! This is the foundation crate in a `seq-core` / `seq-runtime`-style
//! split — small, dependency-light, and depended on by everything else.

pub mod env;
pub mod error;
pub mod ids;
pub mod refcell;
pub mod value;

pub use env::{Env, RecHandle};
pub use error::{ErrorKind, SpiralError};
pub use ids::{ChannelId, NodeId, TaskId};
pub use refcell::RefCellStore;
pub use value::{Closure, FutureStatus, OpaquePayload, Type, Value};
