//! spiral-engine: the multi-layer evaluator (spec.md §2, components 3-7).
//!
//! Built on [`spiral_value`]'s data model, this crate carries everything
//! else the core needs: the environment's companion registries, the
//! expression evaluator for AIR/CIR/EIR, the CFG interpreter for LIR, the
//! task scheduler and concurrency primitives for the async overlay, the
//! document orchestrator that drives a whole evaluation, and the
//! canonical-JSON module used for content digests (spec.md §4.7).

pub mod canon;
pub mod cfg;
pub mod cfg_interp;
pub mod channel;
pub mod config;
pub mod ctx;
pub mod document;
pub mod effectlog;
pub mod eval;
pub mod expr;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;

#[cfg(feature = "stdlib")]
pub mod stdlib;

pub use config::{AsyncIoConfig, Concurrency, EvalConfig};
pub use ctx::Ctx;
pub use document::{AirDef, Document, Node};
pub use effectlog::{EffectLog, EffectLogEntry, EffectLogStats};
pub use orchestrator::{orchestrator_with_registries, Orchestrator};
pub use registry::{EffectRegistry, OperatorRegistry};
pub use scheduler::{AsyncMutex, AsyncRefCell, Scheduler};
