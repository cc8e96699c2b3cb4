//! Evaluation configuration (spec.md §6's "Configuration options").
//!
//! Plain struct + `Default`, the way `seq-compiler::config` is consumed by
//! `clap`-derived CLI args — a config struct first, wired to a CLI surface
//! separately (in `spiral-cli`), rather than a config type that already
//! knows how to parse argv.

use std::collections::HashMap;
use std::sync::Arc;

use spiral_value::Value;

use crate::registry::{EffectRegistry, OperatorRegistry};
use crate::scheduler::Scheduler;

/// Advisory hint to the scheduler (spec.md §6). The reference evaluator
/// does not special-case any of these — tasks always run cooperatively on
/// the tokio runtime supplied to [`crate::orchestrator::Orchestrator`] — but
/// the value is threaded through so a host can use it to size a thread pool
/// or bias work-stealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Sequential,
    Parallel,
    Speculative,
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Parallel
    }
}

/// Host collaborators for async effects (spec.md §6: "Host collaborators
/// for async effects (file-system, HTTP client)"). The core treats these
/// opaquely; `AsyncIoConfig` only threads whatever a host registers here
/// into the effect registry's closures. Empty by default.
#[derive(Default, Clone)]
pub struct AsyncIoConfig {
    pub entries: HashMap<String, Value>,
}

/// spec.md §6's configuration surface.
#[derive(Clone)]
pub struct EvalConfig {
    /// Upper bound on expression steps (spec.md §4.2, §4.5). Defaults match
    /// spec.md §6: 1,000,000 for documents using the concurrent overlay,
    /// 10,000 otherwise. `EvalConfig::default` picks the synchronous
    /// default; callers evaluating async documents should use
    /// [`EvalConfig::for_async`].
    pub max_steps: u64,
    /// Emit a step-wise trace of evaluated nodes via `tracing`.
    pub trace: bool,
    pub concurrency: Concurrency,
    pub scheduler: Option<Scheduler>,
    pub effects: Option<EffectRegistry>,
    pub operators: Option<OperatorRegistry>,
    pub inputs: HashMap<String, Value>,
    pub async_io: Arc<AsyncIoConfig>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            max_steps: 10_000,
            trace: false,
            concurrency: Concurrency::default(),
            scheduler: None,
            effects: None,
            operators: None,
            inputs: HashMap::new(),
            async_io: Arc::new(AsyncIoConfig::default()),
        }
    }
}

impl EvalConfig {
    /// Default configuration for documents that use the concurrent overlay
    /// (spec.md §6: `maxSteps` default "1 000 000 (async)").
    pub fn for_async() -> Self {
        EvalConfig {
            max_steps: 1_000_000,
            ..Default::default()
        }
    }
}
