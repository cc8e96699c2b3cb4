//! The task scheduler and the generic async concurrency primitives built on
//! top of it (spec.md §4.5).
//!
//! Cooperative, single-threaded-from-the-evaluator's-viewpoint concurrency
//! is modeled the straightforward way on `tokio`: each spawned task is a
//! real `tokio::task`, and "suspension only at explicit await-points" falls
//! out of simply never blocking a worker thread — every primitive here
//! either completes immediately or parks behind a `tokio::sync` wait queue,
//! which is itself fair (FIFO) the way spec.md's async mutex and channel
//! require.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use spiral_value::{ErrorKind, SpiralError, TaskId, Value};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
enum TaskStatus {
    Pending,
    Resolved(Value),
    Rejected(SpiralError),
}

struct TaskEntry {
    status: TaskStatus,
    notify: Arc<Notify>,
}

/// spec.md §4.5's task scheduler: `spawn`, `await`, `checkGlobalSteps`.
#[derive(Clone)]
pub struct Scheduler {
    tasks: Arc<Mutex<HashMap<TaskId, TaskEntry>>>,
    steps: Arc<AtomicU64>,
    max_steps: u64,
    cancelled: Arc<Mutex<std::collections::HashSet<TaskId>>>,
}

impl Scheduler {
    pub fn new(max_steps: u64) -> Self {
        Scheduler {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            steps: Arc::new(AtomicU64::new(0)),
            max_steps,
            cancelled: Arc::new(Mutex::new(std::collections::HashSet::new())),
        }
    }

    /// Invoked before every expression step (spec.md §4.2, §5). Increments
    /// the shared step counter and fails with *NonTermination* once the
    /// configured budget is exhausted.
    pub fn check_global_steps(&self) -> Result<(), SpiralError> {
        let n = self.steps.fetch_add(1, Ordering::Relaxed) + 1;
        if n > self.max_steps {
            return Err(SpiralError::non_termination(format!(
                "exceeded maxSteps ({})",
                self.max_steps
            )));
        }
        Ok(())
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    /// Registers a new pending task and starts `fut` running on the tokio
    /// runtime. Rejects a duplicate id (spec.md §4.5).
    pub fn spawn<F>(&self, task_id: TaskId, fut: F) -> Result<(), SpiralError>
    where
        F: Future<Output = Result<Value, SpiralError>> + Send + 'static,
    {
        {
            let mut tasks = self.tasks.lock().unwrap();
            if tasks.contains_key(&task_id) {
                return Err(SpiralError::new(
                    ErrorKind::ValidationError,
                    format!("duplicate spawn for {task_id}"),
                ));
            }
            tasks.insert(
                task_id,
                TaskEntry {
                    status: TaskStatus::Pending,
                    notify: Arc::new(Notify::new()),
                },
            );
        }

        let tasks = self.tasks.clone();
        let cancelled = self.cancelled.clone();
        tokio::spawn(async move {
            let result = fut.await;
            let mut tasks = tasks.lock().unwrap();
            if let Some(entry) = tasks.get_mut(&task_id) {
                entry.status = match result {
                    _ if cancelled.lock().unwrap().contains(&task_id) => {
                        TaskStatus::Rejected(SpiralError::non_termination("task cancelled"))
                    }
                    Ok(v) => TaskStatus::Resolved(v),
                    Err(e) => TaskStatus::Rejected(e),
                };
                entry.notify.notify_waiters();
            }
        });
        Ok(())
    }

    /// Suspends until `task_id` resolves, returning its value or
    /// propagating its error. Awaiting an already-resolved task returns
    /// immediately.
    pub async fn await_task(&self, task_id: TaskId) -> Result<Value, SpiralError> {
        loop {
            let notify = {
                let tasks = self.tasks.lock().unwrap();
                match tasks.get(&task_id) {
                    None => {
                        return Err(SpiralError::new(
                            ErrorKind::DomainError,
                            format!("await of unknown task {task_id}"),
                        ))
                    }
                    Some(entry) => match &entry.status {
                        TaskStatus::Resolved(v) => return Ok(v.clone()),
                        TaskStatus::Rejected(e) => return Err(e.clone()),
                        TaskStatus::Pending => entry.notify.clone(),
                    },
                }
            };
            notify.notified().await;
        }
    }

    /// Best-effort cooperative cancellation (spec.md §5): marks the task so
    /// that, if it has not already resolved, its eventual completion is
    /// reported as cancelled to awaiters. In-flight host effects are not
    /// interrupted; their results are simply discarded.
    pub fn cancel(&self, task_id: TaskId) {
        self.cancelled.lock().unwrap().insert(task_id);
    }
}

/// A FIFO-fair async mutex (spec.md §4.5). `tokio::sync::Mutex` already
/// grants its guard to waiters in acquisition order, so this is a thin,
/// named wrapper rather than a hand-rolled wait queue.
pub struct AsyncMutex {
    inner: tokio::sync::Mutex<()>,
}

impl Default for AsyncMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncMutex {
    pub fn new() -> Self {
        AsyncMutex {
            inner: tokio::sync::Mutex::new(()),
        }
    }

    /// Runs `f` with the lock held, releasing it on any exit path —
    /// success or error — since the guard's drop is unconditional.
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.inner.lock().await;
        f().await
    }
}

/// A value slot guarded by an [`AsyncMutex`] (spec.md §4.5).
pub struct AsyncRefCell<T> {
    inner: tokio::sync::Mutex<T>,
}

impl<T: Clone> AsyncRefCell<T> {
    pub fn new(initial: T) -> Self {
        AsyncRefCell {
            inner: tokio::sync::Mutex::new(initial),
        }
    }

    pub async fn read(&self) -> T {
        self.inner.lock().await.clone()
    }

    pub async fn write(&self, value: T) {
        *self.inner.lock().await = value;
    }

    pub async fn update(&self, f: impl FnOnce(&T) -> T) {
        let mut guard = self.inner.lock().await;
        let next = f(&guard);
        *guard = next;
    }

    /// Bypasses the mutex; the caller asserts no concurrent writer exists.
    /// Not used by the evaluator itself — available to hosts that have
    /// already externally serialised access.
    pub fn unsafe_get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}
