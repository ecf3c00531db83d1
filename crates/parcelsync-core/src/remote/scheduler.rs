//! Execution contexts for chain driving and observer delivery
//!
//! | Scheduler                | Runs tasks on                          |
//! |--------------------------|----------------------------------------|
//! | [`NewThreadScheduler`]   | a fresh OS thread per task             |
//! | [`TokioBlockingScheduler`] | the runtime's blocking pool          |
//! | [`LooperScheduler`]      | one dedicated thread, in FIFO order    |
//! | [`InlineScheduler`]      | the calling thread                     |
//!
//! The looper is the usual observer scheduler: a single thread keeps
//! callbacks serialized and in submission order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{error, trace, warn};

use crate::error::{SyncError, SyncResult};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    fn schedule(&self, task: Task);
}

/// Spawns a named thread per task. If the thread cannot be spawned the task
/// runs on the calling thread instead of being lost.
#[derive(Debug, Clone)]
pub struct NewThreadScheduler {
    name: String,
}

impl NewThreadScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for NewThreadScheduler {
    fn default() -> Self {
        Self::new("parcelsync-job")
    }
}

impl Scheduler for NewThreadScheduler {
    fn schedule(&self, task: Task) {
        let slot = Arc::new(Mutex::new(Some(task)));
        let spawned = slot.clone();
        let outcome = thread::Builder::new().name(self.name.clone()).spawn(move || {
            let task = spawned.lock().take();
            if let Some(task) = task {
                task();
            }
        });
        if let Err(e) = outcome {
            warn!(name = %self.name, error = %e, "Failed to spawn scheduler thread, running inline");
            let task = slot.lock().take();
            if let Some(task) = task {
                task();
            }
        }
    }
}

/// Runs tasks on a tokio runtime's blocking thread pool.
#[derive(Debug, Clone)]
pub struct TokioBlockingScheduler {
    handle: Handle,
}

impl TokioBlockingScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime the caller is running on.
    pub fn from_current() -> SyncResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| SyncError::Config(format!("no tokio runtime: {}", e)))
    }
}

impl Scheduler for TokioBlockingScheduler {
    fn schedule(&self, task: Task) {
        self.handle.spawn_blocking(task);
    }
}

/// One worker thread draining a queue. Stops when the scheduler is dropped;
/// a panicking task is logged and the looper moves on.
pub struct LooperScheduler {
    tx: mpsc::UnboundedSender<Task>,
}

impl LooperScheduler {
    pub fn new(name: impl Into<String>) -> SyncResult<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let looper = name.clone();
        thread::Builder::new()
            .name(name)
            .spawn(move || {
                while let Some(task) = rx.blocking_recv() {
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!(looper = %looper, "Task panicked");
                    }
                }
                trace!(looper = %looper, "Looper stopped");
            })?;
        Ok(Self { tx })
    }
}

impl Scheduler for LooperScheduler {
    fn schedule(&self, task: Task) {
        if self.tx.send(task).is_err() {
            error!("Looper thread is gone, task dropped");
        }
    }
}

impl std::fmt::Debug for LooperScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LooperScheduler").finish_non_exhaustive()
    }
}

/// Runs the task immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn schedule(&self, task: Task) {
        task();
    }
}
