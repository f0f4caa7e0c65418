//! Worker pool for concurrent shadow-runs.
//!
//! The `WorkerPool` tracks the workers currently executing shadow-runs,
//! enforcing the configured concurrency limit. It emits events for worker
//! lifecycle changes via a channel.

use crate::core::TaskId;
use crate::error::{Error, Result};
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique identifier for a pooled worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    /// Create a new unique worker identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events emitted by the worker pool for lifecycle changes.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A worker claimed a task and started a shadow-run.
    Claimed {
        /// The worker that started.
        worker_id: WorkerId,
        /// The task the worker is executing.
        task_id: TaskId,
    },
    /// A worker finished and its capacity slot was freed.
    Released {
        /// The worker that was released.
        worker_id: WorkerId,
    },
}

/// A handle to a worker in the pool.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    /// Unique identifier for this worker.
    pub id: WorkerId,
    /// The task this worker is executing.
    pub task_id: TaskId,
}

/// Manages a fixed-capacity set of concurrent workers.
///
/// The pool tracks active workers, enforces the concurrency limit, and
/// emits [`WorkerEvent`]s via a channel. It does not itself execute
/// anything; the scheduler spawns the shadow-run and reports back.
pub struct WorkerPool {
    /// Active workers indexed by their ID.
    workers: HashMap<WorkerId, WorkerHandle>,
    /// Maximum number of concurrent workers allowed.
    max_concurrent: usize,
    /// Channel for emitting worker events.
    event_tx: mpsc::Sender<WorkerEvent>,
}

impl WorkerPool {
    /// Create a new worker pool with the given capacity.
    pub fn new(max_concurrent: usize, event_tx: mpsc::Sender<WorkerEvent>) -> Self {
        Self {
            workers: HashMap::new(),
            max_concurrent,
            event_tx,
        }
    }

    /// Claim a worker slot for a task.
    ///
    /// # Errors
    /// Returns [`Error::WorkerPoolFull`] if the pool is at capacity.
    pub async fn claim(&mut self, task_id: &TaskId) -> Result<WorkerId> {
        if !self.has_capacity() {
            return Err(Error::WorkerPoolFull {
                max: self.max_concurrent,
            });
        }

        let worker_id = WorkerId::new();
        self.workers.insert(
            worker_id,
            WorkerHandle {
                id: worker_id,
                task_id: *task_id,
            },
        );

        let _ = self
            .event_tx
            .send(WorkerEvent::Claimed {
                worker_id,
                task_id: *task_id,
            })
            .await;

        Ok(worker_id)
    }

    /// Release a worker slot by ID.
    ///
    /// # Errors
    /// Returns [`Error::WorkerNotFound`] if the worker is not in the pool.
    pub async fn release(&mut self, id: &WorkerId) -> Result<()> {
        if self.workers.remove(id).is_none() {
            return Err(Error::WorkerNotFound { id: *id });
        }

        let _ = self
            .event_tx
            .send(WorkerEvent::Released { worker_id: *id })
            .await;

        Ok(())
    }

    /// Get a worker by ID.
    pub fn get(&self, id: &WorkerId) -> Option<&WorkerHandle> {
        self.workers.get(id)
    }

    /// Get the number of active workers in the pool.
    pub fn active_count(&self) -> usize {
        self.workers.len()
    }

    /// Check if the pool has capacity for more workers.
    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.max_concurrent
    }

    /// Get the maximum concurrent workers allowed.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
