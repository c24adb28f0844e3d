//! Fixed worker pool with round-robin selection.
//!
//! Workers are spawned once and never restarted; a worker that stops serving
//! its channel surfaces as send errors on its handle, not as a pool reshape.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::EngineLoader;
use crate::worker::{self, WorkerHandle};

/// Handles to a fixed set of workers
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cursor: AtomicUsize,
}

impl WorkerPool {
    /// Spawn `count` workers over clones of the loader
    pub fn spawn<L>(loader: L, count: usize) -> Self
    where
        L: EngineLoader + Clone,
    {
        let mut workers = Vec::with_capacity(count);
        let mut tasks = Vec::with_capacity(count);
        for _ in 0..count {
            let (handle, task) = worker::spawn(loader.clone());
            debug!(worker_id = %handle.id(), "worker spawned");
            workers.push(handle);
            tasks.push(task);
        }
        info!(workers = count, "worker pool started");

        Self {
            workers,
            tasks: Mutex::new(tasks),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next worker in round-robin order; `None` when the pool is empty
    pub fn next(&self) -> Option<&WorkerHandle> {
        if self.workers.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers.get(index)
    }

    /// Worker at a fixed index, without advancing the cursor
    pub fn get(&self, index: usize) -> Option<&WorkerHandle> {
        self.workers.get(index)
    }

    /// All worker handles, in spawn order
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Number of workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// True when the pool holds no workers
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Await every worker task; returns once all loops have exited
    pub async fn join_all(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}
