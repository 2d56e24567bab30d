//! Resizable set of worker tasks.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

struct WorkerHandle {
    id: usize,
    /// Cancelled to retire this worker; child of the pool's shutdown token.
    retire: CancellationToken,
}

/// Owns the worker tasks of one engine run.
///
/// Each worker gets its own retire token. Retiring a worker only cancels that
/// token; the worker decides when to exit, so a job it is running is finished
/// first.
pub struct WorkerPool {
    shutdown: CancellationToken,
    workers: Vec<WorkerHandle>,
    next_id: usize,
    tasks: JoinSet<()>,
}

impl WorkerPool {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            workers: Vec::new(),
            next_id: 0,
            tasks: JoinSet::new(),
        }
    }

    /// Spawn a worker. `worker` receives the worker id and its retire token.
    pub fn spawn<F, Fut>(&mut self, worker: F) -> usize
    where
        F: FnOnce(usize, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // Reap workers that already exited after being retired.
        while self.tasks.try_join_next().is_some() {}

        let id = self.next_id;
        self.next_id += 1;

        let retire = self.shutdown.child_token();
        self.tasks.spawn(worker(id, retire.clone()));
        self.workers.push(WorkerHandle { id, retire });

        debug!(worker_id = id, "Spawned worker");
        id
    }

    /// Retire the most recently spawned worker.
    pub fn retire_one(&mut self) -> Option<usize> {
        let handle = self.workers.pop()?;
        handle.retire.cancel();
        debug!(worker_id = handle.id, "Retiring worker");
        Some(handle.id)
    }

    /// Retire every worker without waiting.
    pub fn retire_all(&mut self) {
        self.shutdown.cancel();
        self.workers.clear();
    }

    /// Number of workers that have not been retired.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn worker_ids(&self) -> Vec<usize> {
        self.workers.iter().map(|w| w.id).collect()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Retire every worker and wait for all of them to exit.
    pub async fn shutdown(mut self) {
        info!("Stopping worker pool ({} workers)", self.workers.len());
        self.shutdown.cancel();
        self.workers.clear();

        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("Worker task panicked: {}", e);
                }
            }
        }

        info!("Worker pool stopped");
    }
}
