//! In-memory priority job queue.
//!
//! Pending jobs are ordered by priority (descending) and then by submission
//! sequence (ascending), which gives strict FIFO among jobs of equal priority.
//! This is the only fairness guarantee: a steady stream of high-priority
//! submissions can starve low-priority jobs indefinitely.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::job::{Job, JobId, JobRequest, JobStatus};
use crate::Result;

/// Configuration for the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Warning threshold for queue depth.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: usize,
    /// Critical threshold for queue depth.
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: usize,
}

fn default_warning_threshold() -> usize {
    100
}

fn default_critical_threshold() -> usize {
    500
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            warning_threshold: default_warning_threshold(),
            critical_threshold: default_critical_threshold(),
        }
    }
}

/// Status of queue depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueDepthStatus {
    /// Queue depth is normal.
    Normal,
    /// Queue depth is at warning level.
    Warning,
    /// Queue depth is at critical level.
    Critical,
}

/// Result of asking the queue to cancel a job.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The job was still pending; it is now cancelled and out of the queue.
    Cancelled(Box<Job>),
    /// The job is not pending in this queue (already dequeued, finished or unknown).
    NotCancellable,
}

impl CancelOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CancelOutcome::Cancelled(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<u8>,
    sequence: u64,
}

impl QueueKey {
    fn of(job: &Job) -> Self {
        Self {
            priority: Reverse(job.priority),
            sequence: job.sequence,
        }
    }
}

#[derive(Default)]
struct QueueState {
    ordered: BTreeMap<QueueKey, Job>,
    index: HashMap<JobId, QueueKey>,
    next_sequence: u64,
}

impl QueueState {
    fn insert(&mut self, job: Job) {
        let key = QueueKey::of(&job);
        self.index.insert(job.id.clone(), key);
        self.ordered.insert(key, job);
    }

    fn pop_first(&mut self) -> Option<Job> {
        let (_, job) = self.ordered.pop_first()?;
        self.index.remove(&job.id);
        Some(job)
    }

    fn remove(&mut self, id: &JobId) -> Option<Job> {
        let key = self.index.remove(id)?;
        self.ordered.remove(&key)
    }
}

/// Thread-safe priority queue of pending jobs.
pub struct PriorityJobQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    /// Wakes one blocked worker per submission.
    notify: Arc<Notify>,
}

impl PriorityJobQueue {
    /// Create a new job queue.
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Create a new job queue with custom configuration.
    pub fn with_config(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState {
                next_sequence: 1,
                ..Default::default()
            }),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Validate a request and enqueue it as a pending job.
    ///
    /// Invalid requests are rejected here and never reach the queue.
    pub fn submit(&self, request: JobRequest) -> Result<Job> {
        let job = {
            let mut state = self.state.lock();
            let job = Job::from_request(request, state.next_sequence)?;
            state.next_sequence += 1;
            state.insert(job.clone());
            job
        };

        info!(
            job_id = %job.id,
            priority = job.priority,
            sequence = job.sequence,
            "Enqueued job"
        );

        self.notify.notify_one();
        Ok(job)
    }

    /// Remove and return the next job without waiting.
    pub fn try_dequeue(&self) -> Option<Job> {
        self.state.lock().pop_first()
    }

    /// Remove and return the next job, waiting until one is available.
    ///
    /// Returns `None` once `cancel` fires.
    pub async fn dequeue_blocking(&self, cancel: &CancellationToken) -> Option<Job> {
        self.dequeue_blocking_when(cancel, || true).await
    }

    /// Like [`dequeue_blocking`](Self::dequeue_blocking), but only takes a job
    /// while `ready` returns true. `ready` is checked under the queue lock, so
    /// a job is either still queued or handed to the caller.
    ///
    /// Call [`wake_all`](Self::wake_all) after `ready` flips to true.
    pub async fn dequeue_blocking_when(
        &self,
        cancel: &CancellationToken,
        ready: impl Fn() -> bool,
    ) -> Option<Job> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            // Register interest before checking the queue so a submit racing
            // with the check is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut state = self.state.lock();
                if ready() { state.pop_first() } else { None }
            };
            if let Some(job) = next {
                debug!(job_id = %job.id, "Dequeued job");
                return Some(job);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// Wake every blocked dequeue so it re-checks the queue.
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }

    /// Cancel a job that is still waiting in the queue.
    pub fn cancel(&self, id: &JobId) -> CancelOutcome {
        let removed = self.state.lock().remove(id);
        match removed {
            Some(mut job) => {
                // Queued jobs are always pending, so this cannot fail.
                let _ = job.cancel();
                info!(job_id = %id, "Cancelled pending job");
                CancelOutcome::Cancelled(Box::new(job))
            }
            None => CancelOutcome::NotCancellable,
        }
    }

    /// Cancel every pending job, returning them in dequeue order.
    pub fn drain(&self) -> Vec<Job> {
        let drained: Vec<Job> = {
            let mut state = self.state.lock();
            state.index.clear();
            std::mem::take(&mut state.ordered).into_values().collect()
        };

        drained
            .into_iter()
            .map(|mut job| {
                let _ = job.cancel();
                job
            })
            .collect()
    }

    /// Ordered copy of every pending job. Does not modify the queue.
    pub fn peek_snapshot(&self) -> Vec<Job> {
        self.state.lock().ordered.values().cloned().collect()
    }

    /// Look up a pending job.
    pub fn get(&self, id: &JobId) -> Option<Job> {
        let state = self.state.lock();
        let key = state.index.get(id)?;
        state.ordered.get(key).cloned()
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.state.lock().index.contains_key(id)
    }

    /// Re-insert recovered jobs, keeping their ids and sequences.
    ///
    /// Jobs already queued (by id) are skipped, as are jobs that are not
    /// pending. The sequence counter moves past the largest restored sequence
    /// so new submissions still order after recovered ones.
    pub fn restore(&self, jobs: Vec<Job>) -> usize {
        let mut restored = 0;
        {
            let mut state = self.state.lock();
            for job in jobs {
                if job.status != JobStatus::Pending || state.index.contains_key(&job.id) {
                    continue;
                }
                state.next_sequence = state.next_sequence.max(job.sequence + 1);
                state.insert(job);
                restored += 1;
            }
        }

        for _ in 0..restored {
            self.notify.notify_one();
        }

        if restored > 0 {
            info!("Restored {} pending jobs into the queue", restored);
        }
        restored
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.state.lock().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get queue depth status.
    pub fn depth_status(&self) -> QueueDepthStatus {
        let depth = self.len();
        if depth >= self.config.critical_threshold {
            QueueDepthStatus::Critical
        } else if depth >= self.config.warning_threshold {
            QueueDepthStatus::Warning
        } else {
            QueueDepthStatus::Normal
        }
    }

    /// Sequence the next submission will receive.
    pub fn next_sequence(&self) -> u64 {
        self.state.lock().next_sequence
    }
}

impl Default for PriorityJobQueue {
    fn default() -> Self {
        Self::new()
    }
}
