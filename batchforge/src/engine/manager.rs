//! Batch execution engine.
//!
//! Workers pull jobs from the priority queue and run the executor on tokio's
//! blocking pool. Everything a job does happens inside that call, so a panic
//! or error there only fails that job.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::{CancelReason, EngineEvent, JobCancellation};
use super::executor::{ExecutionContext, ExecutionError, JobExecutor, SharedCache};
use super::health::{EngineHealth, EngineStats, HealthStatus, StuckJob};
use super::job::{Job, JobId, JobRequest, JobStatus};
use super::job_queue::{CancelOutcome, PriorityJobQueue, QueueDepthStatus};
use super::progress::{ProgressReporter, ProgressUpdate};
use super::worker_pool::WorkerPool;
use crate::config::EngineConfig;
use crate::monitor::{LoadSampler, ResourceMonitor};
use crate::persistence::{HistoryRecord, HistoryStore, QueueSnapshotStore, fs::ensure_dir_all};
use crate::{Error, Result};

const PROGRESS_CHANNEL_CAPACITY: usize = 1024;

/// A job currently owned by a worker.
struct ActiveJob {
    job: Job,
    worker_id: usize,
    token: CancellationToken,
    reason: Option<CancelReason>,
}

/// State that only exists while the engine runs.
struct RunState {
    pool: WorkerPool,
    /// Parent of every job token; cancelled by a non-graceful stop.
    abort: CancellationToken,
    /// Stops the progress, autoscaler, snapshot and sweeper tasks.
    background_token: CancellationToken,
    background: JoinSet<()>,
    progress_tx: mpsc::Sender<ProgressUpdate>,
    max_workers: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

struct EngineInner {
    config: EngineConfig,
    queue: PriorityJobQueue,
    cache: Arc<SharedCache>,
    monitor: Arc<ResourceMonitor>,
    history: Arc<HistoryStore>,
    snapshots: Arc<QueueSnapshotStore>,
    executor: Arc<dyn JobExecutor>,
    active: DashMap<JobId, ActiveJob>,
    run: Mutex<Option<RunState>>,
    /// Set while `stop` tears down a run it has taken out of `run`.
    stopping: AtomicBool,
    paused: AtomicBool,
    events: broadcast::Sender<EngineEvent>,
    counters: Counters,
}

/// Builder for [`BatchEngine`].
pub struct BatchEngineBuilder {
    config: EngineConfig,
    executor: Arc<dyn JobExecutor>,
    monitor: Option<ResourceMonitor>,
    cache: Option<Arc<SharedCache>>,
}

impl BatchEngineBuilder {
    /// Use a custom load source for worker scaling.
    pub fn sampler(mut self, sampler: Arc<dyn LoadSampler>) -> Self {
        self.monitor = Some(ResourceMonitor::with_sampler(&self.config.monitor, sampler));
        self
    }

    pub fn monitor(mut self, monitor: ResourceMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Share an existing cache instead of creating one.
    pub fn cache(mut self, cache: Arc<SharedCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validate the configuration, prepare the data directory and open the
    /// history and snapshot stores.
    pub fn build(self) -> Result<BatchEngine> {
        let config = self.config;
        config.validate()?;
        ensure_dir_all(&config.persistence.data_dir)?;

        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(SharedCache::with_weigher(
                &config.cache,
                Arc::new(|bytes: &Vec<u8>| bytes.len() as u64),
            ))
        });
        let monitor = self
            .monitor
            .unwrap_or_else(|| ResourceMonitor::new(&config.monitor));
        let (events, _) = broadcast::channel(config.event_capacity);

        let inner = EngineInner {
            queue: PriorityJobQueue::with_config(config.queue.clone()),
            cache,
            monitor: Arc::new(monitor),
            history: Arc::new(config.persistence.open_history()),
            snapshots: Arc::new(config.persistence.open_snapshots()),
            executor: self.executor,
            active: DashMap::new(),
            run: Mutex::new(None),
            stopping: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            events,
            counters: Counters::default(),
            config,
        };

        Ok(BatchEngine {
            inner: Arc::new(inner),
        })
    }
}

/// Priority batch engine with a resizable worker pool.
///
/// Cloning is cheap; clones share the same engine.
#[derive(Clone)]
pub struct BatchEngine {
    inner: Arc<EngineInner>,
}

impl BatchEngine {
    pub fn builder(config: EngineConfig, executor: impl JobExecutor) -> BatchEngineBuilder {
        BatchEngineBuilder {
            config,
            executor: Arc::new(executor),
            monitor: None,
            cache: None,
        }
    }

    /// Build an engine with the default monitor and cache.
    pub fn new(config: EngineConfig, executor: impl JobExecutor) -> Result<Self> {
        Self::builder(config, executor).build()
    }

    /// Start `max_workers` workers (bounded by the configured range) and the
    /// background tasks.
    pub fn start(&self, max_workers: usize) -> Result<()> {
        let inner = &self.inner;
        let config = &inner.config;

        let mut run = inner.run.lock();
        if run.is_some() {
            return Err(Error::validation("engine is already running"));
        }
        if inner.stopping.load(Ordering::SeqCst) {
            return Err(Error::validation("engine is still stopping"));
        }

        let workers = max_workers.min(config.max_workers).max(config.min_workers);
        let background_token = CancellationToken::new();
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

        let mut state = RunState {
            pool: WorkerPool::new(CancellationToken::new()),
            abort: CancellationToken::new(),
            background_token: background_token.clone(),
            background: JoinSet::new(),
            progress_tx,
            max_workers: workers,
        };

        for _ in 0..workers {
            inner.spawn_worker(&mut state);
        }

        state.background.spawn(
            inner
                .clone()
                .progress_loop(progress_rx, background_token.clone()),
        );

        if config.monitor.enabled {
            state
                .background
                .spawn(inner.clone().autoscale_loop(background_token.clone()));
        }

        if let Some(interval) = config.persistence.snapshot_interval() {
            state
                .background
                .spawn(inner.clone().snapshot_loop(interval, background_token.clone()));
        }

        let sweeper = inner
            .cache
            .spawn_sweeper(config.cache.sweep_interval(), background_token.child_token());
        state.background.spawn(async move {
            let _ = sweeper.await;
        });

        *run = Some(state);
        drop(run);

        info!(
            workers,
            min_workers = config.min_workers,
            queued = inner.queue.len(),
            "Batch engine started"
        );
        inner.emit(EngineEvent::WorkersChanged {
            previous: 0,
            current: workers,
        });
        Ok(())
    }

    /// Stop the engine and write a final queue snapshot.
    ///
    /// A graceful stop lets in-flight jobs finish. Otherwise every in-flight
    /// job is asked to cancel and the call waits until each has returned.
    /// Pending jobs stay queued either way.
    pub async fn stop(&self, graceful: bool) -> Result<()> {
        let state = {
            let mut run = self.inner.run.lock();
            let state = run.take();
            if state.is_some() {
                self.inner.stopping.store(true, Ordering::SeqCst);
            }
            state
        };
        let Some(state) = state else {
            return Ok(());
        };
        let RunState {
            mut pool,
            abort,
            background_token,
            mut background,
            ..
        } = state;

        info!(graceful, "Stopping batch engine");
        let previous = pool.len();

        pool.retire_all();
        if !graceful {
            for mut entry in self.inner.active.iter_mut() {
                entry.reason.get_or_insert(CancelReason::Shutdown);
            }
            abort.cancel();
        }
        pool.shutdown().await;

        background_token.cancel();
        while background.join_next().await.is_some() {}

        self.inner.emit(EngineEvent::WorkersChanged {
            previous,
            current: 0,
        });

        let result = self.inner.write_snapshot().await;
        self.inner.stopping.store(false, Ordering::SeqCst);
        info!("Batch engine stopped");
        result
    }

    pub fn is_running(&self) -> bool {
        self.inner.run.lock().is_some()
    }

    /// Queue a job. Works whether or not the engine is running.
    pub fn submit(&self, request: JobRequest) -> Result<JobId> {
        let job = self.inner.queue.submit(request)?;
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.emit(EngineEvent::JobSubmitted {
            job_id: job.id.clone(),
            name: job.name.clone(),
            priority: job.priority,
        });
        Ok(job.id)
    }

    /// Cancel a job.
    ///
    /// A pending job is removed and recorded as cancelled. A running job is
    /// asked to stop at its next checkpoint.
    pub async fn cancel_job(&self, id: &JobId) -> JobCancellation {
        match self.inner.queue.cancel(id) {
            CancelOutcome::Cancelled(job) => {
                self.inner.record_finished(*job).await;
                JobCancellation::Cancelled
            }
            CancelOutcome::NotCancellable => {
                if self.inner.request_cancel(id, CancelReason::User) {
                    info!(job_id = %id, "Cancellation requested for running job");
                    JobCancellation::Requested
                } else if self.inner.history.contains(id) {
                    JobCancellation::NotCancellable
                } else {
                    JobCancellation::NotFound
                }
            }
        }
    }

    /// Cancel every pending job and request cancellation of every running
    /// one. Returns how many jobs were affected.
    pub async fn cancel_all(&self) -> usize {
        let drained = self.inner.queue.drain();
        let mut affected = drained.len();
        for job in drained {
            self.inner.record_finished(job).await;
        }

        let running: Vec<JobId> = self
            .inner
            .active
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in running {
            if self.inner.request_cancel(&id, CancelReason::User) {
                affected += 1;
            }
        }

        info!(affected, "Cancelled all jobs");
        affected
    }

    /// Stop handing out new jobs. Running jobs continue.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            info!("Batch engine paused");
        }
    }

    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            self.inner.queue.wake_all();
            info!("Batch engine resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Resize the pool, clamped to `[min_workers, max_workers]`.
    ///
    /// Returns the resulting worker count.
    pub fn set_worker_count(&self, count: usize) -> Result<usize> {
        self.inner
            .resize(count)
            .ok_or_else(|| Error::validation("engine is not running"))
    }

    pub fn worker_count(&self) -> usize {
        self.inner
            .run
            .lock()
            .as_ref()
            .map_or(0, |state| state.pool.len())
    }

    /// Re-queue jobs from the last snapshot.
    ///
    /// Only allowed while the engine is stopped: a running engine's snapshot
    /// includes its in-flight jobs. Jobs that are already running or already
    /// recorded in history are skipped.
    pub async fn recover(&self) -> Result<usize> {
        if self.is_running() || self.inner.stopping.load(Ordering::SeqCst) {
            return Err(Error::validation("cannot recover while the engine is running"));
        }

        let snapshots = self.inner.snapshots.clone();
        let jobs = tokio::task::spawn_blocking(move || snapshots.restore_queue())
            .await
            .map_err(|e| Error::Other(format!("snapshot restore task failed: {e}")))??;

        let inner = &self.inner;
        let jobs: Vec<Job> = jobs
            .into_iter()
            .filter(|job| !inner.active.contains_key(&job.id) && !inner.history.contains(&job.id))
            .collect();
        Ok(inner.queue.restore(jobs))
    }

    /// Write a queue snapshot now.
    pub async fn snapshot_now(&self) -> Result<()> {
        self.inner.write_snapshot().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Running jobs, in submission order.
    pub fn active_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .active
            .iter()
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.sequence);
        jobs
    }

    /// Look up a pending or running job.
    pub fn job(&self, id: &JobId) -> Option<Job> {
        if let Some(entry) = self.inner.active.get(id) {
            return Some(entry.job.clone());
        }
        self.inner.queue.get(id)
    }

    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        let (running, workers, max_workers) = match inner.run.lock().as_ref() {
            Some(state) => (true, state.pool.len(), state.max_workers),
            None => (false, 0, inner.config.max_workers),
        };
        let counters = &inner.counters;

        EngineStats {
            running,
            paused: self.is_paused(),
            workers,
            min_workers: inner.config.min_workers,
            max_workers,
            active_jobs: inner.active.len(),
            queued_jobs: inner.queue.len(),
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            cache: inner.cache.stats(),
        }
    }

    /// Report stuck jobs, queue pressure and system load.
    pub fn health(&self) -> EngineHealth {
        let inner = &self.inner;
        let threshold = inner.config.stuck_job_threshold();
        let now = Utc::now();

        let stuck_jobs: Vec<StuckJob> = inner
            .active
            .iter()
            .filter_map(|entry| {
                let started = entry.job.started_at?;
                let running = (now - started).to_std().ok()?;
                (running >= threshold).then(|| StuckJob {
                    job_id: entry.job.id.clone(),
                    name: entry.job.name.clone(),
                    worker_id: entry.worker_id,
                    running_secs: running.as_secs(),
                })
            })
            .collect();

        let queue_depth = inner.queue.depth_status();
        let mut issues = Vec::new();
        if !stuck_jobs.is_empty() {
            issues.push(format!(
                "{} job(s) running longer than {}s",
                stuck_jobs.len(),
                threshold.as_secs()
            ));
        }
        if queue_depth == QueueDepthStatus::Critical {
            issues.push(format!("queue depth critical ({} pending)", inner.queue.len()));
        }
        if inner.monitor.is_overloaded() {
            issues.push("system load above high-water marks".to_string());
        }

        let status = if !self.is_running() {
            HealthStatus::Stopped
        } else if issues.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        EngineHealth {
            status,
            stuck_jobs,
            queue_depth,
            resources: inner.monitor.latest(),
            issues,
        }
    }

    pub fn queue(&self) -> &PriorityJobQueue {
        &self.inner.queue
    }

    pub fn cache(&self) -> &Arc<SharedCache> {
        &self.inner.cache
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.inner.history
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.inner.monitor
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl EngineInner {
    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn spawn_worker(self: &Arc<Self>, state: &mut RunState) -> usize {
        let inner = self.clone();
        let abort = state.abort.clone();
        let progress_tx = state.progress_tx.clone();
        state.pool.spawn(move |worker_id, retire| {
            inner.worker_loop(worker_id, retire, abort, progress_tx)
        })
    }

    /// Grow or shrink the running pool. `None` when not running.
    fn resize(self: &Arc<Self>, target: usize) -> Option<usize> {
        let (previous, current) = {
            let mut run = self.run.lock();
            let state = run.as_mut()?;
            let target = target.clamp(self.config.min_workers, state.max_workers);
            let previous = state.pool.len();

            while state.pool.len() < target {
                self.spawn_worker(state);
            }
            while state.pool.len() > target {
                state.pool.retire_one();
            }
            (previous, target)
        };

        if previous != current {
            info!(previous, current, "Worker count changed");
            self.emit(EngineEvent::WorkersChanged { previous, current });
        }
        Some(current)
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        retire: CancellationToken,
        abort: CancellationToken,
        progress_tx: mpsc::Sender<ProgressUpdate>,
    ) {
        debug!(worker_id, "Worker started");

        loop {
            if retire.is_cancelled() {
                break;
            }

            let paused = &self.paused;
            let Some(job) = self
                .queue
                .dequeue_blocking_when(&retire, || !paused.load(Ordering::SeqCst))
                .await
            else {
                break;
            };

            self.execute_job(job, worker_id, &abort, &progress_tx).await;
        }

        debug!(worker_id, "Worker exited");
    }

    async fn execute_job(
        &self,
        mut job: Job,
        worker_id: usize,
        abort: &CancellationToken,
        progress_tx: &mpsc::Sender<ProgressUpdate>,
    ) {
        if let Err(e) = job.start() {
            error!(job_id = %job.id, "Cannot start dequeued job: {}", e);
            return;
        }

        let job_id = job.id.clone();
        let token = abort.child_token();
        self.active.insert(
            job_id.clone(),
            ActiveJob {
                job: job.clone(),
                worker_id,
                token: token.clone(),
                reason: None,
            },
        );

        info!(
            job_id = %job_id,
            worker_id,
            name = %job.name,
            priority = job.priority,
            queue_wait_ms = job.queue_wait().map(|d| d.num_milliseconds()),
            "Job started"
        );
        self.emit(EngineEvent::JobStarted {
            job_id: job_id.clone(),
            worker_id,
        });

        let ctx = ExecutionContext::new(
            job_id.clone(),
            job.name.clone(),
            ProgressReporter::new(job_id.clone(), progress_tx.clone()),
            token.clone(),
            self.cache.clone(),
        );
        let executor = self.executor.clone();
        let parameters = job.parameters.clone();
        let mut handle = tokio::task::spawn_blocking(move || executor.execute(&parameters, &ctx));

        let joined = match self.config.job_timeout() {
            Some(timeout) => match tokio::time::timeout(timeout, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(job_id = %job_id, "Job exceeded its deadline of {:?}, cancelling", timeout);
                    self.request_cancel(&job_id, CancelReason::Deadline);
                    handle.await
                }
            },
            None => handle.await,
        };

        // The registry copy carries the latest progress.
        let (mut job, reason) = match self.active.remove(&job_id) {
            Some((_, entry)) => (entry.job, entry.reason),
            None => (job, None),
        };
        let reason = reason.or_else(|| token.is_cancelled().then_some(CancelReason::Shutdown));

        let transition = match joined {
            Ok(Ok(())) => job.complete(),
            Ok(Err(err)) => match (reason, err) {
                (Some(CancelReason::Deadline), _) => job.fail(format!(
                    "deadline of {}s exceeded",
                    self.config.job_timeout_secs.unwrap_or_default()
                )),
                (Some(_), _) | (None, ExecutionError::Cancelled) => job.cancel(),
                (None, ExecutionError::Failed(msg)) => job.fail(msg),
            },
            Err(join_err) if join_err.is_panic() => job.fail(format!(
                "executor panicked: {}",
                panic_message(join_err.into_panic())
            )),
            Err(join_err) => job.fail(format!("executor task failed: {join_err}")),
        };

        if let Err(e) = transition {
            error!(job_id = %job_id, "Failed to finalize job: {}", e);
            return;
        }

        match job.status {
            JobStatus::Failed => warn!(
                job_id = %job_id,
                error = job.error.as_deref().unwrap_or_default(),
                "Job failed"
            ),
            status => info!(
                job_id = %job_id,
                status = %status,
                duration_ms = job.duration().map(|d| d.num_milliseconds()),
                "Job finished"
            ),
        }

        self.record_finished(job).await;
    }

    /// Count, persist and announce a terminal job.
    async fn record_finished(&self, job: Job) {
        let counter = match job.status {
            JobStatus::Completed => &self.counters.completed,
            JobStatus::Failed => &self.counters.failed,
            JobStatus::Cancelled => &self.counters.cancelled,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        match HistoryRecord::from_job(&job) {
            Ok(record) => {
                let history = self.history.clone();
                match tokio::task::spawn_blocking(move || history.append_history(record)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(job_id = %job.id, "Failed to record history: {}", e),
                    Err(e) => warn!(job_id = %job.id, "History task failed: {}", e),
                }
            }
            Err(e) => warn!(job_id = %job.id, "No history record: {}", e),
        }

        self.emit(EngineEvent::JobFinished {
            job_id: job.id,
            status: job.status,
            error: job.error,
        });
    }

    /// Cancel a running job's token. Returns false if it is not running.
    fn request_cancel(&self, id: &JobId, reason: CancelReason) -> bool {
        match self.active.get_mut(id) {
            Some(mut entry) => {
                entry.reason.get_or_insert(reason);
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    fn apply_progress(&self, update: ProgressUpdate) {
        let applied = match self.active.get_mut(&update.job_id) {
            Some(mut entry) => entry.job.set_progress(update.percent),
            None => false,
        };
        if applied {
            self.emit(EngineEvent::JobProgress {
                job_id: update.job_id,
                percent: update.percent,
            });
        }
    }

    async fn progress_loop(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<ProgressUpdate>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                update = rx.recv() => match update {
                    Some(update) => self.apply_progress(update),
                    None => break,
                },
            }
        }
    }

    async fn autoscale_loop(self: Arc<Self>, token: CancellationToken) {
        let period = self.monitor.interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Autoscaler started (interval: {:?})", period);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.autoscale_once().await,
            }
        }

        debug!("Autoscaler stopped");
    }

    async fn autoscale_once(self: &Arc<Self>) {
        let monitor = self.monitor.clone();
        if tokio::task::spawn_blocking(move || monitor.sample().is_ok())
            .await
            .unwrap_or(false)
        {
            let (current, max) = match self.run.lock().as_ref() {
                Some(state) => (state.pool.len(), state.max_workers),
                None => return,
            };

            let delta = self
                .monitor
                .recommend_worker_delta(current, max, self.config.min_workers);
            if delta != 0 {
                let target = current.saturating_add_signed(delta as isize);
                debug!(current, target, "Applying worker recommendation");
                self.resize(target);
            }
        }
    }

    async fn snapshot_loop(self: Arc<Self>, period: std::time::Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.write_snapshot().await {
                        error!("Periodic queue snapshot failed: {}", e);
                    }
                }
            }
        }
    }

    /// Snapshot pending and running jobs.
    async fn write_snapshot(&self) -> Result<()> {
        let mut jobs = self.queue.peek_snapshot();
        jobs.extend(self.active.iter().map(|entry| entry.job.clone()));
        jobs.sort_by_key(|job| job.sequence);

        let snapshots = self.snapshots.clone();
        tokio::task::spawn_blocking(move || snapshots.snapshot_queue(&jobs))
            .await
            .map_err(|e| Error::Other(format!("snapshot task failed: {e}")))?
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
