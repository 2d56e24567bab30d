//! Job model, priority queue and the batch execution engine.

pub mod events;
pub mod executor;
pub mod health;
pub mod job;
pub mod job_queue;
pub mod manager;
pub mod progress;
pub mod worker_pool;

pub use events::{EngineEvent, JobCancellation};
pub use executor::{ExecutionContext, ExecutionError, JobExecutor, SharedCache};
pub use health::{EngineHealth, EngineStats, HealthStatus, StuckJob};
pub use job::{Job, JobId, JobParameters, JobRequest, JobStatus, MAX_PRIORITY};
pub use job_queue::{CancelOutcome, PriorityJobQueue, QueueConfig, QueueDepthStatus};
pub use manager::{BatchEngine, BatchEngineBuilder};
pub use progress::{ProgressReporter, ProgressUpdate};
pub use worker_pool::WorkerPool;
