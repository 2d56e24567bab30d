use serde::Serialize;

use super::job::{JobId, JobStatus};

/// Events broadcast by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A job entered the queue.
    JobSubmitted {
        job_id: JobId,
        name: String,
        priority: u8,
    },
    /// A worker picked the job up.
    JobStarted { job_id: JobId, worker_id: usize },
    /// The executor reported progress.
    JobProgress { job_id: JobId, percent: u8 },
    /// The job reached a terminal state.
    JobFinished {
        job_id: JobId,
        status: JobStatus,
        error: Option<String>,
    },
    /// The worker count changed.
    WorkersChanged { previous: usize, current: usize },
}

impl EngineEvent {
    /// Job the event refers to, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            EngineEvent::JobSubmitted { job_id, .. }
            | EngineEvent::JobStarted { job_id, .. }
            | EngineEvent::JobProgress { job_id, .. }
            | EngineEvent::JobFinished { job_id, .. } => Some(job_id),
            EngineEvent::WorkersChanged { .. } => None,
        }
    }
}

/// Result of [`BatchEngine::cancel_job`](super::BatchEngine::cancel_job).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCancellation {
    /// The job was pending and is now cancelled.
    Cancelled,
    /// The job is running; it will stop at its next checkpoint.
    Requested,
    /// The job already finished.
    NotCancellable,
    /// No job with this id is known.
    NotFound,
}

/// Why a running job's token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelReason {
    User,
    Shutdown,
    Deadline,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = EngineEvent::JobProgress {
            job_id: JobId::from("j1"),
            percent: 40,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_progress");
        assert_eq!(json["job_id"], "j1");
        assert_eq!(event.job_id().map(|id| id.as_str()), Some("j1"));

        let workers = EngineEvent::WorkersChanged {
            previous: 2,
            current: 3,
        };
        assert!(workers.job_id().is_none());
    }
}
