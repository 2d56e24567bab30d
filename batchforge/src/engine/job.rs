//! Job model and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Highest priority a job may be submitted with.
pub const MAX_PRIORITY: u8 = 10;

/// Unique job identifier, assigned at submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is waiting in the queue.
    Pending,
    /// Job is owned by a worker and executing.
    Processing,
    /// Job completed successfully.
    Completed,
    /// Job failed; `error` holds the reason.
    Failed,
    /// Job was cancelled before or during execution.
    Cancelled,
}

impl JobStatus {
    /// Whether the status is final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque job configuration handed to the executor untouched.
///
/// The engine never interprets the contents; it only guarantees the value is
/// a JSON object so it can be persisted and restored faithfully.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters(Map<String, Value>);

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build parameters from an arbitrary JSON value, rejecting non-objects.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(Error::validation(format!(
                "job parameters must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    /// Set a key, returning `self` for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A job submission as received from a caller.
///
/// The engine assigns `id` and `sequence` when the request is accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    /// Optional user-facing label.
    #[serde(default)]
    pub name: Option<String>,
    /// Priority in `0..=10`, higher runs first.
    #[serde(default)]
    pub priority: u8,
    /// Executor configuration; must be a JSON object.
    #[serde(default)]
    pub parameters: Value,
}

impl JobRequest {
    pub fn new(parameters: Value) -> Self {
        Self {
            name: None,
            priority: 0,
            parameters,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Validate the request and return its parameters.
    pub fn validate(&self) -> Result<JobParameters> {
        if self.priority > MAX_PRIORITY {
            return Err(Error::validation(format!(
                "priority {} is out of range 0..={}",
                self.priority, MAX_PRIORITY
            )));
        }
        JobParameters::from_value(self.parameters.clone())
    }
}

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(default)]
    pub name: String,
    pub priority: u8,
    /// Submission order, used as the tie-break among equal priorities.
    pub sequence: u64,
    #[serde(default)]
    pub parameters: JobParameters,
    pub status: JobStatus,
    /// Percent complete, only moves while processing.
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a pending job from a validated request.
    pub fn from_request(request: JobRequest, sequence: u64) -> Result<Self> {
        let parameters = request.validate()?;
        Ok(Self {
            id: JobId::new(),
            name: request.name.unwrap_or_default(),
            priority: request.priority,
            sequence,
            parameters,
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        })
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Pending -> Processing.
    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing)?;
        self.started_at = Some(Utc::now());
        self.progress = 0;
        Ok(())
    }

    /// Processing -> Completed.
    pub fn complete(&mut self) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        Ok(())
    }

    /// Processing -> Failed.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Pending|Processing -> Cancelled.
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(JobStatus::Cancelled)
    }

    /// Record progress. Ignored unless the job is processing.
    pub fn set_progress(&mut self, percent: u8) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.progress = percent.min(100);
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a worker currently owns the job.
    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Processing
    }

    /// Execution time, available once the job has finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some(finished - started),
            _ => None,
        }
    }

    /// Time spent waiting in the queue before a worker picked the job up.
    pub fn queue_wait(&self) -> Option<chrono::Duration> {
        self.started_at.map(|started| started - self.created_at)
    }

    /// Reset an interrupted job so it can be queued again after a restart.
    ///
    /// Execution state of an in-flight job is not recoverable, so the job
    /// goes back to the start.
    pub(crate) fn reset_for_recovery(&mut self) {
        self.status = JobStatus::Pending;
        self.progress = 0;
        self.error = None;
        self.started_at = None;
        self.finished_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending_job() -> Job {
        Job::from_request(JobRequest::new(json!({"input": "a.png"})), 1).unwrap()
    }

    #[test]
    fn test_state_machine_transitions() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        for terminal in [Completed, Failed, Cancelled] {
            for next in [Pending, Processing, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_job_lifecycle_timestamps() {
        let mut job = pending_job();
        assert!(job.started_at.is_none());

        job.start().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());
        assert!(job.set_progress(40));
        assert_eq!(job.progress, 40);

        job.complete().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.finished_at.is_some());
        assert!(job.duration().is_some());
    }

    #[test]
    fn test_terminal_job_is_immutable() {
        let mut job = pending_job();
        job.start().unwrap();
        job.fail("encoder exited with 1").unwrap();

        assert!(job.complete().is_err());
        assert!(job.cancel().is_err());
        assert!(!job.set_progress(10));
        assert_eq!(job.error.as_deref(), Some("encoder exited with 1"));
    }

    #[test]
    fn test_progress_ignored_when_pending() {
        let mut job = pending_job();
        assert!(!job.set_progress(50));
        assert_eq!(job.progress, 0);
    }

    #[test]
    fn test_progress_clamped() {
        let mut job = pending_job();
        job.start().unwrap();
        job.set_progress(250);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_request_validation() {
        assert!(JobRequest::new(json!({})).with_priority(10).validate().is_ok());
        assert!(matches!(
            JobRequest::new(json!({})).with_priority(11).validate(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            JobRequest::new(json!([1, 2])).validate(),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            JobRequest::new(json!("raw")).validate(),
            Err(Error::Validation(_))
        ));
        // A missing blob is treated as empty parameters.
        assert!(JobRequest::new(Value::Null).validate().unwrap().is_empty());
    }

    #[test]
    fn test_reset_for_recovery() {
        let mut job = pending_job();
        job.start().unwrap();
        job.set_progress(70);

        job.reset_for_recovery();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn test_parameters_accessors() {
        let params = JobParameters::new()
            .with("output", "/out")
            .with("count", 3);
        assert_eq!(params.get_str("output"), Some("/out"));
        assert_eq!(params.get_u64("count"), Some(3));
        assert_eq!(params.len(), 2);
    }
}
