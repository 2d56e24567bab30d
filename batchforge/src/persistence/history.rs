//! Bounded record of finished jobs.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::fs::{read_json, write_json_atomic};
use crate::engine::{Job, JobId, JobStatus};
use crate::{Error, Result};

/// Default number of records kept.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Terminal snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub job_id: JobId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: u8,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Build a record from a finished job.
    pub fn from_job(job: &Job) -> Result<Self> {
        if !job.is_terminal() {
            return Err(Error::validation(format!(
                "job {} is {} and has no history record yet",
                job.id, job.status
            )));
        }
        Ok(Self {
            job_id: job.id.clone(),
            name: job.name.clone(),
            priority: job.priority,
            status: job.status,
            duration_secs: job
                .duration()
                .map(|d| d.num_milliseconds() as f64 / 1000.0),
            error: job.error.clone(),
            finished_at: job.finished_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Aggregates over the retained history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStatistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Completed share of all records, in percent.
    pub success_rate: f64,
    /// Mean duration of records that ran.
    pub average_duration_secs: f64,
}

#[derive(Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    records: VecDeque<HistoryRecord>,
}

/// File-backed history, newest last, capped at `limit` records.
pub struct HistoryStore {
    path: PathBuf,
    limit: usize,
    records: Mutex<VecDeque<HistoryRecord>>,
}

impl HistoryStore {
    /// Open the store, loading existing records.
    ///
    /// An unreadable or corrupt file is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>, limit: usize) -> Self {
        let path = path.into();
        let mut records = match read_json::<HistoryFile>(&path) {
            Ok(Some(file)) => file.records,
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!(path = %path.display(), "Ignoring unreadable history: {}", e);
                VecDeque::new()
            }
        };
        while records.len() > limit {
            records.pop_front();
        }

        Self {
            path,
            limit,
            records: Mutex::new(records),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Append a record, dropping the oldest past the cap, and persist.
    ///
    /// The in-memory history is updated even when the write fails.
    pub fn append_history(&self, record: HistoryRecord) -> Result<()> {
        let mut records = self.records.lock();
        records.push_back(record);
        while records.len() > self.limit {
            records.pop_front();
        }
        self.write(&records)
    }

    fn write(&self, records: &VecDeque<HistoryRecord>) -> Result<()> {
        #[derive(Serialize)]
        struct HistoryFileRef<'a> {
            records: &'a VecDeque<HistoryRecord>,
        }

        write_json_atomic(&self.path, &HistoryFileRef { records }).inspect_err(|e| {
            warn!(path = %self.path.display(), "Failed to write history: {}", e);
        })
    }

    /// Records, oldest first.
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Most recent record for `id`.
    pub fn find(&self, id: &JobId) -> Option<HistoryRecord> {
        self.records
            .lock()
            .iter()
            .rev()
            .find(|record| &record.job_id == id)
            .cloned()
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.records.lock().iter().any(|record| &record.job_id == id)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<()> {
        let mut records = self.records.lock();
        records.clear();
        self.write(&records)
    }

    pub fn statistics(&self) -> HistoryStatistics {
        let records = self.records.lock();
        let mut stats = HistoryStatistics {
            total: records.len(),
            ..Default::default()
        };

        let mut duration_sum = 0.0;
        let mut timed = 0usize;
        for record in records.iter() {
            match record.status {
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
                _ => {}
            }
            if let Some(duration) = record.duration_secs {
                duration_sum += duration;
                timed += 1;
            }
        }

        if stats.total > 0 {
            stats.success_rate = stats.completed as f64 / stats.total as f64 * 100.0;
        }
        if timed > 0 {
            stats.average_duration_secs = duration_sum / timed as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::JobRequest;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(name: &str, status: JobStatus, duration: Option<f64>) -> HistoryRecord {
        HistoryRecord {
            job_id: JobId::new(),
            name: name.to_string(),
            priority: 0,
            status,
            duration_secs: duration,
            error: None,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_cap_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let history = HistoryStore::open(dir.path().join("history.json"), 3);

        for i in 0..5 {
            history
                .append_history(record(&format!("r{i}"), JobStatus::Completed, None))
                .unwrap();
        }

        let names: Vec<String> = history.records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["r2", "r3", "r4"]);

        let reopened = HistoryStore::open(dir.path().join("history.json"), 3);
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.records()[2].name, "r4");
    }

    #[test]
    fn test_reopen_with_smaller_limit_trims() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let history = HistoryStore::open(&path, 10);
        for i in 0..4 {
            history
                .append_history(record(&format!("r{i}"), JobStatus::Completed, None))
                .unwrap();
        }

        let smaller = HistoryStore::open(&path, 2);
        let names: Vec<String> = smaller.records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["r2", "r3"]);
    }

    #[test]
    fn test_statistics() {
        let dir = TempDir::new().unwrap();
        let history = HistoryStore::open(dir.path().join("history.json"), 50);
        history
            .append_history(record("a", JobStatus::Completed, Some(2.0)))
            .unwrap();
        history
            .append_history(record("b", JobStatus::Completed, Some(4.0)))
            .unwrap();
        history
            .append_history(record("c", JobStatus::Failed, Some(3.0)))
            .unwrap();
        history
            .append_history(record("d", JobStatus::Cancelled, None))
            .unwrap();

        let stats = history.statistics();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cancelled, 1);
        assert!((stats.success_rate - 50.0).abs() < 1e-9);
        assert!((stats.average_duration_secs - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, b"[[[").unwrap();

        let history = HistoryStore::open(&path, 50);
        assert!(history.is_empty());
        history
            .append_history(record("a", JobStatus::Completed, None))
            .unwrap();
        assert_eq!(HistoryStore::open(&path, 50).len(), 1);
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let history = HistoryStore::open(&path, 50);
        history
            .append_history(record("a", JobStatus::Failed, None))
            .unwrap();
        history.clear().unwrap();
        assert!(HistoryStore::open(&path, 50).is_empty());
    }

    #[test]
    fn test_record_from_job() {
        let mut job = Job::from_request(
            JobRequest::new(json!({"input": "x"})).with_name("render"),
            1,
        )
        .unwrap();
        assert!(HistoryRecord::from_job(&job).is_err());

        job.start().unwrap();
        job.fail("boom").unwrap();
        let record = HistoryRecord::from_job(&job).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert_eq!(record.name, "render");
        assert!(record.duration_secs.is_some());
    }
}
