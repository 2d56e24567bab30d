//! Crash-recovery snapshot of unfinished jobs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::fs::{read_json, remove_if_exists, write_json_atomic};
use crate::Result;
use crate::engine::{Job, JobStatus};

#[derive(Serialize)]
struct SnapshotFileRef<'a> {
    saved_at: DateTime<Utc>,
    jobs: &'a [Job],
}

/// Persists pending and in-flight jobs so they can be queued again after a
/// restart.
pub struct QueueSnapshotStore {
    path: PathBuf,
}

impl QueueSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write the given jobs, replacing any previous snapshot.
    ///
    /// Terminal jobs are left out.
    pub fn snapshot_queue(&self, jobs: &[Job]) -> Result<()> {
        let unfinished: Vec<Job> = jobs.iter().filter(|j| !j.is_terminal()).cloned().collect();

        write_json_atomic(
            &self.path,
            &SnapshotFileRef {
                saved_at: Utc::now(),
                jobs: &unfinished,
            },
        )
        .inspect_err(|e| warn!(path = %self.path.display(), "Failed to write queue snapshot: {}", e))?;

        debug!(count = unfinished.len(), "Wrote queue snapshot");
        Ok(())
    }

    /// Read the snapshot back as pending jobs ordered by sequence.
    ///
    /// Jobs that were processing are reset to pending; duplicates (by id) and
    /// malformed entries are dropped. A missing file yields no jobs.
    pub fn restore_queue(&self) -> Result<Vec<Job>> {
        let Some(value) = read_json::<Value>(&self.path)? else {
            return Ok(Vec::new());
        };

        let entries = match value.get("jobs") {
            Some(Value::Array(entries)) => entries.clone(),
            _ => {
                warn!(path = %self.path.display(), "Queue snapshot has no job list, ignoring");
                return Ok(Vec::new());
            }
        };

        let mut seen = HashSet::new();
        let mut jobs: Vec<Job> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<Job>(entry) {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed snapshot entry");
                    None
                }
            })
            .filter(|job| !job.is_terminal())
            .map(|mut job| {
                if job.status == JobStatus::Processing {
                    job.reset_for_recovery();
                }
                job
            })
            .collect();

        jobs.sort_by_key(|job| job.sequence);
        jobs.retain(|job| seen.insert(job.id.clone()));

        info!(
            path = %self.path.display(),
            count = jobs.len(),
            "Recovered jobs from queue snapshot"
        );
        Ok(jobs)
    }

    /// Delete the snapshot file.
    pub fn clear(&self) -> Result<()> {
        remove_if_exists(&self.path)?;
        Ok(())
    }
}
