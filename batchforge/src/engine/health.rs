use serde::{Deserialize, Serialize};

use super::job::JobId;
use super::job_queue::QueueDepthStatus;
use crate::cache::CacheStats;
use crate::monitor::ResourceSnapshot;

/// Health status of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Everything is running normally.
    Healthy,
    /// Running, but something needs attention.
    Degraded,
    /// Not running.
    #[default]
    Stopped,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// A job running longer than the stuck threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StuckJob {
    pub job_id: JobId,
    pub name: String,
    pub worker_id: usize,
    pub running_secs: u64,
}

/// Health report from [`BatchEngine::health`](super::BatchEngine::health).
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub status: HealthStatus,
    pub stuck_jobs: Vec<StuckJob>,
    pub queue_depth: QueueDepthStatus,
    pub resources: Option<ResourceSnapshot>,
    /// Human readable reasons for a degraded status.
    pub issues: Vec<String>,
}

/// Point-in-time counters of an engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub running: bool,
    pub paused: bool,
    pub workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub active_jobs: usize,
    pub queued_jobs: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub cache: CacheStats,
}

impl EngineStats {
    /// Jobs that reached a terminal state.
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}
