//! System load sampling and worker-count recommendations.
//!
//! Recommendations are advisory; the engine decides whether to apply them.

mod policy;
mod sampler;

pub use policy::WorkerScalingPolicy;
pub use sampler::{LoadSampler, SysinfoSampler};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Result;

/// Resource monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Apply recommendations to the worker pool.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Interval between samples in milliseconds.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_high_cpu_percent")]
    pub high_cpu_percent: f32,
    #[serde(default = "default_high_memory_percent")]
    pub high_memory_percent: f32,
    #[serde(default = "default_low_cpu_percent")]
    pub low_cpu_percent: f32,
    #[serde(default = "default_low_memory_percent")]
    pub low_memory_percent: f32,
}

fn default_enabled() -> bool {
    true
}

fn default_sample_interval_ms() -> u64 {
    5000
}

fn default_high_cpu_percent() -> f32 {
    80.0
}

fn default_high_memory_percent() -> f32 {
    85.0
}

fn default_low_cpu_percent() -> f32 {
    50.0
}

fn default_low_memory_percent() -> f32 {
    60.0
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            sample_interval_ms: default_sample_interval_ms(),
            high_cpu_percent: default_high_cpu_percent(),
            high_memory_percent: default_high_memory_percent(),
            low_cpu_percent: default_low_cpu_percent(),
            low_memory_percent: default_low_memory_percent(),
        }
    }
}

impl MonitorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

/// One reading of system load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub timestamp: DateTime<Utc>,
}

impl ResourceSnapshot {
    pub fn new(cpu_percent: f32, memory_percent: f32) -> Self {
        Self {
            cpu_percent,
            memory_percent,
            timestamp: Utc::now(),
        }
    }
}

/// Samples load and remembers the latest good reading.
pub struct ResourceMonitor {
    sampler: Arc<dyn LoadSampler>,
    policy: WorkerScalingPolicy,
    interval: Duration,
    latest: Mutex<Option<ResourceSnapshot>>,
}

impl ResourceMonitor {
    /// Create a monitor backed by the host's `sysinfo` readings.
    pub fn new(config: &MonitorConfig) -> Self {
        Self::with_sampler(config, Arc::new(SysinfoSampler::new()))
    }

    pub fn with_sampler(config: &MonitorConfig, sampler: Arc<dyn LoadSampler>) -> Self {
        Self {
            sampler,
            policy: WorkerScalingPolicy::from_config(config),
            interval: config.sample_interval(),
            latest: Mutex::new(None),
        }
    }

    /// Take a new reading.
    ///
    /// A failed reading clears the stored snapshot so no recommendation is
    /// made from stale data.
    pub fn sample(&self) -> Result<ResourceSnapshot> {
        match self.sampler.sample() {
            Ok(snapshot) => {
                debug!(
                    cpu = snapshot.cpu_percent,
                    memory = snapshot.memory_percent,
                    "Sampled system load"
                );
                *self.latest.lock() = Some(snapshot);
                Ok(snapshot)
            }
            Err(e) => {
                warn!("Resource sampling failed: {}", e);
                *self.latest.lock() = None;
                Err(e)
            }
        }
    }

    /// The latest successful reading, if any.
    pub fn latest(&self) -> Option<ResourceSnapshot> {
        *self.latest.lock()
    }

    /// Worker-count change suggested by the latest reading; 0 without one.
    pub fn recommend_worker_delta(&self, current: usize, max: usize, min: usize) -> i32 {
        match self.latest() {
            Some(snapshot) => self.policy.delta(&snapshot, current, max, min),
            None => 0,
        }
    }

    /// Whether the latest reading is above a high mark.
    pub fn is_overloaded(&self) -> bool {
        self.latest()
            .is_some_and(|snapshot| self.policy.is_overloaded(&snapshot))
    }

    pub fn policy(&self) -> &WorkerScalingPolicy {
        &self.policy
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
