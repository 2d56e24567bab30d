//! Engine configuration.
//!
//! Every field has a default. [`EngineConfig::load`] layers an optional JSON
//! file and `BATCHFORGE_*` environment variables over the defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::CacheConfig;
use crate::engine::QueueConfig;
use crate::monitor::MonitorConfig;
use crate::persistence::PersistenceConfig;
use crate::{Error, Result};

/// Upper bound of the default worker count.
const DEFAULT_MAX_WORKERS_CAP: usize = 4;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fewest workers the pool shrinks to.
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    /// Most workers the pool grows to.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Per-job deadline. A job running longer is cancelled and marked failed.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    /// Running time after which a job is reported as stuck.
    #[serde(default = "default_stuck_job_secs")]
    pub stuck_job_secs: u64,
    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(DEFAULT_MAX_WORKERS_CAP)
}

fn default_stuck_job_secs() -> u64 {
    600
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            job_timeout_secs: None,
            stuck_job_secs: default_stuck_job_secs(),
            event_capacity: default_event_capacity(),
            queue: QueueConfig::default(),
            monitor: MonitorConfig::default(),
            cache: CacheConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration: defaults, then `path` if given, then environment
    /// variables (including a `.env` file), then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::io_path("reading config", path, e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Apply `BATCHFORGE_*` overrides read through `lookup`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        override_parsed(&lookup, "BATCHFORGE_MIN_WORKERS", &mut self.min_workers);
        override_parsed(&lookup, "BATCHFORGE_MAX_WORKERS", &mut self.max_workers);
        override_parsed(&lookup, "BATCHFORGE_STUCK_JOB_SECS", &mut self.stuck_job_secs);

        if let Some(value) = lookup("BATCHFORGE_JOB_TIMEOUT_SECS") {
            match value.trim().parse::<u64>() {
                Ok(0) => self.job_timeout_secs = None,
                Ok(secs) => self.job_timeout_secs = Some(secs),
                Err(_) => warn!("Ignoring invalid BATCHFORGE_JOB_TIMEOUT_SECS={}", value),
            }
        }

        if let Some(dir) = lookup("BATCHFORGE_DATA_DIR") {
            self.persistence.data_dir = PathBuf::from(dir);
        }
        override_parsed(
            &lookup,
            "BATCHFORGE_HISTORY_LIMIT",
            &mut self.persistence.history_limit,
        );
        override_parsed(
            &lookup,
            "BATCHFORGE_SNAPSHOT_INTERVAL_SECS",
            &mut self.persistence.snapshot_interval_secs,
        );

        override_parsed(
            &lookup,
            "BATCHFORGE_CACHE_MAX_ENTRIES",
            &mut self.cache.max_entries,
        );
        override_parsed(
            &lookup,
            "BATCHFORGE_CACHE_MAX_WEIGHT",
            &mut self.cache.max_weight,
        );
        override_parsed(&lookup, "BATCHFORGE_CACHE_TTL_SECS", &mut self.cache.ttl_secs);

        override_parsed(&lookup, "BATCHFORGE_MONITOR_ENABLED", &mut self.monitor.enabled);
        override_parsed(
            &lookup,
            "BATCHFORGE_MONITOR_INTERVAL_MS",
            &mut self.monitor.sample_interval_ms,
        );
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.min_workers == 0 {
            return Err(Error::config("min_workers must be at least 1"));
        }
        if self.max_workers < self.min_workers {
            return Err(Error::config(format!(
                "max_workers ({}) must not be below min_workers ({})",
                self.max_workers, self.min_workers
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::config("event_capacity must be at least 1"));
        }
        if self.queue.critical_threshold < self.queue.warning_threshold {
            return Err(Error::config(
                "queue critical_threshold must not be below warning_threshold",
            ));
        }
        let monitor = &self.monitor;
        if monitor.low_cpu_percent > monitor.high_cpu_percent
            || monitor.low_memory_percent > monitor.high_memory_percent
        {
            return Err(Error::config(
                "monitor low-water marks must not exceed the high marks",
            ));
        }
        if self.persistence.history_limit == 0 {
            return Err(Error::config("history_limit must be at least 1"));
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }

    pub fn stuck_job_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_job_secs)
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.persistence.data_dir = data_dir.into();
        self
    }

    pub fn with_workers(mut self, min_workers: usize, max_workers: usize) -> Self {
        self.min_workers = min_workers;
        self.max_workers = max_workers;
        self
    }
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(value) = lookup(key) {
        match value.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!("Ignoring invalid {}={}", key, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.min_workers, 1);
        assert!(config.max_workers >= 1 && config.max_workers <= 4);
        assert_eq!(config.stuck_job_secs, 600);
        assert!(config.job_timeout().is_none());
        assert_eq!(config.persistence.history_limit, 50);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"max_workers": 3, "cache": {"max_entries": 7}, "persistence": {"data_dir": "/var/lib/bf"}}"#,
        )
        .unwrap();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.min_workers, 1);
        assert_eq!(config.cache.max_entries, 7);
        assert_eq!(config.cache.ttl_secs, 300);
        assert_eq!(config.persistence.data_dir, PathBuf::from("/var/lib/bf"));
        assert_eq!(config.persistence.history_limit, 50);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config.apply_env(env(&[
            ("BATCHFORGE_MAX_WORKERS", "8"),
            ("BATCHFORGE_MIN_WORKERS", " 2 "),
            ("BATCHFORGE_JOB_TIMEOUT_SECS", "90"),
            ("BATCHFORGE_DATA_DIR", "/tmp/bf"),
            ("BATCHFORGE_MONITOR_ENABLED", "false"),
            ("BATCHFORGE_CACHE_TTL_SECS", "not-a-number"),
        ]));

        assert_eq!(config.max_workers, 8);
        assert_eq!(config.min_workers, 2);
        assert_eq!(config.job_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.persistence.data_dir, PathBuf::from("/tmp/bf"));
        assert!(!config.monitor.enabled);
        assert_eq!(config.cache.ttl_secs, 300);
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let mut config = EngineConfig::default();
        config.job_timeout_secs = Some(10);
        config.apply_env(env(&[("BATCHFORGE_JOB_TIMEOUT_SECS", "0")]));
        assert!(config.job_timeout().is_none());
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let config = EngineConfig::default().with_workers(3, 2);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = EngineConfig::default().with_workers(0, 2);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.monitor.low_cpu_percent = 95.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("batchforge.json");
        std::fs::write(&path, r#"{"min_workers": 2, "max_workers": 2}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.min_workers, 2);

        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            EngineConfig::from_file(&path),
            Err(Error::Configuration(_))
        ));
    }
}
