//! File-backed presets, job history and queue snapshots.
//!
//! Every write replaces its file atomically. Stores are synchronous; the
//! engine calls them from blocking tasks.

pub mod fs;
mod history;
mod presets;
mod snapshot;

pub use history::{DEFAULT_HISTORY_LIMIT, HistoryRecord, HistoryStatistics, HistoryStore};
pub use presets::{Preset, PresetStore};
pub use snapshot::QueueSnapshotStore;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const PRESETS_FILE: &str = "presets.json";
const HISTORY_FILE: &str = "history.json";
const SNAPSHOT_FILE: &str = "queue_snapshot.json";

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding the preset, history and snapshot files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Maximum number of history records kept.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Interval between queue snapshots. Zero disables periodic snapshots.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_snapshot_interval_secs() -> u64 {
    30
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            history_limit: default_history_limit(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

impl PersistenceConfig {
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn presets_path(&self) -> PathBuf {
        self.data_dir.join(PRESETS_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    pub fn snapshot_interval(&self) -> Option<Duration> {
        (self.snapshot_interval_secs > 0).then(|| Duration::from_secs(self.snapshot_interval_secs))
    }

    pub fn open_history(&self) -> HistoryStore {
        HistoryStore::open(self.history_path(), self.history_limit)
    }

    pub fn open_snapshots(&self) -> QueueSnapshotStore {
        QueueSnapshotStore::new(self.snapshot_path())
    }

    pub fn open_presets(&self) -> crate::Result<PresetStore> {
        PresetStore::open(self.presets_path())
    }
}
