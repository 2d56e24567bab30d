//! Priority batch scheduler with a resource-aware worker pool.
//!
//! Jobs are queued by priority, executed by a resizable pool of workers and
//! recorded to a bounded history. Pending work is snapshotted to disk so it
//! can be recovered after a restart.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod persistence;

pub use config::EngineConfig;
pub use engine::{BatchEngine, JobId, JobRequest, JobStatus};
pub use error::{Error, Result};
