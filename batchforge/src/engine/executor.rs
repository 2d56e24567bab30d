//! Execution callback seam between the engine and the work a job performs.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::job::{JobId, JobParameters};
use super::progress::ProgressReporter;
use crate::cache::{CacheKey, ResourceCache};

/// Cache shared by every job of an engine, holding raw file contents.
pub type SharedCache = ResourceCache<Vec<u8>>;

/// Why an execution did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("cancelled")]
    Cancelled,
}

impl ExecutionError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

impl From<crate::Error> for ExecutionError {
    fn from(err: crate::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Per-job handle given to the executor.
pub struct ExecutionContext {
    job_id: JobId,
    job_name: String,
    progress: ProgressReporter,
    cancel: CancellationToken,
    cache: Arc<SharedCache>,
}

impl ExecutionContext {
    pub fn new(
        job_id: JobId,
        job_name: impl Into<String>,
        progress: ProgressReporter,
        cancel: CancellationToken,
        cache: Arc<SharedCache>,
    ) -> Self {
        Self {
            job_id,
            job_name: job_name.into(),
            progress,
            cancel,
            cache,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Report completion percentage (0-100).
    pub fn report(&self, percent: u8) {
        self.progress.report(percent);
    }

    /// Whether cancellation of this job has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation point: returns `Err(Cancelled)` once cancellation was
    /// requested, so executors can bail out with `?`.
    pub fn checkpoint(&self) -> Result<(), ExecutionError> {
        if self.cancel.is_cancelled() {
            Err(ExecutionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Token for executors that want to wait on cancellation directly.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cache(&self) -> &Arc<SharedCache> {
        &self.cache
    }

    /// Read a file through the shared cache.
    ///
    /// The key includes the file's modification time and length, so an
    /// edited file is read again.
    pub fn load_file(&self, path: &Path) -> Result<Arc<Vec<u8>>, ExecutionError> {
        let key = CacheKey::for_path(path)?;
        self.cache.get_or_load(key, || std::fs::read(path).map_err(ExecutionError::from))
    }
}

/// Work performed for a job.
///
/// Called on a blocking thread. Implementations should call
/// [`ExecutionContext::checkpoint`] between units of work; cancellation is
/// never forced.
pub trait JobExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        parameters: &JobParameters,
        ctx: &ExecutionContext,
    ) -> Result<(), ExecutionError>;
}

impl<F> JobExecutor for F
where
    F: Fn(&JobParameters, &ExecutionContext) -> Result<(), ExecutionError> + Send + Sync + 'static,
{
    fn execute(
        &self,
        parameters: &JobParameters,
        ctx: &ExecutionContext,
    ) -> Result<(), ExecutionError> {
        self(parameters, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;

    fn context(cancel: CancellationToken) -> ExecutionContext {
        ExecutionContext::new(
            JobId::from("job-1"),
            "render",
            ProgressReporter::noop(JobId::from("job-1")),
            cancel,
            Arc::new(SharedCache::new(&CacheConfig::default())),
        )
    }

    #[test]
    fn test_checkpoint_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = context(token.clone());
        assert!(ctx.checkpoint().is_ok());

        token.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.checkpoint(), Err(ExecutionError::Cancelled));
    }

    #[test]
    fn test_closure_executor() {
        let executor = |params: &JobParameters,
                        ctx: &ExecutionContext|
         -> Result<(), ExecutionError> {
            ctx.checkpoint()?;
            match params.get_str("mode") {
                Some("ok") => Ok(()),
                _ => Err(ExecutionError::failed("unsupported mode")),
            }
        };
        let ctx = context(CancellationToken::new());

        let ok = JobParameters::new().with("mode", "ok");
        assert!(executor.execute(&ok, &ctx).is_ok());

        let bad = JobParameters::new().with("mode", "other");
        assert_eq!(
            executor.execute(&bad, &ctx),
            Err(ExecutionError::Failed("unsupported mode".into()))
        );
    }

    #[test]
    fn test_load_file_uses_cache() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("input.bin");
        std::fs::write(&path, b"pixels").unwrap();

        let ctx = context(CancellationToken::new());
        let first = ctx.load_file(&path).unwrap();
        let second = ctx.load_file(&path).unwrap();

        assert_eq!(first.as_slice(), b"pixels");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ctx.cache().stats().hits, 1);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = context(CancellationToken::new());
        let err = ctx.load_file(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, ExecutionError::Failed(_)));
    }
}
