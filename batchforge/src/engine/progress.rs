use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;

use super::job::JobId;

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub job_id: JobId,
    pub percent: u8,
}

/// Sends progress of one job to the engine.
///
/// Reporting never blocks the executor: when the channel is full the update
/// is dropped, and unchanged percentages are not sent at all.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    tx: mpsc::Sender<ProgressUpdate>,
    last_sent: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self {
            job_id,
            tx,
            last_sent: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn noop(job_id: JobId) -> Self {
        let (tx, _rx) = mpsc::channel::<ProgressUpdate>(1);
        Self::new(job_id, tx)
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Report completion percentage, clamped to 100.
    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        if self.last_sent.swap(percent, Ordering::Relaxed) == percent {
            return;
        }
        let _ = self.tx.try_send(ProgressUpdate {
            job_id: self.job_id.clone(),
            percent,
        });
    }
}
