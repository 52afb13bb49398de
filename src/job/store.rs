use uuid::Uuid;

use crate::error::{ClusterError, Result};
use crate::job::state::SharedJob;

/// Single-slot register for the job this workstation currently owns.
///
/// Shared as `Arc<RwLock<JobStore>>`; `put` under the write lock is the
/// admission gate that keeps at most one job per workstation.
#[derive(Debug, Default)]
pub struct JobStore {
    slot: Option<SharedJob>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn present(&self) -> bool {
        self.slot.is_some()
    }

    pub fn get(&self) -> Result<SharedJob> {
        self.slot.clone().ok_or(ClusterError::NoActiveJob)
    }

    pub fn put(&mut self, job: SharedJob) -> Result<()> {
        if self.slot.is_some() {
            return Err(ClusterError::JobAlreadyActive);
        }
        self.slot = Some(job);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }

    /// Clear the slot only if it still holds the job with `job_id`.
    pub async fn release(&mut self, job_id: Uuid) -> bool {
        let matches = match &self.slot {
            Some(job) => job.lock().await.id == job_id,
            None => false,
        };
        if matches {
            self.slot = None;
        }
        matches
    }
}
