use std::fmt;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cluster::WorkStation;
use crate::error::Result;
use crate::job::TaskResult;

/// How a job's background loop ended.
#[derive(Debug)]
pub enum JobOutcome {
    /// A job started from local user input; all frames are here.
    Completed { results: Vec<TaskResult> },
    /// A job pushed to us by `requester`; our share was sent back.
    Returned {
        requester: WorkStation,
        delivered: bool,
        results: Vec<TaskResult>,
    },
    Cancelled,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed { results } => write!(f, "completed with {} results", results.len()),
            JobOutcome::Returned {
                requester,
                delivered,
                results,
            } => write!(
                f,
                "returned {} results to {} (delivered: {})",
                results.len(),
                requester,
                delivered
            ),
            JobOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Handle to the background task driving one job.
pub struct JobHandle {
    pub job_id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<JobOutcome>,
}

impl JobHandle {
    pub(crate) fn new(job_id: Uuid, cancel: CancellationToken, join: JoinHandle<JobOutcome>) -> Self {
        Self {
            job_id,
            cancel,
            join,
        }
    }

    /// Ask the loop to stop after the task it is currently computing.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the loop to finish and the job to leave the store.
    pub async fn wait(self) -> Result<JobOutcome> {
        Ok(self.join.await?)
    }
}
