use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cluster::WorkStation;
use crate::error::{ClusterError, Result};
use crate::job::batch::{RemoteTaskBatch, RequestedTaskBatch};
use crate::job::task::{ImageProperties, Task, TaskResult};

pub type SharedJob = Arc<Mutex<Job>>;

/// Progress flags derived from a [`Job`]; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComputationStatus {
    /// Local queue is empty and no popped task is still being computed.
    pub tasks_done: bool,
    /// No batch is waiting on a peer.
    pub remote_done: bool,
    /// No borrowed batch is held.
    pub borrowed_done: bool,
    /// Results went back to the requester, or there is no requester.
    pub results_returned: bool,
}

impl ComputationStatus {
    pub fn fully_done(&self) -> bool {
        self.tasks_done && self.remote_done && self.borrowed_done && self.results_returned
    }

    pub fn ready_to_return_to_requester(&self) -> bool {
        self.tasks_done && self.remote_done && self.borrowed_done
    }
}

/// The unit of work owned by this workstation.
///
/// Every method is a single atomic step once the caller holds the job's
/// lock. Tasks move between the local queue and outstanding remote batches
/// without ever being duplicated or dropped.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    work_requester: Option<WorkStation>,
    remaining: VecDeque<Task>,
    computing: usize,
    outstanding: Vec<RemoteTaskBatch>,
    borrowed: Option<RequestedTaskBatch>,
    collected: Vec<TaskResult>,
    returned: bool,
}

impl Job {
    pub fn new(tasks: Vec<Task>, work_requester: Option<WorkStation>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            work_requester,
            remaining: tasks.into(),
            computing: 0,
            outstanding: Vec::new(),
            borrowed: None,
            collected: Vec::new(),
            returned: false,
        }
    }

    /// A job created from this workstation's own user input.
    pub fn local(tasks: Vec<Task>) -> Self {
        Self::new(tasks, None)
    }

    pub fn into_shared(self) -> SharedJob {
        Arc::new(Mutex::new(self))
    }

    pub fn work_requester(&self) -> Option<&WorkStation> {
        self.work_requester.as_ref()
    }

    pub fn remaining_tasks(&self) -> usize {
        self.remaining.len()
    }

    pub fn outstanding_batches(&self) -> &[RemoteTaskBatch] {
        &self.outstanding
    }

    pub fn collected_results(&self) -> &[TaskResult] {
        &self.collected
    }

    /// Take the front task for local computation. The task counts as in
    /// progress until its result is recorded.
    pub fn pop_next_task(&mut self) -> Option<Task> {
        let task = self.remaining.pop_front()?;
        self.computing += 1;
        Some(task)
    }

    pub fn record_result(&mut self, result: TaskResult) {
        self.computing = self.computing.saturating_sub(1);
        self.collected.push(result);
    }

    /// Put back a task popped for local computation that will not finish.
    pub fn abandon_task(&mut self, task: Task) {
        self.computing = self.computing.saturating_sub(1);
        self.remaining.push_front(task);
    }

    /// Move the last `n` remaining tasks into a new batch owned by `peer`.
    pub fn carve_remote_batch(&mut self, n: usize, peer: WorkStation) -> Result<RemoteTaskBatch> {
        let available = self.remaining.len();
        if n == 0 || n > available {
            return Err(ClusterError::InsufficientTasks {
                requested: n,
                available,
            });
        }
        let tasks: Vec<Task> = self.remaining.split_off(available - n).into();
        let batch = RemoteTaskBatch::new(tasks, peer);
        self.outstanding.push(batch.clone());
        Ok(batch)
    }

    /// Return a batch's tasks to the local queue. Reclaiming a batch that is
    /// no longer outstanding is a no-op and returns false.
    pub fn reclaim(&mut self, batch: &RemoteTaskBatch) -> bool {
        let Some(index) = self.outstanding.iter().position(|b| b.id == batch.id) else {
            return false;
        };
        let batch = self.outstanding.remove(index);
        self.remaining.extend(batch.tasks);
        true
    }

    /// Outstanding batches not refreshed within `max_age`. Nothing is reclaimed yet.
    pub fn timed_out_batches(&self, max_age: Duration) -> Vec<RemoteTaskBatch> {
        self.outstanding
            .iter()
            .filter(|batch| batch.is_timed_out(max_age))
            .cloned()
            .collect()
    }

    /// Credit results for the one outstanding batch owned by `peer` covering
    /// exactly the same frames. Ids restart in every job, so dimensions are
    /// compared too and each result must carry a full frame of pixels.
    pub fn accept_batch_results(
        &mut self,
        results: Vec<TaskResult>,
        peer: &WorkStation,
    ) -> Result<()> {
        if let Some(bad) = results.iter().find(|r| !r.is_well_formed()) {
            return Err(ClusterError::InvalidMessage(format!(
                "frame {} has {} bytes for {}x{}",
                bad.id(),
                bad.pixels.len(),
                bad.image.width,
                bad.image.height
            )));
        }
        let frames: BTreeSet<ImageProperties> = results.iter().map(|r| r.image).collect();
        let index = self
            .outstanding
            .iter()
            .position(|batch| {
                &batch.worker == peer
                    && batch.tasks.len() == results.len()
                    && batch.frames() == frames
            })
            .ok_or_else(|| ClusterError::UnknownBatchResult { peer: peer.clone() })?;
        self.outstanding.remove(index);
        self.collected.extend(results);
        Ok(())
    }

    /// Bump every outstanding batch held by `peer`; returns how many matched.
    pub fn refresh(&mut self, peer: &WorkStation) -> usize {
        let mut refreshed = 0;
        for batch in self.outstanding.iter_mut().filter(|b| &b.worker == peer) {
            batch.refresh();
            refreshed += 1;
        }
        refreshed
    }

    pub fn enqueue_borrowed(&mut self, batch: RequestedTaskBatch) -> Result<()> {
        if self.borrowed.is_some() {
            return Err(ClusterError::BorrowSlotFull);
        }
        self.borrowed = Some(batch);
        Ok(())
    }

    pub fn pop_borrowed_task(&mut self) -> Option<Task> {
        self.borrowed.as_mut()?.pop_task()
    }

    pub fn record_borrowed_result(&mut self, result: TaskResult) -> Result<()> {
        let borrowed = self.borrowed.as_mut().ok_or_else(|| {
            ClusterError::InvalidMessage("no borrowed batch to record into".into())
        })?;
        borrowed.record_result(result);
        Ok(())
    }

    /// Empty the borrowed slot, handing back the lender and its results.
    pub fn drain_borrowed_results(&mut self) -> Option<(WorkStation, Vec<TaskResult>)> {
        self.borrowed.take().map(RequestedTaskBatch::into_results)
    }

    /// Hand over everything collected so far for the requester and mark the
    /// job's share as returned.
    pub fn take_results_for_requester(&mut self) -> Vec<TaskResult> {
        self.returned = true;
        std::mem::take(&mut self.collected)
    }

    pub fn take_collected(&mut self) -> Vec<TaskResult> {
        std::mem::take(&mut self.collected)
    }

    pub fn status(&self) -> ComputationStatus {
        ComputationStatus {
            tasks_done: self.remaining.is_empty() && self.computing == 0,
            remote_done: self.outstanding.is_empty(),
            borrowed_done: self.borrowed.is_none(),
            results_returned: self.work_requester.is_none() || self.returned,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            created_at: self.created_at,
            work_requester: self.work_requester.as_ref().map(ToString::to_string),
            remaining_tasks: self.remaining.len(),
            computing: self.computing,
            outstanding_batches: self.outstanding.len(),
            borrowed_tasks: self.borrowed.as_ref().map(RequestedTaskBatch::remaining),
            collected_results: self.collected.len(),
            status: self.status(),
        }
    }
}

/// Serializable view of a job for the admin status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub work_requester: Option<String>,
    pub remaining_tasks: usize,
    pub computing: usize,
    pub outstanding_batches: usize,
    pub borrowed_tasks: Option<usize>,
    pub collected_results: usize,
    pub status: ComputationStatus,
}
