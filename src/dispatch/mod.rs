//! The work distribution protocol.
//!
//! A [`Dispatcher`] owns the lifecycle of the job held in the [`JobStore`]:
//! it fans batches out to peers, computes the local share, reclaims batches
//! whose workers went quiet, borrows spare work from busy peers and finally
//! returns results to whoever asked for them. The same type also answers the
//! receiving side of those requests for the RPC handlers.

pub mod handle;
pub mod heartbeat;

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::cluster::{NodeContext, WorkStation};
use crate::error::{ClusterError, Result};
use crate::job::{Job, JobStore, RemoteTaskBatch, RequestedTaskBatch, SharedJob, Task, TaskResult};
use crate::peer::{CalculationReply, PeerClient};
use crate::render::PixelGenerator;

pub use handle::{JobHandle, JobOutcome};
pub use heartbeat::HeartbeatSender;

#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<NodeContext>,
    store: Arc<RwLock<JobStore>>,
    client: Arc<PeerClient>,
    generator: Arc<dyn PixelGenerator>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        ctx: Arc<NodeContext>,
        store: Arc<RwLock<JobStore>>,
        client: Arc<PeerClient>,
        generator: Arc<dyn PixelGenerator>,
    ) -> Self {
        Self {
            ctx,
            store,
            client,
            generator,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel every running job loop when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn store(&self) -> &Arc<RwLock<JobStore>> {
        &self.store
    }

    /// Admit `job`, push batches to peers and spawn its background loop.
    ///
    /// Fails with [`ClusterError::JobAlreadyActive`] if a job is already held.
    pub async fn start(&self, job: Job) -> Result<JobHandle> {
        let job_id = job.id;
        let requester = job.work_requester().cloned();
        let tasks = job.remaining_tasks();
        let shared = job.into_shared();
        self.store.write().await.put(shared.clone())?;

        let clock = self.ctx.tick().await;
        match &requester {
            Some(requester) => tracing::info!(
                job_id = %job_id,
                requester = %requester,
                tasks,
                clock = %clock,
                "Accepted job from peer"
            ),
            None => tracing::info!(job_id = %job_id, tasks, clock = %clock, "Accepted local job"),
        }

        self.fan_out(&shared, requester.as_ref()).await;

        let cancel = self.shutdown.child_token();
        let join = tokio::spawn(self.clone().drive(shared, requester, cancel.clone()));
        Ok(JobHandle::new(job_id, cancel, join))
    }

    /// Carve one batch per peer up front, then push each batch on its own task.
    async fn fan_out(&self, job: &SharedJob, requester: Option<&WorkStation>) {
        let peers = self.ctx.peers().await;
        let batch_size = self.ctx.settings.batch_size;

        let batches: Vec<RemoteTaskBatch> = {
            let mut job = job.lock().await;
            peers
                .into_iter()
                // The requester is busy with the very job that sent us this work
                .filter(|peer| Some(peer) != requester)
                .filter_map(|peer| match job.carve_remote_batch(batch_size, peer.clone()) {
                    Ok(batch) => Some(batch),
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "No batch carved for peer");
                        None
                    }
                })
                .collect()
        };
        if batches.is_empty() {
            return;
        }

        let clock = self.ctx.tick().await;
        tracing::info!(batches = batches.len(), clock = %clock, "Sending remote batches");
        for batch in batches {
            let this = self.clone();
            let job = job.clone();
            tokio::spawn(async move { this.push_batch(job, batch).await });
        }
    }

    async fn push_batch(&self, job: SharedJob, batch: RemoteTaskBatch) {
        let peer = batch.worker.clone();
        let ids: Vec<u32> = batch.tasks.iter().map(Task::id).collect();
        let reply = self.client.request_calculation(&peer, &batch.tasks).await;

        let reason = match reply {
            Ok(CalculationReply::Accepted) => {
                tracing::info!(peer = %peer, tasks = ?ids, "Batch accepted");
                return;
            }
            Ok(CalculationReply::AlreadyInComputation) => "peer already computing".to_string(),
            Err(e) => e.to_string(),
        };

        let reclaimed = job.lock().await.reclaim(&batch);
        let clock = self.ctx.tick().await;
        tracing::info!(
            peer = %peer,
            tasks = ?ids,
            reclaimed,
            reason = %reason,
            clock = %clock,
            "Batch not accepted, reclaiming"
        );
    }

    /// Background loop for one job. Ends once every task is accounted for,
    /// results went where they belong and no peer has spare work left.
    async fn drive(
        self,
        job: SharedJob,
        requester: Option<WorkStation>,
        cancel: CancellationToken,
    ) -> JobOutcome {
        let job_id = job.lock().await.id;
        let loop_token = cancel.child_token();

        let health = tokio::spawn(self.clone().health_loop(job.clone(), loop_token.clone()));
        let heartbeat_token = loop_token.child_token();
        if let Some(requester) = requester.clone() {
            let sender = HeartbeatSender::new(self.ctx.settings.heartbeat_interval);
            let client = self.client.clone();
            let token = heartbeat_token.clone();
            tokio::spawn(async move { sender.run(client, requester, token).await });
        }

        let mut returned = Vec::new();
        let mut delivered = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.compute_local(&job, &cancel).await;

            let status = job.lock().await.status();
            if let Some(requester) = &requester {
                let pending = !job.lock().await.collected_results().is_empty();
                if status.ready_to_return_to_requester() && (!status.results_returned || pending) {
                    heartbeat_token.cancel();
                    let (results, ok) = self.return_results(&job, requester).await;
                    delivered |= ok;
                    returned.extend(results);
                }
            }

            let status = job.lock().await.status();
            if status.tasks_done && status.borrowed_done && self.steal(&job).await {
                self.compute_borrowed(&job, &cancel).await;
                continue;
            }

            if job.lock().await.status().fully_done() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.ctx.settings.health_check_interval) => {}
            }
        }

        loop_token.cancel();
        let _ = health.await;

        let outcome = if cancel.is_cancelled() {
            JobOutcome::Cancelled
        } else {
            match requester {
                Some(requester) => JobOutcome::Returned {
                    requester,
                    delivered,
                    results: returned,
                },
                None => JobOutcome::Completed {
                    results: job.lock().await.take_collected(),
                },
            }
        };

        self.store.write().await.release(job_id).await;
        let clock = self.ctx.tick().await;
        tracing::info!(job_id = %job_id, outcome = %outcome, clock = %clock, "Calculation has finished");
        outcome
    }

    /// Compute tasks from the local queue until it is empty or `cancel` fires.
    async fn compute_local(&self, job: &SharedJob, cancel: &CancellationToken) {
        let mut computed = 0usize;
        while !cancel.is_cancelled() {
            let Some(task) = job.lock().await.pop_next_task() else {
                break;
            };
            match self.render(task.clone()).await {
                Ok(result) => {
                    job.lock().await.record_result(result);
                    computed += 1;
                }
                Err(e) => {
                    tracing::error!(task = task.id(), error = %e, "Rendering failed");
                    job.lock().await.abandon_task(task);
                    break;
                }
            }
        }
        if computed > 0 {
            let clock = self.ctx.tick().await;
            tracing::info!(computed, clock = %clock, "Finished local task calculation");
        }
    }

    async fn render(&self, task: Task) -> Result<TaskResult> {
        let generator = self.generator.clone();
        Ok(tokio::task::spawn_blocking(move || generator.compute(&task)).await?)
    }

    async fn health_loop(self, job: SharedJob, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.ctx.settings.health_check_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.reclaim_timed_out(&job).await;
        }
    }

    /// Return the tasks of every batch whose worker went quiet to the local queue.
    pub async fn reclaim_timed_out(&self, job: &SharedJob) -> usize {
        let reclaimed: Vec<RemoteTaskBatch> = {
            let mut job = job.lock().await;
            let expired = job.timed_out_batches(self.ctx.settings.max_calculation_duration);
            expired.into_iter().filter(|batch| job.reclaim(batch)).collect()
        };
        if reclaimed.is_empty() {
            return 0;
        }
        let clock = self.ctx.tick().await;
        for batch in &reclaimed {
            tracing::warn!(
                peer = %batch.worker,
                tasks = batch.tasks.len(),
                clock = %clock,
                "Batch timed out, reclaiming"
            );
        }
        reclaimed.len()
    }

    async fn return_results(&self, job: &SharedJob, requester: &WorkStation) -> (Vec<TaskResult>, bool) {
        let results = job.lock().await.take_results_for_requester();
        let clock = self.ctx.tick().await;
        tracing::info!(
            requester = %requester,
            results = results.len(),
            clock = %clock,
            "Sending calculation results to requester"
        );
        match self.client.submit_requested_work(requester, &results).await {
            Ok(()) => (results, true),
            Err(e) => {
                tracing::warn!(requester = %requester, error = %e, "Unable to return results");
                (results, false)
            }
        }
    }

    /// Ask peers in membership order for spare work; adopt the first
    /// non-empty batch. Returns whether a batch was borrowed.
    async fn steal(&self, job: &SharedJob) -> bool {
        let peers = self.ctx.peers().await;
        if peers.is_empty() {
            return false;
        }
        let clock = self.ctx.tick().await;
        tracing::debug!(peers = peers.len(), clock = %clock, "Requesting work from other stations");

        for peer in peers {
            let tasks = match self.client.request_new_work(&peer).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    tracing::info!(peer = %peer, error = %e, "Unable to request work");
                    continue;
                }
            };
            if tasks.is_empty() {
                tracing::debug!(peer = %peer, "No tasks received");
                continue;
            }

            let count = tasks.len();
            let batch = RequestedTaskBatch::new(peer.clone(), tasks);
            if let Err(e) = job.lock().await.enqueue_borrowed(batch) {
                tracing::warn!(peer = %peer, error = %e, "Borrowed work dropped");
                return false;
            }
            let clock = self.ctx.tick().await;
            tracing::info!(lender = %peer, tasks = count, clock = %clock, "Borrowed work from peer");
            return true;
        }
        false
    }

    /// Compute the borrowed batch, then hand its results back to the lender.
    async fn compute_borrowed(&self, job: &SharedJob, cancel: &CancellationToken) {
        while !cancel.is_cancelled() {
            let Some(task) = job.lock().await.pop_borrowed_task() else {
                break;
            };
            match self.render(task).await {
                Ok(result) => {
                    if let Err(e) = job.lock().await.record_borrowed_result(result) {
                        tracing::warn!(error = %e, "Borrowed result dropped");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Rendering borrowed task failed"),
            }
        }

        let Some((lender, results)) = job.lock().await.drain_borrowed_results() else {
            return;
        };
        let clock = self.ctx.tick().await;
        tracing::info!(lender = %lender, results = results.len(), clock = %clock, "Returning borrowed work");
        if let Err(e) = self.client.submit_requested_work(&lender, &results).await {
            tracing::warn!(lender = %lender, error = %e, "Unable to return borrowed work");
        }
    }

    /// Receiving side of "compute this batch".
    pub async fn accept_calculation(
        &self,
        requester: WorkStation,
        tasks: Vec<Task>,
    ) -> Result<(CalculationReply, Option<JobHandle>)> {
        if self.store.read().await.present() {
            return Ok((CalculationReply::AlreadyInComputation, None));
        }
        match self.start(Job::new(tasks, Some(requester))).await {
            Ok(handle) => Ok((CalculationReply::Accepted, Some(handle))),
            Err(ClusterError::JobAlreadyActive) => Ok((CalculationReply::AlreadyInComputation, None)),
            Err(e) => Err(e),
        }
    }

    /// Receiving side of "give me work". Empty means nothing to give.
    pub async fn offer_work(&self, requester: &WorkStation) -> Vec<Task> {
        let job = match self.store.read().await.get() {
            Ok(job) => job,
            Err(_) => return Vec::new(),
        };
        let carved = job
            .lock()
            .await
            .carve_remote_batch(self.ctx.settings.batch_size, requester.clone());
        match carved {
            Ok(batch) => {
                tracing::info!(peer = %requester, tasks = batch.tasks.len(), "Lending work to peer");
                batch.tasks
            }
            Err(e) => {
                tracing::debug!(peer = %requester, error = %e, "Nothing to lend");
                Vec::new()
            }
        }
    }

    /// Receiving side of "here are your results".
    pub async fn accept_results(&self, worker: &WorkStation, results: Vec<TaskResult>) -> Result<()> {
        let job = self.store.read().await.get()?;
        let count = results.len();
        job.lock().await.accept_batch_results(results, worker)?;
        tracing::info!(peer = %worker, results = count, "Accepted batch results");
        Ok(())
    }

    /// Receiving side of a heartbeat. Returns how many batches were refreshed.
    pub async fn refresh(&self, worker: &WorkStation) -> usize {
        let job = match self.store.read().await.get() {
            Ok(job) => job,
            Err(_) => return 0,
        };
        let mut job = job.lock().await;
        job.refresh(worker)
    }
}
