use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

use crate::cluster::{ClockSnapshot, NodeContext, WorkStation};
use crate::error::{ClusterError, Result};
use crate::job::task::tasks_from_proto;
use crate::job::{Task, TaskResult};
use crate::peer::backoff::retry_delay;
use crate::proto;
use crate::proto::julia_set_calculator_client::JuliaSetCalculatorClient;
use crate::proto::work_station_management_client::WorkStationManagementClient;

/// How a peer answered a "compute this batch" request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculationReply {
    Accepted,
    AlreadyInComputation,
}

/// Retrying client for every outbound RPC.
///
/// Each call fails fast with [`ClusterError::NodeNotRunning`] while this
/// workstation is killed. Otherwise it makes up to `max_request_repeat`
/// attempts, each preceded by the configured artificial message delay, and
/// gives up with [`ClusterError::PeerUnreachable`]. Only transport-level
/// failures are retried; a peer that answers with an application error is
/// reported immediately.
pub struct PeerClient {
    ctx: Arc<NodeContext>,
    channels: Mutex<HashMap<WorkStation, Channel>>,
}

impl PeerClient {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self {
            ctx,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Push a batch of tasks for `peer` to compute on our behalf.
    pub async fn request_calculation(
        &self,
        peer: &WorkStation,
        tasks: &[Task],
    ) -> Result<CalculationReply> {
        let clock = self.ctx.tick().await;
        let request = proto::BatchCalculationRequest {
            requester: Some(proto::WorkStation::from(&self.ctx.identity)),
            requests: tasks.iter().map(proto::CalculationRequest::from).collect(),
            vector_clock: clock.to_proto(),
        };
        tracing::debug!(peer = %peer, tasks = tasks.len(), clock = %clock, "Sending calculation request");

        let response = self
            .call(peer, "RequestCalculation", |channel| {
                let request = request.clone();
                async move {
                    JuliaSetCalculatorClient::new(channel)
                        .request_calculation(request)
                        .await
                }
            })
            .await?;
        self.ctx
            .observe(&ClockSnapshot::from_proto(&response.vector_clock))
            .await;

        match proto::CalculationStatus::try_from(response.status) {
            Ok(proto::CalculationStatus::Ok) => Ok(CalculationReply::Accepted),
            Ok(proto::CalculationStatus::AlreadyInComputation) => {
                Ok(CalculationReply::AlreadyInComputation)
            }
            _ => Err(ClusterError::InvalidMessage(format!(
                "unknown calculation status {}",
                response.status
            ))),
        }
    }

    /// Ask `peer` for spare work. An empty vector means it has nothing to give.
    pub async fn request_new_work(&self, peer: &WorkStation) -> Result<Vec<Task>> {
        let clock = self.ctx.tick().await;
        let request = proto::NewWorkRequest {
            station: Some(proto::WorkStation::from(&self.ctx.identity)),
            vector_clock: clock.to_proto(),
        };
        tracing::debug!(peer = %peer, clock = %clock, "Requesting new work");

        let response = self
            .call(peer, "RequestNewWork", |channel| {
                let request = request.clone();
                async move {
                    JuliaSetCalculatorClient::new(channel)
                        .request_new_work(request)
                        .await
                }
            })
            .await?;
        self.ctx
            .observe(&ClockSnapshot::from_proto(&response.vector_clock))
            .await;
        tasks_from_proto(&response.requests)
    }

    /// Deliver finished results to the workstation that handed out the work.
    pub async fn submit_requested_work(
        &self,
        peer: &WorkStation,
        results: &[TaskResult],
    ) -> Result<()> {
        let clock = self.ctx.tick().await;
        let request = proto::BatchCalculationResult {
            worker: Some(proto::WorkStation::from(&self.ctx.identity)),
            results: results.iter().map(proto::CalculationResult::from).collect(),
            vector_clock: clock.to_proto(),
        };
        tracing::debug!(peer = %peer, results = results.len(), clock = %clock, "Submitting results");

        self.call(peer, "SubmitRequestedWork", |channel| {
            let request = request.clone();
            async move {
                JuliaSetCalculatorClient::new(channel)
                    .submit_requested_work(request)
                    .await
            }
        })
        .await?;
        Ok(())
    }

    /// Tell `peer` we are still working on the batches it sent us.
    pub async fn heartbeat(&self, peer: &WorkStation) -> Result<()> {
        let clock = self.ctx.snapshot().await;
        let request = proto::HeartbeatRequest {
            worker: Some(proto::WorkStation::from(&self.ctx.identity)),
            vector_clock: clock.to_proto(),
        };
        self.call(peer, "Heartbeat", |channel| {
            let request = request.clone();
            async move { JuliaSetCalculatorClient::new(channel).heartbeat(request).await }
        })
        .await?;
        Ok(())
    }

    pub async fn join(&self, peer: &WorkStation) -> Result<()> {
        let me = proto::WorkStation::from(&self.ctx.identity);
        self.call(peer, "Join", |channel| {
            let me = me.clone();
            async move { WorkStationManagementClient::new(channel).join(me).await }
        })
        .await?;
        Ok(())
    }

    pub async fn leave(&self, peer: &WorkStation) -> Result<()> {
        let me = proto::WorkStation::from(&self.ctx.identity);
        self.call(peer, "Leave", |channel| {
            let me = me.clone();
            async move { WorkStationManagementClient::new(channel).leave(me).await }
        })
        .await?;
        Ok(())
    }

    /// Drop the cached channel for a peer that left.
    pub async fn forget(&self, peer: &WorkStation) {
        self.channels.lock().await.remove(peer);
    }

    async fn channel(&self, peer: &WorkStation) -> Result<Channel> {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(peer) {
            return Ok(channel.clone());
        }
        let settings = &self.ctx.settings;
        let channel = Endpoint::from_shared(peer.endpoint())?
            .connect_timeout(settings.rpc_timeout)
            .timeout(settings.rpc_timeout)
            .connect_lazy();
        channels.insert(peer.clone(), channel.clone());
        Ok(channel)
    }

    async fn call<T, F, Fut>(&self, peer: &WorkStation, rpc: &'static str, mut send: F) -> Result<T>
    where
        F: FnMut(Channel) -> Fut,
        Fut: Future<Output = std::result::Result<tonic::Response<T>, Status>>,
    {
        if !self.ctx.is_running() {
            return Err(ClusterError::NodeNotRunning);
        }
        let channel = self.channel(peer).await?;
        let settings = &self.ctx.settings;
        let attempts = settings.max_request_repeat;

        for attempt in 1..=attempts {
            let delay = self.ctx.message_delay().await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match timeout(settings.rpc_timeout, send(channel.clone())).await {
                Ok(Ok(response)) => return Ok(response.into_inner()),
                Ok(Err(status)) if !is_transient(&status) => {
                    return Err(ClusterError::Rpc(status));
                }
                Ok(Err(status)) => {
                    tracing::info!(
                        peer = %peer,
                        rpc,
                        attempt,
                        attempts,
                        error = %status,
                        "Unable to contact workstation"
                    );
                }
                Err(_) => {
                    tracing::info!(peer = %peer, rpc, attempt, attempts, "Request timed out");
                }
            }

            if attempt < attempts {
                tokio::time::sleep(retry_delay(settings.retry_backoff, attempt)).await;
            }
        }

        tracing::warn!(peer = %peer, rpc, attempts, "Workstation unreachable");
        Err(ClusterError::PeerUnreachable {
            peer: peer.clone(),
            attempts,
        })
    }
}

fn is_transient(status: &Status) -> bool {
    matches!(
        status.code(),
        Code::Unavailable
            | Code::DeadlineExceeded
            | Code::Unknown
            | Code::Cancelled
            | Code::ResourceExhausted
            | Code::Aborted
            | Code::Internal
    )
}
