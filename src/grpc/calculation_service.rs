use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::cluster::{ClockSnapshot, NodeContext, WorkStation};
use crate::dispatch::Dispatcher;
use crate::job::task::{results_from_proto, tasks_from_proto};
use crate::peer::CalculationReply;
use crate::proto::julia_set_calculator_server::JuliaSetCalculator;
use crate::proto::{
    Ack, BatchCalculationRequest, BatchCalculationResult, CalculationStatus, HeartbeatRequest,
    NewWorkRequest, RequestCalculationResponse,
};

/// Peer-facing side of the work distribution protocol.
pub struct CalculationService {
    ctx: Arc<NodeContext>,
    dispatcher: Dispatcher,
}

impl CalculationService {
    pub fn new(ctx: Arc<NodeContext>, dispatcher: Dispatcher) -> Self {
        Self { ctx, dispatcher }
    }
}

#[tonic::async_trait]
impl JuliaSetCalculator for CalculationService {
    async fn request_calculation(
        &self,
        request: Request<BatchCalculationRequest>,
    ) -> Result<Response<RequestCalculationResponse>, Status> {
        let req = request.into_inner();
        let requester = WorkStation::from_proto(req.requester.as_ref())?;
        let tasks = tasks_from_proto(&req.requests)?;
        let clock = self
            .ctx
            .observe(&ClockSnapshot::from_proto(&req.vector_clock))
            .await;
        tracing::info!(
            requester = %requester,
            tasks = tasks.len(),
            clock = %clock,
            "Received calculation request"
        );

        let (reply, handle) = self.dispatcher.accept_calculation(requester, tasks).await?;
        if let Some(handle) = handle {
            tokio::spawn(async move {
                if let Err(e) = handle.wait().await {
                    tracing::error!(error = %e, "Job loop failed");
                }
            });
        }

        let status = match reply {
            CalculationReply::Accepted => CalculationStatus::Ok,
            CalculationReply::AlreadyInComputation => {
                tracing::info!("Already computing, request refused");
                CalculationStatus::AlreadyInComputation
            }
        };
        Ok(Response::new(RequestCalculationResponse {
            status: status as i32,
            vector_clock: self.ctx.snapshot().await.to_proto(),
        }))
    }

    async fn request_new_work(
        &self,
        request: Request<NewWorkRequest>,
    ) -> Result<Response<BatchCalculationRequest>, Status> {
        let req = request.into_inner();
        let station = WorkStation::from_proto(req.station.as_ref())?;
        let clock = self
            .ctx
            .observe(&ClockSnapshot::from_proto(&req.vector_clock))
            .await;
        tracing::debug!(peer = %station, clock = %clock, "Received request for new work");

        let peer = self.ctx.find_peer(&station).await?;
        let tasks = self.dispatcher.offer_work(&peer).await;
        Ok(Response::new(BatchCalculationRequest {
            requester: Some((&self.ctx.identity).into()),
            requests: tasks.iter().map(Into::into).collect(),
            vector_clock: self.ctx.tick().await.to_proto(),
        }))
    }

    async fn submit_requested_work(
        &self,
        request: Request<BatchCalculationResult>,
    ) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let worker = WorkStation::from_proto(req.worker.as_ref())?;
        let results = results_from_proto(&req.results)?;
        let clock = self
            .ctx
            .observe(&ClockSnapshot::from_proto(&req.vector_clock))
            .await;
        tracing::info!(
            peer = %worker,
            results = results.len(),
            clock = %clock,
            "Received calculation results"
        );

        let accepted = match self.ctx.find_peer(&worker).await {
            Ok(peer) => self.dispatcher.accept_results(&peer, results).await,
            Err(e) => Err(e),
        };
        if let Err(e) = accepted {
            tracing::warn!(peer = %worker, error = %e, "Ignoring calculation results");
        }
        Ok(Response::new(Ack {}))
    }

    async fn heartbeat(&self, request: Request<HeartbeatRequest>) -> Result<Response<Ack>, Status> {
        let req = request.into_inner();
        let worker = WorkStation::from_proto(req.worker.as_ref())?;
        self.ctx
            .observe(&ClockSnapshot::from_proto(&req.vector_clock))
            .await;
        match self.ctx.find_peer(&worker).await {
            Ok(peer) => {
                let refreshed = self.dispatcher.refresh(&peer).await;
                tracing::trace!(peer = %peer, refreshed, "Received heartbeat");
            }
            Err(e) => tracing::warn!(peer = %worker, error = %e, "Ignoring heartbeat"),
        }
        Ok(Response::new(Ack {}))
    }
}
