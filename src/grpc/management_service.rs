use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::cluster::{NodeContext, WorkStation};
use crate::peer::PeerClient;
use crate::proto::work_station_management_server::WorkStationManagement;
use crate::proto::{self, Ack};

/// Membership changes announced by other workstations. Always acks, even
/// when the announcement changes nothing.
pub struct ManagementService {
    ctx: Arc<NodeContext>,
    client: Arc<PeerClient>,
}

impl ManagementService {
    pub fn new(ctx: Arc<NodeContext>, client: Arc<PeerClient>) -> Self {
        Self { ctx, client }
    }
}

#[tonic::async_trait]
impl WorkStationManagement for ManagementService {
    async fn join(&self, request: Request<proto::WorkStation>) -> Result<Response<Ack>, Status> {
        let ws = WorkStation::try_from(request.get_ref())?;
        let clock = self.ctx.tick().await;
        match self.ctx.add_peer(ws.clone()).await {
            Ok(_) => tracing::info!(peer = %ws, clock = %clock, "Workstation joined"),
            Err(e) => tracing::info!(peer = %ws, clock = %clock, error = %e, "Join ignored"),
        }
        Ok(Response::new(Ack {}))
    }

    async fn leave(&self, request: Request<proto::WorkStation>) -> Result<Response<Ack>, Status> {
        let ws = WorkStation::try_from(request.get_ref())?;
        let clock = self.ctx.tick().await;
        match self.ctx.remove_peer(&ws).await {
            Ok(()) => {
                self.client.forget(&ws).await;
                tracing::info!(peer = %ws, clock = %clock, "Workstation left");
            }
            Err(e) => tracing::info!(peer = %ws, clock = %clock, error = %e, "Leave ignored"),
        }
        Ok(Response::new(Ack {}))
    }
}
