use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::cluster::NodeContext;
use crate::dispatch::Dispatcher;
use crate::error::{ClusterError, Result};
use crate::grpc::{CalculationService, ManagementService};
use crate::peer::PeerClient;
use crate::proto::julia_set_calculator_server::JuliaSetCalculatorServer;
use crate::proto::work_station_management_server::WorkStationManagementServer;

const STOP_GRACE: Duration = Duration::from_secs(5);

struct Serving {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    join: JoinHandle<std::result::Result<(), tonic::transport::Error>>,
}

/// The RPC-accepting surface of a workstation.
///
/// Owned by the node and handed to the admin handlers behind a mutex;
/// `start` and `stop` flip the node's running flag with it.
pub struct RpcServer {
    addr: SocketAddr,
    ctx: Arc<NodeContext>,
    dispatcher: Dispatcher,
    client: Arc<PeerClient>,
    serving: Option<Serving>,
}

impl RpcServer {
    pub fn new(
        addr: SocketAddr,
        ctx: Arc<NodeContext>,
        dispatcher: Dispatcher,
        client: Arc<PeerClient>,
    ) -> Self {
        Self {
            addr,
            ctx,
            dispatcher,
            client,
            serving: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.serving.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.serving.as_ref().map(|s| s.local_addr)
    }

    /// Bind the listener and start serving. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.serving.is_some() {
            return Err(ClusterError::ServerAlreadyRunning);
        }

        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let calculation = CalculationService::new(self.ctx.clone(), self.dispatcher.clone());
        let management = ManagementService::new(self.ctx.clone(), self.client.clone());
        let signal = shutdown.clone();
        let join = tokio::spawn(async move {
            Server::builder()
                .add_service(JuliaSetCalculatorServer::new(calculation))
                .add_service(WorkStationManagementServer::new(management))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    signal.cancelled().await
                })
                .await
        });

        self.serving = Some(Serving {
            local_addr,
            shutdown,
            join,
        });
        self.ctx.set_running(true);
        tracing::info!(addr = %local_addr, "Starting gRPC server");
        Ok(local_addr)
    }

    /// Stop accepting RPCs and wait for the server task to wind down.
    pub async fn stop(&mut self) -> Result<()> {
        let serving = self.serving.take().ok_or(ClusterError::ServerNotRunning)?;
        self.ctx.set_running(false);
        serving.shutdown.cancel();

        let mut join = serving.join;
        match tokio::time::timeout(STOP_GRACE, &mut join).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "gRPC server exited with error"),
            Ok(Err(e)) => tracing::warn!(error = %e, "gRPC server task failed"),
            Err(_) => {
                tracing::warn!("gRPC server did not stop in time, aborting");
                join.abort();
            }
        }
        tracing::info!(addr = %serving.local_addr, "gRPC server stopped");
        Ok(())
    }
}
