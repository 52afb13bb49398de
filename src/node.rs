use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::admin::{run_admin, AdminState};
use crate::cluster::NodeContext;
use crate::config::NodeConfig;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::grpc::RpcServer;
use crate::job::JobStore;
use crate::peer::PeerClient;
use crate::render::{JuliaSetGenerator, PixelGenerator};

/// One workstation with every component wired together.
pub struct Node {
    pub config: NodeConfig,
    pub ctx: Arc<NodeContext>,
    pub store: Arc<RwLock<JobStore>>,
    pub client: Arc<PeerClient>,
    pub dispatcher: Dispatcher,
    pub server: Arc<Mutex<RpcServer>>,
    jobs_shutdown: CancellationToken,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Self> {
        Self::with_generator(config, Arc::new(JuliaSetGenerator::new()))
    }

    pub fn with_generator(config: NodeConfig, generator: Arc<dyn PixelGenerator>) -> Result<Self> {
        config.validate()?;
        let rpc_addr = config.rpc_addr()?;

        let ctx = Arc::new(NodeContext::from_config(&config));
        let store = Arc::new(RwLock::new(JobStore::new()));
        let client = Arc::new(PeerClient::new(ctx.clone()));
        let jobs_shutdown = CancellationToken::new();
        let dispatcher = Dispatcher::new(ctx.clone(), store.clone(), client.clone(), generator)
            .with_shutdown(jobs_shutdown.clone());
        let server = RpcServer::new(rpc_addr, ctx.clone(), dispatcher.clone(), client.clone());

        Ok(Self {
            config,
            ctx,
            store,
            client,
            dispatcher,
            server: Arc::new(Mutex::new(server)),
            jobs_shutdown,
        })
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState {
            ctx: self.ctx.clone(),
            dispatcher: self.dispatcher.clone(),
            client: self.client.clone(),
            server: self.server.clone(),
        }
    }

    /// Run the node until `shutdown` fires.
    ///
    /// Starts the gRPC server unless the config says to start stopped, serves
    /// the admin HTTP surface, then on shutdown cancels any running job loop
    /// and stops both servers.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let clock = self.ctx.snapshot().await;
        tracing::info!(
            identity = %self.ctx.identity,
            peers = self.config.other_workstations.len(),
            clock = %clock,
            "Starting workstation"
        );

        if self.config.start_running {
            self.server.lock().await.start().await?;
        }

        let admin = tokio::spawn(run_admin(
            self.config.http_addr()?,
            self.admin_state(),
            shutdown.clone(),
        ));

        shutdown.cancelled().await;
        self.jobs_shutdown.cancel();
        self.store.write().await.clear();

        {
            let mut server = self.server.lock().await;
            if server.is_running() {
                server.stop().await?;
            }
        }

        match admin.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Admin HTTP server failed"),
            Err(e) => tracing::error!(error = %e, "Admin HTTP server task failed"),
        }
        tracing::info!("Workstation stopped");
        Ok(())
    }
}
