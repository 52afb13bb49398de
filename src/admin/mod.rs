//! HTTP administrative surface: submit jobs, join or leave the cluster,
//! kill and revive the RPC server, inject message delay and inspect state.

pub mod dto;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::cluster::NodeContext;
use crate::dispatch::{Dispatcher, JobHandle, JobOutcome};
use crate::error::{ClusterError, Result};
use crate::grpc::RpcServer;
use crate::job::{Job, JobSummary};
use crate::peer::PeerClient;
use crate::render::GifWriter;

pub use dto::{DelayDto, GenerateImageDto, RemoteWorkStationDto, ValidationError};

#[derive(Clone)]
pub struct AdminState {
    pub ctx: Arc<NodeContext>,
    pub dispatcher: Dispatcher,
    pub client: Arc<PeerClient>,
    pub server: Arc<Mutex<RpcServer>>,
}

#[derive(Debug)]
pub enum AdminError {
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AdminError::BadRequest(e) => (StatusCode::BAD_REQUEST, e),
            AdminError::Conflict(e) => (StatusCode::CONFLICT, e),
            AdminError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<JsonRejection> for AdminError {
    fn from(rejection: JsonRejection) -> Self {
        AdminError::BadRequest(format!("Invalid json: {}", rejection.body_text()))
    }
}

impl From<ValidationError> for AdminError {
    fn from(e: ValidationError) -> Self {
        AdminError::BadRequest(format!("Json contains invalid data: {}", e))
    }
}

impl From<ClusterError> for AdminError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::JobAlreadyActive | ClusterError::AlreadyInComputation => {
                AdminError::Conflict("Workstation is already computing, wait until it is done".into())
            }
            ClusterError::ServerAlreadyRunning => {
                AdminError::Conflict("Workstation is already running".into())
            }
            ClusterError::ServerNotRunning => {
                AdminError::Conflict("Workstation is already stopped".into())
            }
            other => AdminError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    identity: String,
    running: bool,
    peers: Vec<String>,
    clock: String,
    message_delay_ms: u64,
    job: Option<JobSummary>,
}

pub fn router(state: AdminState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/new-job", post(new_job_handler))
        .route("/join", post(join_handler))
        .route("/leave", post(leave_handler))
        .route("/kill", post(kill_handler))
        .route("/revive", post(revive_handler))
        .route("/delay", post(delay_handler))
        .route("/status", get(status_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_admin(addr: SocketAddr, state: AdminState, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Starting admin HTTP server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn new_job_handler(
    State(state): State<AdminState>,
    payload: std::result::Result<Json<GenerateImageDto>, JsonRejection>,
) -> std::result::Result<StatusCode, AdminError> {
    let Json(request) = payload?;
    let clock = state.ctx.tick().await;
    tracing::info!(clock = %clock, "Received new job");
    request.validate()?;

    let handle = state.dispatcher.start(Job::local(request.to_tasks())).await?;
    tokio::spawn(write_animation(handle, GifWriter::new(request.gif_settings())));
    Ok(StatusCode::NO_CONTENT)
}

/// Wait for a local job to finish and write its frames to disk.
async fn write_animation(handle: JobHandle, writer: GifWriter) {
    let job_id = handle.job_id;
    let results = match handle.wait().await {
        Ok(JobOutcome::Completed { results }) => results,
        Ok(outcome) => {
            tracing::info!(job_id = %job_id, outcome = %outcome, "No animation to write");
            return;
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Job loop failed");
            return;
        }
    };

    tracing::info!(job_id = %job_id, frames = results.len(), "Starting gif writing");
    match tokio::task::spawn_blocking(move || writer.write_file(results)).await {
        Ok(Ok(())) => tracing::info!(job_id = %job_id, "Done writing of gif"),
        Ok(Err(e)) => tracing::error!(job_id = %job_id, error = %e, "Failed to write gif"),
        Err(e) => tracing::error!(job_id = %job_id, error = %e, "Gif writer panicked"),
    }
}

async fn join_handler(
    State(state): State<AdminState>,
    payload: std::result::Result<Json<Vec<RemoteWorkStationDto>>, JsonRejection>,
) -> std::result::Result<StatusCode, AdminError> {
    let Json(stations) = payload?;
    for station in &stations {
        station.validate()?;
    }

    let clock = state.ctx.tick().await;
    tracing::info!(stations = stations.len(), clock = %clock, "Joining topology");
    {
        let mut server = state.server.lock().await;
        if server.is_running() {
            return Err(ClusterError::ServerAlreadyRunning.into());
        }
        server.start().await?;
    }

    for station in stations {
        let ws = station.to_workstation();
        match state.ctx.add_peer(ws.clone()).await {
            Ok(peer) => match state.client.join(&peer).await {
                Ok(()) => tracing::info!(peer = %peer, "Registered in workstation"),
                Err(e) => tracing::warn!(peer = %peer, error = %e, "Join not delivered"),
            },
            Err(e) => tracing::info!(peer = %ws, error = %e, "Workstation already known"),
        }
    }

    let clock = state.ctx.tick().await;
    tracing::info!(clock = %clock, "Joined the workstations and turned on");
    Ok(StatusCode::NO_CONTENT)
}

/// Announces departure without holding the server lock, so `/kill` and
/// `/revive` are not held up by slow peers.
async fn leave_handler(State(state): State<AdminState>) -> std::result::Result<StatusCode, AdminError> {
    if !state.server.lock().await.is_running() {
        return Err(ClusterError::ServerNotRunning.into());
    }

    let clock = state.ctx.tick().await;
    let peers = state.ctx.clear_peers().await;
    tracing::info!(peers = peers.len(), clock = %clock, "Leaving topology");
    for peer in peers {
        match state.client.leave(&peer).await {
            Ok(()) => tracing::info!(peer = %peer, "Left workstation"),
            Err(e) => tracing::warn!(peer = %peer, error = %e, "Leave not delivered"),
        }
        state.client.forget(&peer).await;
    }

    {
        let mut server = state.server.lock().await;
        if server.is_running() {
            server.stop().await?;
        }
    }
    let clock = state.ctx.tick().await;
    tracing::info!(clock = %clock, "Left the topology");
    Ok(StatusCode::NO_CONTENT)
}

async fn kill_handler(State(state): State<AdminState>) -> std::result::Result<StatusCode, AdminError> {
    let mut server = state.server.lock().await;
    server.stop().await?;
    let clock = state.ctx.tick().await;
    tracing::info!(clock = %clock, "Workstation killed");
    Ok(StatusCode::NO_CONTENT)
}

async fn revive_handler(State(state): State<AdminState>) -> std::result::Result<StatusCode, AdminError> {
    let mut server = state.server.lock().await;
    server.start().await?;
    let clock = state.ctx.tick().await;
    tracing::info!(clock = %clock, "Workstation is running now");
    Ok(StatusCode::NO_CONTENT)
}

async fn delay_handler(
    State(state): State<AdminState>,
    payload: std::result::Result<Json<DelayDto>, JsonRejection>,
) -> std::result::Result<StatusCode, AdminError> {
    let Json(request) = payload?;
    let delay = Duration::from_millis(request.delay_ms);
    state.ctx.set_message_delay(delay).await;
    let clock = state.ctx.tick().await;
    tracing::info!(delay_ms = request.delay_ms, clock = %clock, "Message delay set");
    Ok(StatusCode::NO_CONTENT)
}

async fn status_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let job = state.dispatcher.store().read().await.get().ok();
    let job = match job {
        Some(job) => Some(job.lock().await.summary()),
        None => None,
    };

    Json(StatusResponse {
        identity: state.ctx.identity.to_string(),
        running: state.ctx.is_running(),
        peers: state.ctx.peers().await.iter().map(ToString::to_string).collect(),
        clock: state.ctx.snapshot().await.to_string(),
        message_delay_ms: state.ctx.message_delay().await.as_millis() as u64,
        job,
    })
}
