use thiserror::Error;

use crate::cluster::WorkStation;
use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Workstation is already computing a job")]
    AlreadyInComputation,

    #[error("A job is already active on this workstation")]
    JobAlreadyActive,

    #[error("No active job")]
    NoActiveJob,

    #[error("Peer {peer} unreachable after {attempts} attempts")]
    PeerUnreachable { peer: WorkStation, attempts: u32 },

    #[error("Workstation is not running")]
    NodeNotRunning,

    #[error("Unknown batch result from {peer}")]
    UnknownBatchResult { peer: WorkStation },

    #[error("Unknown peer {0}")]
    UnknownPeer(WorkStation),

    #[error("Workstation {0} is already registered")]
    AlreadyRegistered(WorkStation),

    #[error("Workstation {0} is not registered")]
    NotRegistered(WorkStation),

    #[error("Not enough tasks: requested {requested}, available {available}")]
    InsufficientTasks { requested: usize, available: usize },

    #[error("Borrowed batch slot is already full")]
    BorrowSlotFull,

    #[error("RPC server is already running")]
    ServerAlreadyRunning,

    #[error("RPC server is not running")]
    ServerNotRunning,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("gRPC error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

impl From<ClusterError> for tonic::Status {
    fn from(err: ClusterError) -> Self {
        let message = err.to_string();
        match err {
            ClusterError::UnknownPeer(_) | ClusterError::NoActiveJob => {
                tonic::Status::not_found(message)
            }
            ClusterError::InvalidMessage(_) => tonic::Status::invalid_argument(message),
            ClusterError::AlreadyInComputation
            | ClusterError::JobAlreadyActive
            | ClusterError::UnknownBatchResult { .. }
            | ClusterError::AlreadyRegistered(_)
            | ClusterError::NotRegistered(_)
            | ClusterError::InsufficientTasks { .. }
            | ClusterError::BorrowSlotFull => tonic::Status::failed_precondition(message),
            ClusterError::NodeNotRunning
            | ClusterError::ServerNotRunning
            | ClusterError::PeerUnreachable { .. } => tonic::Status::unavailable(message),
            ClusterError::Rpc(status) => status,
            _ => tonic::Status::internal(message),
        }
    }
}
