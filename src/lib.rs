pub mod admin;
pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod grpc;
pub mod job;
pub mod node;
pub mod peer;
pub mod render;
pub mod shutdown;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("workstation");
}
