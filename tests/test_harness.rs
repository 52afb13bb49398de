//! Test harness for multi-workstation integration tests.
//!
//! Provides short-timeout configs, tiny render tasks, real nodes on fixed
//! localhost ports and a scriptable stub peer.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use fractal_mesh::cluster::WorkStation;
use fractal_mesh::config::NodeConfig;
use fractal_mesh::job::{Complex, FractalParameters, ImageProperties, Task};
use fractal_mesh::node::Node;
use fractal_mesh::proto;
use fractal_mesh::proto::julia_set_calculator_server::{JuliaSetCalculator, JuliaSetCalculatorServer};
use fractal_mesh::proto::work_station_management_server::{
    WorkStationManagement, WorkStationManagementServer,
};

pub fn ws(port: u16) -> WorkStation {
    WorkStation::new("127.0.0.1", port)
}

/// Workstation config with shorter timeouts for faster tests
pub fn test_config(port: u16, peers: &[u16]) -> NodeConfig {
    let mut config = NodeConfig::new("127.0.0.1", port);
    for peer in peers {
        config = config.with_peer("127.0.0.1", *peer);
    }
    config.http_port = port + 1000;
    config.batch_size = 4;
    config.max_calculation_duration_ms = 300;
    config.max_request_repeat = 2;
    config.health_check_interval_ms = 50;
    config.heartbeat_interval_ms = 50;
    config.retry_backoff_ms = 10;
    config.rpc_timeout_ms = 500;
    config
}

/// `n` small frames with ids `0..n`.
pub fn tiny_tasks(n: u32) -> Vec<Task> {
    (0..n)
        .map(|id| Task {
            image: ImageProperties {
                id,
                width: 4,
                height: 3,
            },
            fractal: FractalParameters {
                offset: Complex::new(-0.8, 0.156),
                bottom_left: Complex::new(-1.5, -1.0),
                top_right: Complex::new(1.5, 1.0),
                escape_radius: 2.0,
                max_iterations: 20,
            },
        })
        .collect()
}

/// Build a node and start its gRPC server.
pub async fn start_node(config: NodeConfig) -> Node {
    let node = Node::new(config).expect("valid config");
    node.server
        .lock()
        .await
        .start()
        .await
        .expect("gRPC server should start");
    node
}

/// Scriptable peer. Accepts every batch and never answers with results,
/// lends whatever is queued in `lend` and records everything it receives.
/// The next `failing_heartbeats` heartbeats are answered with `Unavailable`.
#[derive(Clone, Default)]
pub struct StubPeer {
    pub busy: Arc<AtomicBool>,
    pub reject_new_work: Arc<AtomicBool>,
    pub calculation_requests: Arc<Mutex<Vec<proto::BatchCalculationRequest>>>,
    pub new_work_requests: Arc<AtomicUsize>,
    pub submitted: Arc<Mutex<Vec<proto::BatchCalculationResult>>>,
    pub heartbeats: Arc<AtomicUsize>,
    pub failing_heartbeats: Arc<AtomicUsize>,
    pub joined: Arc<Mutex<Vec<proto::WorkStation>>>,
    pub left: Arc<Mutex<Vec<proto::WorkStation>>>,
    pub lend: Arc<Mutex<Vec<Task>>>,
}

impl StubPeer {
    pub async fn requested_ids(&self) -> Vec<Vec<u32>> {
        self.calculation_requests
            .lock()
            .await
            .iter()
            .map(|req| {
                req.requests
                    .iter()
                    .filter_map(|r| r.image_properties.as_ref().map(|i| i.id))
                    .collect()
            })
            .collect()
    }
}

#[tonic::async_trait]
impl JuliaSetCalculator for StubPeer {
    async fn request_calculation(
        &self,
        request: Request<proto::BatchCalculationRequest>,
    ) -> Result<Response<proto::RequestCalculationResponse>, Status> {
        self.calculation_requests
            .lock()
            .await
            .push(request.into_inner());
        let status = if self.busy.load(Ordering::SeqCst) {
            proto::CalculationStatus::AlreadyInComputation
        } else {
            proto::CalculationStatus::Ok
        };
        Ok(Response::new(proto::RequestCalculationResponse {
            status: status as i32,
            vector_clock: Vec::new(),
        }))
    }

    async fn request_new_work(
        &self,
        _request: Request<proto::NewWorkRequest>,
    ) -> Result<Response<proto::BatchCalculationRequest>, Status> {
        self.new_work_requests.fetch_add(1, Ordering::SeqCst);
        if self.reject_new_work.load(Ordering::SeqCst) {
            return Err(Status::failed_precondition("not lending"));
        }
        let tasks: Vec<Task> = std::mem::take(&mut *self.lend.lock().await);
        Ok(Response::new(proto::BatchCalculationRequest {
            requester: None,
            requests: tasks.iter().map(Into::into).collect(),
            vector_clock: Vec::new(),
        }))
    }

    async fn submit_requested_work(
        &self,
        request: Request<proto::BatchCalculationResult>,
    ) -> Result<Response<proto::Ack>, Status> {
        self.submitted.lock().await.push(request.into_inner());
        Ok(Response::new(proto::Ack {}))
    }

    async fn heartbeat(
        &self,
        _request: Request<proto::HeartbeatRequest>,
    ) -> Result<Response<proto::Ack>, Status> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_heartbeats
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(Status::unavailable("still starting"));
        }
        Ok(Response::new(proto::Ack {}))
    }
}

#[tonic::async_trait]
impl WorkStationManagement for StubPeer {
    async fn join(
        &self,
        request: Request<proto::WorkStation>,
    ) -> Result<Response<proto::Ack>, Status> {
        self.joined.lock().await.push(request.into_inner());
        Ok(Response::new(proto::Ack {}))
    }

    async fn leave(
        &self,
        request: Request<proto::WorkStation>,
    ) -> Result<Response<proto::Ack>, Status> {
        self.left.lock().await.push(request.into_inner());
        Ok(Response::new(proto::Ack {}))
    }
}

/// Serve `stub` on `port`. The listener is bound before this returns.
pub async fn serve_stub(port: u16, stub: StubPeer) -> JoinHandle<()> {
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let listener = TcpListener::bind(addr).await.expect("stub port free");
    tokio::spawn(async move {
        let _ = Server::builder()
            .add_service(JuliaSetCalculatorServer::new(stub.clone()))
            .add_service(WorkStationManagementServer::new(stub))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await;
    })
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout_duration: Duration, poll_interval: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(25)).await;
    assert!(result, "{}", message);
}
