//! RPC handlers called directly, without a transport.

mod test_harness;

use std::time::Duration;

use tonic::{Code, Request};

use fractal_mesh::grpc::{CalculationService, ManagementService};
use fractal_mesh::job::{Job, TaskResult};
use fractal_mesh::node::Node;
use fractal_mesh::proto;
use fractal_mesh::proto::julia_set_calculator_server::JuliaSetCalculator;
use fractal_mesh::proto::work_station_management_server::WorkStationManagement;
use fractal_mesh::render::{JuliaSetGenerator, PixelGenerator};
use test_harness::{test_config, tiny_tasks, ws};

fn node(port: u16, peers: &[u16]) -> (Node, CalculationService) {
    let node = Node::new(test_config(port, peers)).unwrap();
    let service = CalculationService::new(node.ctx.clone(), node.dispatcher.clone());
    (node, service)
}

fn station(port: u16) -> Option<proto::WorkStation> {
    Some((&ws(port)).into())
}

fn batch_request(requester: Option<proto::WorkStation>, tasks: u32) -> proto::BatchCalculationRequest {
    proto::BatchCalculationRequest {
        requester,
        requests: tiny_tasks(tasks).iter().map(Into::into).collect(),
        vector_clock: Vec::new(),
    }
}

fn compute_all(tasks: &[fractal_mesh::job::Task]) -> Vec<TaskResult> {
    let generator = JuliaSetGenerator::new();
    tasks.iter().map(|task| generator.compute(task)).collect()
}

#[tokio::test]
async fn test_busy_workstation_refuses_calculation() {
    let (node, service) = node(19500, &[19501]);
    let existing = Job::local(tiny_tasks(2));
    let existing_id = existing.id;
    node.store.write().await.put(existing.into_shared()).unwrap();

    let response = service
        .request_calculation(Request::new(batch_request(station(19501), 3)))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(
        response.status,
        proto::CalculationStatus::AlreadyInComputation as i32
    );
    let job = node.store.read().await.get().unwrap();
    assert_eq!(job.lock().await.id, existing_id, "held job untouched");
}

#[tokio::test]
async fn test_idle_workstation_accepts_calculation() {
    let (node, service) = node(19502, &[]);
    // Keeps the job from finishing before it is inspected
    node.ctx.set_message_delay(Duration::from_secs(2)).await;

    let response = service
        .request_calculation(Request::new(batch_request(station(19503), 3)))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status, proto::CalculationStatus::Ok as i32);
    assert!(!response.vector_clock.is_empty());
    let job = node.store.read().await.get().unwrap();
    let job = job.lock().await;
    assert_eq!(job.work_requester(), Some(&ws(19503)));
}

#[tokio::test]
async fn test_missing_requester_is_invalid() {
    let (node, service) = node(19504, &[]);

    let status = service
        .request_calculation(Request::new(batch_request(None, 1)))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(!node.store.read().await.present());
}

#[tokio::test]
async fn test_new_work_from_unknown_peer_is_not_found() {
    let (node, service) = node(19505, &[19506]);
    node.store
        .write()
        .await
        .put(Job::local(tiny_tasks(8)).into_shared())
        .unwrap();

    let status = service
        .request_new_work(Request::new(proto::NewWorkRequest {
            station: station(19507),
            vector_clock: Vec::new(),
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    let job = node.store.read().await.get().unwrap();
    assert_eq!(job.lock().await.remaining_tasks(), 8);
}

#[tokio::test]
async fn test_new_work_lends_one_full_batch() {
    let (node, service) = node(19508, &[19509]);

    let idle = service
        .request_new_work(Request::new(proto::NewWorkRequest {
            station: station(19509),
            vector_clock: Vec::new(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(idle.requests.is_empty(), "nothing to lend without a job");

    node.store
        .write()
        .await
        .put(Job::local(tiny_tasks(5)).into_shared())
        .unwrap();

    let lent = service
        .request_new_work(Request::new(proto::NewWorkRequest {
            station: station(19509),
            vector_clock: Vec::new(),
        }))
        .await
        .unwrap()
        .into_inner();
    let ids: Vec<u32> = lent
        .requests
        .iter()
        .filter_map(|r| r.image_properties.as_ref().map(|i| i.id))
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(lent.requester, station(19508));

    let empty = service
        .request_new_work(Request::new(proto::NewWorkRequest {
            station: station(19509),
            vector_clock: Vec::new(),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(empty.requests.is_empty(), "one task left is less than a batch");

    let job = node.store.read().await.get().unwrap();
    let job = job.lock().await;
    assert_eq!(job.remaining_tasks(), 1);
    assert_eq!(job.outstanding_batches().len(), 1);
    assert_eq!(job.outstanding_batches()[0].worker, ws(19509));
}

#[tokio::test]
async fn test_submitted_results_are_credited_once() {
    let (node, service) = node(19510, &[19511]);
    let shared = Job::local(tiny_tasks(6)).into_shared();
    node.store.write().await.put(shared.clone()).unwrap();
    let batch = shared.lock().await.carve_remote_batch(4, ws(19511)).unwrap();
    let results: Vec<proto::CalculationResult> =
        compute_all(&batch.tasks).iter().map(Into::into).collect();

    for _ in 0..2 {
        service
            .submit_requested_work(Request::new(proto::BatchCalculationResult {
                worker: station(19511),
                results: results.clone(),
                vector_clock: Vec::new(),
            }))
            .await
            .expect("duplicates are acknowledged");
    }

    let job = shared.lock().await;
    assert_eq!(job.collected_results().len(), 4);
    assert!(job.outstanding_batches().is_empty());
}

#[tokio::test]
async fn test_results_from_unknown_worker_are_ignored() {
    let (node, service) = node(19512, &[19513]);
    let shared = Job::local(tiny_tasks(4)).into_shared();
    node.store.write().await.put(shared.clone()).unwrap();
    let batch = shared.lock().await.carve_remote_batch(2, ws(19513)).unwrap();
    let results: Vec<proto::CalculationResult> =
        compute_all(&batch.tasks).iter().map(Into::into).collect();

    service
        .submit_requested_work(Request::new(proto::BatchCalculationResult {
            worker: station(19514),
            results,
            vector_clock: Vec::new(),
        }))
        .await
        .unwrap();

    let job = shared.lock().await;
    assert!(job.collected_results().is_empty());
    assert_eq!(job.outstanding_batches().len(), 1);
}

#[tokio::test]
async fn test_heartbeat_keeps_batch_alive() {
    let (node, service) = node(19515, &[19516, 19517]);
    let shared = Job::local(tiny_tasks(4)).into_shared();
    node.store.write().await.put(shared.clone()).unwrap();
    {
        let mut job = shared.lock().await;
        job.carve_remote_batch(2, ws(19516)).unwrap();
        job.carve_remote_batch(2, ws(19517)).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(350)).await;
    service
        .heartbeat(Request::new(proto::HeartbeatRequest {
            worker: station(19516),
            vector_clock: Vec::new(),
        }))
        .await
        .unwrap();

    assert_eq!(node.dispatcher.reclaim_timed_out(&shared).await, 1);
    let job = shared.lock().await;
    assert_eq!(job.outstanding_batches().len(), 1);
    assert_eq!(job.outstanding_batches()[0].worker, ws(19516));
    assert_eq!(job.remaining_tasks(), 2);
}

#[tokio::test]
async fn test_heartbeat_from_unknown_peer_is_ignored() {
    let (node, service) = node(19524, &[19525]);
    let shared = Job::local(tiny_tasks(4)).into_shared();
    node.store.write().await.put(shared.clone()).unwrap();
    shared.lock().await.carve_remote_batch(2, ws(19526)).unwrap();

    tokio::time::sleep(Duration::from_millis(350)).await;
    service
        .heartbeat(Request::new(proto::HeartbeatRequest {
            worker: station(19526),
            vector_clock: Vec::new(),
        }))
        .await
        .expect("heartbeats are always acknowledged");

    assert_eq!(node.dispatcher.reclaim_timed_out(&shared).await, 1);
    assert_eq!(shared.lock().await.remaining_tasks(), 4);
}

#[tokio::test]
async fn test_received_clock_is_merged() {
    let (node, service) = node(19518, &[19519]);
    let me = node.ctx.identity.clone();
    let before = node.ctx.snapshot().await.get(&me).unwrap();

    service
        .request_new_work(Request::new(proto::NewWorkRequest {
            station: station(19519),
            vector_clock: vec![
                proto::ClockEntry {
                    station: station(19519),
                    timestamp: 7,
                },
                proto::ClockEntry {
                    station: station(19520),
                    timestamp: 3,
                },
            ],
        }))
        .await
        .unwrap();

    let snapshot = node.ctx.snapshot().await;
    assert_eq!(snapshot.get(&ws(19519)), Some(7));
    assert_eq!(snapshot.get(&ws(19520)), None);
    assert!(snapshot.get(&me).unwrap() > before);
}

#[tokio::test]
async fn test_join_and_leave_announcements() {
    let node = Node::new(test_config(19521, &[])).unwrap();
    let service = ManagementService::new(node.ctx.clone(), node.client.clone());

    for _ in 0..2 {
        service
            .join(Request::new(proto::WorkStation::from(&ws(19522))))
            .await
            .unwrap();
    }
    assert_eq!(node.ctx.peers().await, vec![ws(19522)]);
    assert_eq!(node.ctx.snapshot().await.get(&ws(19522)), Some(0));

    service
        .leave(Request::new(proto::WorkStation::from(&ws(19523))))
        .await
        .expect("leaving an unknown peer is acknowledged");
    service
        .leave(Request::new(proto::WorkStation::from(&ws(19522))))
        .await
        .unwrap();
    assert!(node.ctx.peers().await.is_empty());

    let status = service
        .join(Request::new(proto::WorkStation {
            ip: String::new(),
            port: 1,
        }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}
