use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cluster::WorkStation;
use crate::peer::PeerClient;

/// Periodically tells a requester that the batch it pushed to us is still
/// being worked on, so its health check does not reclaim the batch.
pub struct HeartbeatSender {
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Send heartbeats to `requester` until `cancel` fires.
    pub async fn run(&self, client: Arc<PeerClient>, requester: WorkStation, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = client.heartbeat(&requester).await {
                tracing::debug!(peer = %requester, error = %e, "Heartbeat not delivered");
            }
        }
    }
}
