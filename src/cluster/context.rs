use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};

use crate::cluster::{ClockSnapshot, ClusterMembership, VectorClock, WorkStation};
use crate::config::NodeConfig;
use crate::error::Result;

/// Tunables every component reads but never changes at runtime.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub batch_size: usize,
    pub max_calculation_duration: Duration,
    pub max_request_repeat: u32,
    pub health_check_interval: Duration,
    pub heartbeat_interval: Duration,
    pub retry_backoff: Duration,
    pub rpc_timeout: Duration,
}

impl From<&NodeConfig> for NodeSettings {
    fn from(config: &NodeConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_calculation_duration: config.max_calculation_duration(),
            max_request_repeat: config.max_request_repeat,
            health_check_interval: Duration::from_millis(config.health_check_interval_ms),
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            rpc_timeout: Duration::from_millis(config.rpc_timeout_ms),
        }
    }
}

/// State shared by every component of one workstation: who we are, who we
/// know, our vector clock and the administrative knobs.
///
/// Each field has its own lock and no method holds two of them at once.
pub struct NodeContext {
    pub identity: WorkStation,
    pub settings: NodeSettings,
    membership: RwLock<ClusterMembership>,
    clock: Mutex<VectorClock>,
    running: AtomicBool,
    message_delay: RwLock<Duration>,
}

impl NodeContext {
    pub fn new(
        identity: WorkStation,
        peers: Vec<WorkStation>,
        settings: NodeSettings,
        running: bool,
    ) -> Self {
        let clock = VectorClock::new(identity.clone(), peers.iter().cloned());
        Self {
            identity,
            settings,
            membership: RwLock::new(ClusterMembership::new(peers)),
            clock: Mutex::new(clock),
            running: AtomicBool::new(running),
            message_delay: RwLock::new(Duration::ZERO),
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        let mut ctx = Self::new(
            config.identity(),
            config.peers(),
            NodeSettings::from(config),
            config.start_running,
        );
        *ctx.message_delay.get_mut() = Duration::from_millis(config.message_delay_ms);
        ctx
    }

    /// Record a local event and return the clock to attach to the next message.
    pub async fn tick(&self) -> ClockSnapshot {
        let mut clock = self.clock.lock().await;
        clock.increment();
        clock.snapshot()
    }

    pub async fn snapshot(&self) -> ClockSnapshot {
        self.clock.lock().await.snapshot()
    }

    /// Merge a clock received from a peer. Counts as a local event.
    pub async fn observe(&self, received: &ClockSnapshot) -> ClockSnapshot {
        let mut clock = self.clock.lock().await;
        clock.merge(received);
        clock.snapshot()
    }

    pub async fn peers(&self) -> Vec<WorkStation> {
        self.membership.read().await.list_peers()
    }

    pub async fn find_peer(&self, ws: &WorkStation) -> Result<WorkStation> {
        self.membership.read().await.find(ws).cloned()
    }

    pub async fn add_peer(&self, ws: WorkStation) -> Result<WorkStation> {
        let added = self.membership.write().await.add_peer(ws)?;
        self.clock.lock().await.track(added.clone());
        Ok(added)
    }

    pub async fn remove_peer(&self, ws: &WorkStation) -> Result<()> {
        self.membership.write().await.remove_peer(ws)
    }

    /// Forget every peer, returning the ones that were known.
    pub async fn clear_peers(&self) -> Vec<WorkStation> {
        self.membership.write().await.clear()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub async fn message_delay(&self) -> Duration {
        *self.message_delay.read().await
    }

    pub async fn set_message_delay(&self, delay: Duration) {
        *self.message_delay.write().await = delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws(port: u16) -> WorkStation {
        WorkStation::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn joined_peer_gains_clock_entry() {
        let config = NodeConfig::new("127.0.0.1", 7000);
        let ctx = NodeContext::from_config(&config);
        assert!(ctx.snapshot().await.get(&ws(7001)).is_none());

        ctx.add_peer(ws(7001)).await.unwrap();
        assert_eq!(ctx.snapshot().await.get(&ws(7001)), Some(0));

        // Leaving keeps the counter so it never goes backwards
        ctx.remove_peer(&ws(7001)).await.unwrap();
        assert_eq!(ctx.snapshot().await.get(&ws(7001)), Some(0));
        assert!(ctx.peers().await.is_empty());
    }

    #[tokio::test]
    async fn observe_counts_as_event() {
        let config = NodeConfig::new("127.0.0.1", 7000).with_peer("127.0.0.1", 7001);
        let ctx = NodeContext::from_config(&config);
        let received = ClockSnapshot::from_entries([(ws(7001), 4)]);

        let after = ctx.observe(&received).await;
        assert_eq!(after.get(&ws(7000)), Some(1));
        assert_eq!(after.get(&ws(7001)), Some(4));
    }
}
