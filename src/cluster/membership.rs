use crate::cluster::WorkStation;
use crate::error::{ClusterError, Result};

/// The set of other workstations this node knows about.
///
/// Peers are kept in join order, which is the order used for batch fan-out
/// and work-stealing polls.
#[derive(Debug, Default, Clone)]
pub struct ClusterMembership {
    peers: Vec<WorkStation>,
}

impl ClusterMembership {
    pub fn new(peers: impl IntoIterator<Item = WorkStation>) -> Self {
        let mut membership = Self::default();
        for peer in peers {
            // Duplicates in the initial list collapse to one entry
            let _ = membership.add_peer(peer);
        }
        membership
    }

    pub fn add_peer(&mut self, ws: WorkStation) -> Result<WorkStation> {
        if self.peers.contains(&ws) {
            return Err(ClusterError::AlreadyRegistered(ws));
        }
        self.peers.push(ws.clone());
        Ok(ws)
    }

    pub fn remove_peer(&mut self, ws: &WorkStation) -> Result<()> {
        let index = self
            .peers
            .iter()
            .position(|peer| peer == ws)
            .ok_or_else(|| ClusterError::NotRegistered(ws.clone()))?;
        self.peers.remove(index);
        Ok(())
    }

    /// Resolve an identity claimed by an inbound message to a known peer.
    pub fn find(&self, ws: &WorkStation) -> Result<&WorkStation> {
        self.peers
            .iter()
            .find(|peer| *peer == ws)
            .ok_or_else(|| ClusterError::UnknownPeer(ws.clone()))
    }

    pub fn contains(&self, ws: &WorkStation) -> bool {
        self.peers.contains(ws)
    }

    pub fn list_peers(&self) -> Vec<WorkStation> {
        self.peers.clone()
    }

    /// Remove every peer, returning them in membership order.
    pub fn clear(&mut self) -> Vec<WorkStation> {
        std::mem::take(&mut self.peers)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
