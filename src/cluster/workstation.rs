use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};
use crate::proto;

/// Network identity of a workstation. Two workstations are the same peer
/// exactly when ip and port are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkStation {
    pub ip: String,
    pub port: u16,
}

impl WorkStation {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// URI used to open a gRPC channel to this workstation.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }

    /// Decode an optional proto identity, rejecting missing or malformed ones.
    pub fn from_proto(ws: Option<&proto::WorkStation>) -> Result<Self> {
        let ws = ws.ok_or_else(|| ClusterError::InvalidMessage("missing workstation".into()))?;
        Self::try_from(ws)
    }
}

impl fmt::Display for WorkStation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<&WorkStation> for proto::WorkStation {
    fn from(ws: &WorkStation) -> Self {
        proto::WorkStation {
            ip: ws.ip.clone(),
            port: u32::from(ws.port),
        }
    }
}

impl TryFrom<&proto::WorkStation> for WorkStation {
    type Error = ClusterError;

    fn try_from(ws: &proto::WorkStation) -> Result<Self> {
        if ws.ip.trim().is_empty() {
            return Err(ClusterError::InvalidMessage("empty workstation ip".into()));
        }
        let port = u16::try_from(ws.port).map_err(|_| {
            ClusterError::InvalidMessage(format!("workstation port {} out of range", ws.port))
        })?;
        Ok(WorkStation::new(ws.ip.clone(), port))
    }
}
