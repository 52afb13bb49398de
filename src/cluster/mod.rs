//! Cluster-wide shared state: who this workstation is, which peers it knows
//! and the vector clock used to causally order protocol messages.

pub mod clock;
pub mod context;
pub mod membership;
pub mod workstation;

pub use clock::{ClockSnapshot, VectorClock};
pub use context::{NodeContext, NodeSettings};
pub use membership::ClusterMembership;
pub use workstation::WorkStation;
