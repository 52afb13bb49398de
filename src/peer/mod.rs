//! Outbound calls to other workstations.

pub mod backoff;
pub mod client;

pub use client::{CalculationReply, PeerClient};
