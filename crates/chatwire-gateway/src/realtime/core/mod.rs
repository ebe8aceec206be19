//! Realtime core components for the gateway runtime.
//!
//! Client registry, liveness monitor, and the egress engine shared by the
//! socket and HTTP ingress paths.

mod client_registry;
mod liveness;
mod realtime;

pub use client_registry::{BindOutcome, ClientRegistry, ConnId, ConnectionHandle, SweepReport};
pub use liveness::LivenessMonitor;
pub use realtime::RealtimeCore;
