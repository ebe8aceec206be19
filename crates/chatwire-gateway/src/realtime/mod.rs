//! Realtime runtime (egress engine) for the chatwire gateway.

pub mod core;
pub mod types;

pub use core::{ClientRegistry, ConnId, ConnectionHandle, LivenessMonitor, RealtimeCore};
pub use types::{PreparedMsg, QoS};
