//! chatwire gateway library entry.
//!
//! Wires the socket transport, the client registry and liveness monitor, the
//! chat routing service, storage, relay publishing and the HTTP surface into
//! one server. Consumed by the binary (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod api;
pub mod app_state;
pub mod config;
pub mod obs;
pub mod ops;
pub mod realtime;
pub mod relay;
pub mod router;
pub mod services;
pub mod store;
pub mod transport;
