//! chatwire client: one send/receive surface over two interchangeable
//! realtime transports.
//!
//! [`TransportSelector`] probes the gateway's relay configuration at startup
//! and adopts either the hosted relay (subscribe over its socket, publish via
//! HTTP) or the gateway's own WebSocket. Socket loss falls back to the relay
//! first, then retries the socket after a cancellable delay. Each failure
//! class is surfaced to the caller at most once per session.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod notify;
pub mod relay;
pub mod selector;
pub mod socket;
pub mod transport;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use notify::{FailureClass, Notification};
pub use selector::{ClientEvent, SelectorHandle, SelectorState, TransportSelector};
pub use transport::{Inbound, TransportKind};
