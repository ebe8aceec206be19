//! Transport seam shared by the socket and relay implementations.

use std::fmt;

use async_trait::async_trait;

use chatwire_core::protocol::envelope::Envelope;
use chatwire_core::protocol::frames::{ErrorFrame, ServerFrame};
use chatwire_core::protocol::relay::PusherPublicConfig;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Socket,
    Relay,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Socket => "socket",
            TransportKind::Relay => "relay",
        })
    }
}

/// One decoded item from the active transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Frame(ServerFrame),
    Error(ErrorFrame),
}

/// An open realtime transport.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    async fn send(&mut self, env: &Envelope) -> Result<()>;

    /// Next inbound item; `None` once the transport is gone.
    async fn recv(&mut self) -> Option<Inbound>;

    /// Stop timers and background tasks and close the connection. Must not
    /// block.
    fn close(&mut self);
}

#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Transport>>;
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// `Ok(None)` when the gateway reports offline mode or an incomplete
    /// relay config.
    async fn probe(&self) -> Result<Option<PusherPublicConfig>>;

    async fn open(&self, cfg: &PusherPublicConfig) -> Result<Box<dyn Transport>>;
}
