use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{timeout, Duration};

use chatwire_core::model::Identity;

use crate::obs::GatewayMetrics;
use crate::realtime::core::{ClientRegistry, ConnectionHandle};
use crate::realtime::types::{PreparedMsg, QoS};

/// Egress engine: owns the client registry and pushes prepared frames into
/// per-connection outbound queues.
pub struct RealtimeCore {
    registry: Arc<ClientRegistry>,
    metrics: Arc<GatewayMetrics>,
}

impl RealtimeCore {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            registry: Arc::new(ClientRegistry::new()),
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    async fn push(handle: &ConnectionHandle, msg: &PreparedMsg, qos: QoS) -> bool {
        match qos {
            QoS::Lossy => match handle.sender().try_send(msg.to_ws_message()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(conn = %handle.id(), kind = msg.kind(), "outbound queue full; dropped");
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            },
            QoS::Reliable { timeout_ms } => {
                let send = handle.sender().send(msg.to_ws_message());
                let res = if timeout_ms > 0 {
                    timeout(Duration::from_millis(timeout_ms), send).await.ok()
                } else {
                    Some(send.await)
                };
                match res {
                    Some(Ok(())) => true,
                    Some(Err(_)) => false,
                    None => {
                        tracing::warn!(conn = %handle.id(), kind = msg.kind(), "outbound queue stalled; frame dropped");
                        false
                    }
                }
            }
        }
    }

    /// Deliver to one connection.
    pub async fn send_to(&self, handle: &ConnectionHandle, msg: &PreparedMsg, qos: QoS) -> bool {
        Self::push(handle, msg, qos).await
    }

    /// Deliver to the connection bound to `identity`, if any.
    pub async fn send_to_identity(&self, identity: &Identity, msg: &PreparedMsg, qos: QoS) -> bool {
        let Some(handle) = self.registry.lookup(identity) else {
            return false;
        };
        let started = Instant::now();
        let ok = Self::push(&handle, msg, qos).await;
        self.metrics
            .delivery_duration
            .observe(&[("kind", msg.kind())], started.elapsed());
        ok
    }

    /// Deliver to every open connection (bound or not). Returns the number of
    /// queues the frame reached.
    pub async fn broadcast(&self, msg: &PreparedMsg, qos: QoS) -> usize {
        let started = Instant::now();
        let handles = self.registry.handles();
        let mut futs: FuturesUnordered<_> = handles
            .iter()
            .map(|h| Self::push(h, msg, qos))
            .collect();

        let mut delivered = 0;
        while let Some(ok) = futs.next().await {
            delivered += usize::from(ok);
        }
        self.metrics
            .delivery_duration
            .observe(&[("kind", msg.kind())], started.elapsed());
        delivered
    }
}
