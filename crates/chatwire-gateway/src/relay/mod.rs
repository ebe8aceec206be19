//! Server half of the relay bridge: publishing routed frames to the hosted
//! pub/sub service so relay-mode clients receive the same events as sockets.

mod pusher;

use async_trait::async_trait;

use chatwire_core::error::Result;
use chatwire_core::protocol::relay::{self, RelayRoute};
use chatwire_core::protocol::ServerFrame;

pub use pusher::{sign, PusherRelay};

#[async_trait]
pub trait RelayPublisher: Send + Sync {
    /// Trigger `event` on every channel in `channels` with `data` (a JSON
    /// string) in a single request.
    async fn trigger(&self, channels: &[String], event: &str, data: &str) -> Result<()>;
}

/// Publish `frame` on its relay route. Frames without a route (pong,
/// system, broadcast-scope typing) are skipped and return `Ok(None)`.
pub async fn publish_frame(
    relay: &dyn RelayPublisher,
    frame: &ServerFrame,
) -> Result<Option<RelayRoute>> {
    let Some(route) = relay::route(frame) else {
        return Ok(None);
    };
    relay.trigger(&route.channels, route.event, &frame.to_json()).await?;
    Ok(Some(route))
}
