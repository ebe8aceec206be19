//! Relay bridge codec: server frames <-> (channel, event, data) triples on the
//! hosted pub/sub service, plus the relay configuration handshake types.

use serde::{Deserialize, Serialize};

use crate::model::Identity;
use crate::protocol::channel::{
    direct_channel, inbox_channel, BROADCAST_CHANNEL, REACTIONS_CHANNEL, STATUS_CHANNEL,
};
use crate::protocol::envelope::ValidationError;
use crate::protocol::frames::ServerFrame;

pub const EVENT_MESSAGE: &str = "new-message";
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_REACTION: &str = "new-reaction";
pub const EVENT_STATUS: &str = "user-status";

/// Where a frame goes on the relay. One trigger fans out to every channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRoute {
    pub channels: Vec<String>,
    pub event: &'static str,
}

impl RelayRoute {
    fn fixed(channel: &str, event: &'static str) -> Self {
        Self {
            channels: vec![channel.to_string()],
            event,
        }
    }
}

/// Channels for a direct-scope event: the pair's conversation channel, the
/// recipient's inbox and, when `echo` is set, the sender's inbox. This
/// mirrors socket delivery (recipient plus echo for messages, recipient only
/// for typing).
fn direct_channels(from: &Identity, to: &Identity, echo: bool) -> Vec<String> {
    let mut channels = vec![direct_channel(from, to), inbox_channel(to)];
    if echo && from != to {
        channels.push(inbox_channel(from));
    }
    channels
}

/// Compute the relay route for a frame. `None` for frames that never travel
/// over the relay (system, pong) and for broadcast-scope typing, which is
/// not delivered on either transport.
pub fn route(frame: &ServerFrame) -> Option<RelayRoute> {
    match frame {
        ServerFrame::Message(m) => Some(match &m.to_identity {
            Some(to) => RelayRoute {
                channels: direct_channels(&m.from_identity, to, true),
                event: EVENT_MESSAGE,
            },
            None => RelayRoute::fixed(BROADCAST_CHANNEL, EVENT_MESSAGE),
        }),
        ServerFrame::Typing(t) => t.to_identity.as_ref().map(|to| RelayRoute {
            channels: direct_channels(&t.from_identity, to, false),
            event: EVENT_TYPING,
        }),
        ServerFrame::Reaction(_) => Some(RelayRoute::fixed(REACTIONS_CHANNEL, EVENT_REACTION)),
        ServerFrame::Status(_) => Some(RelayRoute::fixed(STATUS_CHANNEL, EVENT_STATUS)),
        ServerFrame::System(_) | ServerFrame::Pong(_) => None,
    }
}

fn event_kind(event: &str) -> Option<&'static str> {
    match event {
        EVENT_MESSAGE => Some("message"),
        EVENT_TYPING => Some("typing"),
        EVENT_REACTION => Some("reaction"),
        EVENT_STATUS => Some("status"),
        _ => None,
    }
}

/// Decode one relay event back into the frame the socket path would have
/// delivered. The event name must agree with the frame's own tag.
pub fn decode_event(event: &str, data: &str) -> Result<ServerFrame, ValidationError> {
    let expected = event_kind(event).ok_or_else(|| ValidationError::UnknownType(event.to_string()))?;
    let frame: ServerFrame =
        serde_json::from_str(data).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    if frame.kind() != expected {
        return Err(ValidationError::InvalidField {
            field: "type",
            reason: "does not match relay event name",
        });
    }
    Ok(frame)
}

// --------------------
// Relay configuration endpoint
// --------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    PusherMode,
    OfflineMode,
}

/// Public half of the relay credentials (safe to hand to clients).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PusherPublicConfig {
    pub key: String,
    pub cluster: String,
}

/// `GET /relay/config` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfigResponse {
    pub status: RelayMode,
    #[serde(default)]
    pub pusher_config: Option<PusherPublicConfig>,
}

impl RelayConfigResponse {
    pub fn offline() -> Self {
        Self {
            status: RelayMode::OfflineMode,
            pusher_config: None,
        }
    }

    pub fn pusher(key: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            status: RelayMode::PusherMode,
            pusher_config: Some(PusherPublicConfig {
                key: key.into(),
                cluster: cluster.into(),
            }),
        }
    }

    /// Relay credentials if relay mode is on *and* the config is complete.
    pub fn usable(&self) -> Option<&PusherPublicConfig> {
        if self.status != RelayMode::PusherMode {
            return None;
        }
        self.pusher_config
            .as_ref()
            .filter(|c| !c.key.trim().is_empty() && !c.cluster.trim().is_empty())
    }
}
