//! Outbound frames (server -> client). Same schema on socket and relay paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::model::{Identity, MessageRecord, ReactionRecord};
use crate::protocol::envelope::ValidationError;

/// Tagged server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Sent once when a socket is accepted.
    System(SystemFrame),
    Pong(PongFrame),
    /// Persisted message record (id + server timestamp).
    Message(MessageRecord),
    Typing(TypingFrame),
    Reaction(ReactionRecord),
    /// Presence change.
    Status(StatusFrame),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemFrame {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pusher_enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PongFrame {
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingFrame {
    pub from_identity: Identity,
    pub to_identity: Option<Identity>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFrame {
    pub identity: Identity,
    pub is_online: bool,
}

/// `{ "error": "...", "code": "..." }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorFrame {
    pub fn from_error(e: &ChatError) -> Self {
        Self {
            error: e.to_string(),
            code: Some(e.client_code().as_str().to_string()),
        }
    }
}

/// Anything the server can put on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerPayload {
    Frame(ServerFrame),
    Error(ErrorFrame),
}

impl ServerFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::System(_) => "system",
            ServerFrame::Pong(_) => "pong",
            ServerFrame::Message(_) => "message",
            ServerFrame::Typing(_) => "typing",
            ServerFrame::Reaction(_) => "reaction",
            ServerFrame::Status(_) => "status",
        }
    }

    pub fn pong_now() -> Self {
        ServerFrame::Pong(PongFrame {
            timestamp: Utc::now(),
        })
    }

    pub fn system(message: impl Into<String>, pusher_enabled: bool) -> Self {
        ServerFrame::System(SystemFrame {
            message: message.into(),
            pusher_enabled: Some(pusher_enabled),
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl ErrorFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Client-side decode of one socket text frame.
pub fn decode_server_payload(raw: &str) -> Result<ServerPayload, ValidationError> {
    serde_json::from_str(raw).map_err(|e| ValidationError::Malformed(e.to_string()))
}
