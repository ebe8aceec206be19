use axum::extract::ws::Message;

use chatwire_core::protocol::{ErrorFrame, ServerFrame};

/// Delivery strategy for one outbound frame.
#[derive(Debug, Clone, Copy, Default)]
pub enum QoS {
    /// Latency-critical (typing): never await; a full queue drops the frame.
    #[default]
    Lossy,
    /// Persisted events: wait for queue space, bounded by `timeout_ms`.
    Reliable { timeout_ms: u64 },
}

impl QoS {
    /// Default for persisted records.
    pub const RELIABLE: QoS = QoS::Reliable { timeout_ms: 1500 };
}

/// Frame serialized once, sent to N connections.
#[derive(Debug, Clone)]
pub struct PreparedMsg {
    kind: &'static str,
    text: String,
}

impl PreparedMsg {
    pub fn frame(frame: &ServerFrame) -> Self {
        Self {
            kind: frame.kind(),
            text: frame.to_json(),
        }
    }

    pub fn error(err: &ErrorFrame) -> Self {
        Self {
            kind: "error",
            text: err.to_json(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn to_ws_message(&self) -> Message {
        Message::Text(self.text.clone())
    }
}
