//! Decode-once codec for the socket transport.
//!
//! - Text frames => validated `Envelope` (size checked before parsing)
//! - Binary frames are rejected; the protocol is JSON text only
//! - Ping/Pong/Close are surfaced for lifecycle management

use axum::extract::ws::Message;

use chatwire_core::error::{ChatError, Result};
use chatwire_core::protocol::{validate, Envelope, ValidationError};

#[derive(Debug)]
pub enum Inbound {
    Envelope(Envelope),
    Ping,
    Pong,
    Close,
}

fn frame_len(msg: &Message) -> usize {
    match msg {
        Message::Text(s) => s.len(),
        Message::Binary(b) => b.len(),
        Message::Ping(v) | Message::Pong(v) => v.len(),
        Message::Close(_) => 0,
    }
}

pub fn decode(msg: Message, max_frame_bytes: usize) -> Result<Inbound> {
    if frame_len(&msg) > max_frame_bytes {
        return Err(ChatError::Validation(ValidationError::InvalidField {
            field: "frame",
            reason: "exceeds gateway.max_frame_bytes",
        }));
    }
    match msg {
        Message::Text(s) => Ok(Inbound::Envelope(validate(&s)?)),
        Message::Binary(_) => Err(ChatError::Validation(ValidationError::Malformed(
            "binary frames are not supported".into(),
        ))),
        Message::Ping(_) => Ok(Inbound::Ping),
        Message::Pong(_) => Ok(Inbound::Pong),
        Message::Close(_) => Ok(Inbound::Close),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn oversized_text_is_rejected_before_parsing() {
        let big = format!(r#"{{"type":"message","content":"{}","fromIdentity":"0xa"}}"#, "x".repeat(600));
        let err = decode(Message::Text(big), 256).unwrap_err();
        assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
        assert!(err.to_string().contains("max_frame_bytes"));
    }

    #[test]
    fn text_is_validated() {
        let ok = decode(Message::Text(r#"{"type":"ping"}"#.into()), 256).unwrap();
        assert!(matches!(ok, Inbound::Envelope(Envelope::Ping(_))));
        assert!(decode(Message::Text(r#"{"type":"nope"}"#.into()), 256).is_err());
    }

    #[test]
    fn binary_is_rejected_and_control_frames_pass() {
        assert!(decode(Message::Binary(vec![1, 2, 3]), 256).is_err());
        assert!(matches!(decode(Message::Pong(vec![]), 256).unwrap(), Inbound::Pong));
        assert!(matches!(decode(Message::Close(None), 256).unwrap(), Inbound::Close));
    }
}
