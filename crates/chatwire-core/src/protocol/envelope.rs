//! Inbound envelope schema (JSON text frames) and its validator.
//!
//! Validation is two-phase: the `type` tag is read off the raw object first so
//! a missing or unknown tag gets its own error, then the remaining fields are
//! decoded into the variant's wire shape and checked semantically (non-empty
//! identities, ISO-8601 timestamps).

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{Identity, MessageId};

/// Tags accepted on the inbound path.
pub const ENVELOPE_TYPES: [&str; 4] = ["message", "typing", "ping", "reaction"];

/// Why a raw frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("missing envelope type")]
    MissingType,
    #[error("unknown envelope type: {0}")]
    UnknownType(String),
    /// Missing required field or wrong field type.
    #[error("invalid {kind} envelope: {detail}")]
    Shape { kind: &'static str, detail: String },
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

/// A validated realtime envelope. Closed set: adding a kind is a compile error
/// at every exhaustive match (validator, gateway router, relay codec).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Message(MessageEnvelope),
    Typing(TypingEnvelope),
    Ping(PingEnvelope),
    Reaction(ReactionEnvelope),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub content: String,
    pub from_identity: Identity,
    pub to_identity: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEnvelope {
    pub from_identity: Identity,
    pub to_identity: Option<Identity>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionEnvelope {
    pub message_id: MessageId,
    pub from_identity: Identity,
    pub emoji: String,
}

impl Envelope {
    /// Wire tag of this envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Message(_) => "message",
            Envelope::Typing(_) => "typing",
            Envelope::Ping(_) => "ping",
            Envelope::Reaction(_) => "reaction",
        }
    }

    /// Sender identity; `None` for `ping`, which never binds.
    pub fn from_identity(&self) -> Option<&Identity> {
        match self {
            Envelope::Message(m) => Some(&m.from_identity),
            Envelope::Typing(t) => Some(&t.from_identity),
            Envelope::Reaction(r) => Some(&r.from_identity),
            Envelope::Ping(_) => None,
        }
    }

    /// Encode for a text frame.
    pub fn to_json(&self) -> String {
        // Envelope fields are plain strings/ints; encoding cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// --------------------
// Wire shapes (phase 2)
// --------------------
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageWire {
    content: String,
    from_identity: String,
    #[serde(default)]
    to_identity: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingWire {
    from_identity: String,
    #[serde(default)]
    to_identity: Option<String>,
    #[serde(default = "default_true")]
    is_typing: bool,
}

#[derive(Deserialize)]
struct PingWire {
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactionWire {
    message_id: i64,
    from_identity: String,
    emoji: String,
}

fn default_true() -> bool {
    true
}

/// Validate one raw text frame.
pub fn validate(raw: &str) -> Result<Envelope, ValidationError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    validate_value(value)
}

/// Validate an already-parsed JSON value (HTTP bodies take this path).
pub fn validate_value(value: Value) -> Result<Envelope, ValidationError> {
    let Value::Object(mut obj) = value else {
        return Err(ValidationError::Malformed(
            "envelope must be a JSON object".into(),
        ));
    };

    let tag = match obj.remove("type") {
        None | Some(Value::Null) => return Err(ValidationError::MissingType),
        Some(Value::String(s)) => s,
        Some(_) => {
            return Err(ValidationError::InvalidField {
                field: "type",
                reason: "must be a string",
            })
        }
    };

    match tag.as_str() {
        "message" => {
            let w: MessageWire = shape("message", obj)?;
            if w.content.trim().is_empty() {
                return Err(ValidationError::InvalidField {
                    field: "content",
                    reason: "must not be empty",
                });
            }
            Ok(Envelope::Message(MessageEnvelope {
                content: w.content,
                from_identity: required_identity("fromIdentity", w.from_identity)?,
                to_identity: optional_identity("toIdentity", w.to_identity)?,
                timestamp: optional_timestamp(w.timestamp)?,
            }))
        }
        "typing" => {
            let w: TypingWire = shape("typing", obj)?;
            Ok(Envelope::Typing(TypingEnvelope {
                from_identity: required_identity("fromIdentity", w.from_identity)?,
                to_identity: optional_identity("toIdentity", w.to_identity)?,
                is_typing: w.is_typing,
            }))
        }
        "ping" => {
            let w: PingWire = shape("ping", obj)?;
            Ok(Envelope::Ping(PingEnvelope {
                timestamp: optional_timestamp(w.timestamp)?,
            }))
        }
        "reaction" => {
            let w: ReactionWire = shape("reaction", obj)?;
            if w.emoji.trim().is_empty() {
                return Err(ValidationError::InvalidField {
                    field: "emoji",
                    reason: "must not be empty",
                });
            }
            Ok(Envelope::Reaction(ReactionEnvelope {
                message_id: MessageId(w.message_id),
                from_identity: required_identity("fromIdentity", w.from_identity)?,
                emoji: w.emoji,
            }))
        }
        _ => Err(ValidationError::UnknownType(tag)),
    }
}

fn shape<T: DeserializeOwned>(
    kind: &'static str,
    obj: Map<String, Value>,
) -> Result<T, ValidationError> {
    serde_json::from_value(Value::Object(obj)).map_err(|e| ValidationError::Shape {
        kind,
        detail: e.to_string(),
    })
}

fn required_identity(field: &'static str, raw: String) -> Result<Identity, ValidationError> {
    Identity::parse(raw).ok_or(ValidationError::InvalidField {
        field,
        reason: "must be a non-empty string",
    })
}

fn optional_identity(
    field: &'static str,
    raw: Option<String>,
) -> Result<Option<Identity>, ValidationError> {
    match raw {
        None => Ok(None),
        Some(s) => Identity::parse(s).map(Some).ok_or(ValidationError::InvalidField {
            field,
            reason: "must be null or a non-empty string",
        }),
    }
}

fn optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, ValidationError> {
    match raw {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| ValidationError::InvalidField {
                field: "timestamp",
                reason: "must be an ISO-8601 string",
            }),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn absent_and_null_recipient_mean_broadcast() {
        let a = validate(r#"{"type":"message","content":"hi","fromIdentity":"0xa"}"#).unwrap();
        let b = validate(r#"{"type":"message","content":"hi","fromIdentity":"0xa","toIdentity":null}"#)
            .unwrap();
        assert_eq!(a, b);
        let Envelope::Message(m) = a else { panic!("expected message") };
        assert!(m.to_identity.is_none());
    }

    #[test]
    fn empty_recipient_is_rejected() {
        let err = validate(r#"{"type":"typing","fromIdentity":"0xa","toIdentity":""}"#).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidField {
                field: "toIdentity",
                reason: "must be null or a non-empty string"
            }
        );
    }

    #[test]
    fn type_must_be_string() {
        let err = validate(r#"{"type":7}"#).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "type", .. }));
    }

    #[test]
    fn encoded_envelope_validates_back() {
        let env = Envelope::Typing(TypingEnvelope {
            from_identity: Identity::parse("0xa").unwrap(),
            to_identity: Identity::parse("0xb"),
            is_typing: false,
        });
        assert_eq!(validate(&env.to_json()).unwrap(), env);
    }
}
