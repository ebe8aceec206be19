//! HTTP publish endpoints (relay-mode ingress) and the relay config probe.
//!
//! Bodies are read as raw text and run through the same validator as socket
//! frames, so a malformed body yields the same `{error, code}` shape.

mod error;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use chatwire_core::error::ChatError;
use chatwire_core::model::{Identity, MessageId, MessageRecord, ReactionRecord};
use chatwire_core::protocol::envelope::validate_value;
use chatwire_core::protocol::frames::StatusFrame;
use chatwire_core::protocol::publish::StatusUpdate;
use chatwire_core::protocol::relay::RelayConfigResponse;
use chatwire_core::protocol::{Envelope, ValidationError};

use crate::app_state::AppState;

pub use error::{status_for, ApiError, ApiResult};

fn parse_body(body: &str) -> Result<Value, ChatError> {
    serde_json::from_str(body).map_err(|e| ChatError::Validation(ValidationError::Malformed(e.to_string())))
}

/// Validate a publish body as envelope `kind`. The `type` tag is optional on
/// HTTP; when present it must agree with the endpoint.
fn envelope_from_body(kind: &'static str, body: &str) -> Result<Envelope, ChatError> {
    let mut value = parse_body(body)?;
    if let Value::Object(obj) = &mut value {
        obj.entry("type").or_insert_with(|| Value::String(kind.into()));
    }
    let env = validate_value(value)?;
    if env.kind() != kind {
        return Err(ChatError::Validation(ValidationError::InvalidField {
            field: "type",
            reason: "does not match endpoint",
        }));
    }
    Ok(env)
}

fn count(app: &AppState, env: &Envelope) {
    app.metrics()
        .envelopes
        .inc(&[("type", env.kind()), ("path", "http")]);
}

pub async fn relay_config(State(app): State<AppState>) -> Json<RelayConfigResponse> {
    Json(app.relay_config().clone())
}

pub async fn post_message(
    State(app): State<AppState>,
    body: String,
) -> ApiResult<(StatusCode, Json<MessageRecord>)> {
    let env = envelope_from_body("message", &body)?;
    count(&app, &env);
    let Envelope::Message(m) = env else {
        return Err(ChatError::Internal("validator returned wrong kind".into()).into());
    };
    let record = app.chat().post_message(m).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn post_typing(State(app): State<AppState>, body: String) -> ApiResult<Json<Value>> {
    let env = envelope_from_body("typing", &body)?;
    count(&app, &env);
    let Envelope::Typing(t) = env else {
        return Err(ChatError::Internal("validator returned wrong kind".into()).into());
    };
    app.chat().post_typing(t).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn post_reaction(
    State(app): State<AppState>,
    body: String,
) -> ApiResult<(StatusCode, Json<ReactionRecord>)> {
    let env = envelope_from_body("reaction", &body)?;
    count(&app, &env);
    let Envelope::Reaction(r) = env else {
        return Err(ChatError::Internal("validator returned wrong kind".into()).into());
    };
    let record = app.chat().post_reaction(r).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn post_status(
    State(app): State<AppState>,
    Path(identity): Path<String>,
    body: String,
) -> ApiResult<Json<StatusFrame>> {
    let identity = Identity::parse(identity).ok_or(ChatError::Validation(
        ValidationError::InvalidField {
            field: "identity",
            reason: "must be a non-empty string",
        },
    ))?;
    let update: StatusUpdate = serde_json::from_value(parse_body(&body)?).map_err(|e| {
        ChatError::Validation(ValidationError::Shape {
            kind: "status",
            detail: e.to_string(),
        })
    })?;
    let status = app.chat().set_presence(&identity, update.is_online).await?;
    Ok(Json(status))
}

pub async fn get_reactions(
    State(app): State<AppState>,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<Vec<ReactionRecord>>> {
    let reactions = app
        .chat()
        .store()
        .get_reactions(MessageId(message_id))
        .await?;
    Ok(Json(reactions))
}
