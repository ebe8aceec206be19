//! Shared error type across chatwire crates.

use thiserror::Error;

use crate::protocol::envelope::ValidationError;

/// Client-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientCode {
    /// Malformed or unknown envelope.
    BadRequest,
    /// Direct message between identities that are not friends.
    NotFriends,
    /// Envelope identity does not match the bound identity.
    Forbidden,
    /// Store unavailable or write failed.
    Persistence,
    /// Socket/relay unreachable.
    Transport,
    /// Missed heartbeat.
    Timeout,
    /// No transport is currently usable.
    Unavailable,
    /// Internal server error.
    Internal,
}

impl ClientCode {
    /// String representation used in JSON error frames.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::NotFriends => "NOT_FRIENDS",
            ClientCode::Forbidden => "FORBIDDEN",
            ClientCode::Persistence => "PERSISTENCE",
            ClientCode::Transport => "TRANSPORT",
            ClientCode::Timeout => "TIMEOUT",
            ClientCode::Unavailable => "UNAVAILABLE",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Unified error type used by core, gateway and client.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid envelope: {0}")]
    Validation(#[from] ValidationError),
    #[error("not friends: {0}")]
    NotFriends(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("liveness timeout")]
    LivenessTimeout,
    #[error("realtime transport unavailable")]
    Unavailable,
    #[error("invalid config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ChatError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            ChatError::Validation(_) => ClientCode::BadRequest,
            ChatError::NotFriends(_) => ClientCode::NotFriends,
            ChatError::Forbidden(_) => ClientCode::Forbidden,
            ChatError::Persistence(_) => ClientCode::Persistence,
            ChatError::Transport(_) => ClientCode::Transport,
            ChatError::LivenessTimeout => ClientCode::Timeout,
            ChatError::Unavailable => ClientCode::Unavailable,
            ChatError::Config(_) => ClientCode::BadRequest,
            ChatError::Internal(_) => ClientCode::Internal,
        }
    }

    /// Authorization failures (not friends, identity mismatch).
    pub fn is_authorization(&self) -> bool {
        matches!(self, ChatError::NotFriends(_) | ChatError::Forbidden(_))
    }
}
