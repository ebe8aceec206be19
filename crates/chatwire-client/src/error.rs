//! Client error type.

use thiserror::Error;

use chatwire_core::error::ChatError;
use chatwire_core::protocol::frames::ErrorFrame;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket failed: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    /// The gateway answered a publish with an error frame.
    #[error("rejected by server ({status}): {}", .frame.error)]
    Rejected { status: u16, frame: ErrorFrame },
    /// No realtime transport is usable.
    #[error("realtime transport unavailable")]
    Unavailable,
    #[error("transport closed")]
    Closed,
}

impl ClientError {
    /// Stable code when the gateway supplied one.
    pub fn server_code(&self) -> Option<&str> {
        match self {
            ClientError::Rejected { frame, .. } => frame.code.as_deref(),
            ClientError::Chat(e) => Some(e.client_code().as_str()),
            ClientError::Unavailable => Some("UNAVAILABLE"),
            _ => None,
        }
    }
}
