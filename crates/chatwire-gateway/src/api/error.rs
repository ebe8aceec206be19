use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use chatwire_core::error::{ChatError, ClientCode};
use chatwire_core::protocol::ErrorFrame;

/// HTTP face of `ChatError`. Body matches the socket error frame.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn status_for(code: ClientCode) -> StatusCode {
    match code {
        ClientCode::BadRequest => StatusCode::BAD_REQUEST,
        ClientCode::NotFriends | ClientCode::Forbidden => StatusCode::FORBIDDEN,
        ClientCode::Persistence | ClientCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ClientCode::Transport => StatusCode::BAD_GATEWAY,
        ClientCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ClientCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.client_code());
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "request failed");
        }
        (status, Json(ErrorFrame::from_error(&self.0))).into_response()
    }
}
