use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Domain error taxonomy shared by the REST surface and the WS protocol.
///
/// REST handlers return these directly (IntoResponse). WS dispatch maps them
/// onto the `error` event with the matching numeric code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    InvalidRequest(&'static str),

    #[error("{0}")]
    Blocked(&'static str),

    /// A terminal transition that already happened (e.g. the second leg of a
    /// racing end-call). Treated as success by callers; nothing is broadcast.
    #[error("already in a terminal state")]
    Conflict,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Blocked(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Numeric code carried by the WS `error` event.
    pub fn ws_code(&self) -> u32 {
        self.status().as_u16() as u32
    }

    /// Benign errors are swallowed by the WS dispatcher instead of being
    /// surfaced to the client.
    pub fn is_benign(&self) -> bool {
        matches!(self, ApiError::Conflict)
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
