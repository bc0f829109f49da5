use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// API-layer error: a status code plus a structured body.
/// Business-level resolver outcomes map here too (409 for not_running /
/// not_resolvable, 500 for failed).
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "ok": false, "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<agentlens_index::Error> for ApiError {
    fn from(err: agentlens_index::Error) -> Self {
        match err {
            agentlens_index::Error::UnknownTrace(_) => Self::not_found(err.to_string()),
            agentlens_index::Error::InvalidQuery(_) => Self::bad_request(err.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}
