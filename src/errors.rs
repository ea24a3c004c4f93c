use crate::services::storage_service::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::{error, warn};

/// Status used when the client went away before the response was written.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// A lightweight wrapper for handler errors that keeps the message local.
///
/// Messages are safe to show to callers; internal details are logged where
/// the error is converted and never put in the body.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 with a generic message.
    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "missing or invalid X-User-Id header")
    }

    pub fn client_closed() -> Self {
        let status = StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
            .unwrap_or(StatusCode::BAD_REQUEST);
        Self::new(status, "client closed request")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Validation(msg) => AppError::bad_request(msg),
            StorageError::ObjectNotFound { .. } => AppError::not_found("object not found"),
            StorageError::ProjectNotFound(_) => AppError::not_found("project not found"),
            StorageError::UnsafePath(path) => {
                error!("refused unsafe storage path {}", path.display());
                AppError::bad_request("invalid path")
            }
            StorageError::BodyRead(err) => {
                warn!(status = CLIENT_CLOSED_REQUEST, "upload body interrupted: {}", err);
                AppError::client_closed()
            }
            other => {
                error!("storage failure: {}", other);
                AppError::internal()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io, path::PathBuf};

    #[test]
    fn storage_errors_map_to_generic_statuses() {
        let cases = [
            (StorageError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                StorageError::ObjectNotFound {
                    project: "p".into(),
                    id: "x".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (StorageError::UnsafePath(PathBuf::from("../x")), StatusCode::BAD_REQUEST),
            (
                StorageError::Write(io::Error::other("disk full at /srv/objects")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status, status);
            assert!(!app.message.contains("/srv"));
        }
    }

    #[test]
    fn client_closed_uses_499() {
        assert_eq!(AppError::client_closed().status.as_u16(), 499);
    }
}
