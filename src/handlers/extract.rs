//! Request extractors shared by the handlers.

use crate::{errors::AppError, services::sanitize};
use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the caller identity. Authentication happens upstream;
/// this service only needs a stable, filesystem-safe key.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Sanitized caller key taken from `X-User-Id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserKey(pub String);

impl<S> FromRequestParts<S> for UserKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(sanitize::user_key)
            .map(UserKey)
            .ok_or_else(AppError::unauthorized)
    }
}
