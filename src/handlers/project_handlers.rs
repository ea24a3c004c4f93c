//! Project-level operations: bulk delete and the `used` flag.

use crate::{
    errors::AppError, handlers::extract::UserKey, services::storage_service::StorageService,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// Optional body of `POST /projects/{project}/mark-used`.
#[derive(Debug, Deserialize)]
pub struct MarkUsedReq {
    #[serde(default = "default_used")]
    pub used: bool,
}

fn default_used() -> bool {
    true
}

/// `DELETE /projects/{project}`
///
/// Removes the project directory, its records and its cache entries. The
/// response spells out which of those succeeded.
pub async fn delete_project(
    State(service): State<StorageService>,
    UserKey(user_key): UserKey,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let report = service.delete_project(&user_key, &project).await?;
    let message = report.summary();
    info!(user_key = %user_key, project = %report.project, %message, "project deleted");

    Ok(Json(json!({
        "message": message,
        "project": report.project,
        "disk": report.disk,
        "existed_in_metadata": report.existed_in_metadata,
        "removed_from_metadata": report.removed_from_metadata,
    })))
}

/// `POST /projects/{project}/mark-used`
pub async fn mark_project_used(
    State(service): State<StorageService>,
    UserKey(user_key): UserKey,
    Path(project): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let used = if body.iter().all(u8::is_ascii_whitespace) {
        true
    } else {
        serde_json::from_slice::<MarkUsedReq>(&body)
            .map_err(|err| AppError::bad_request(format!("invalid body: {err}")))?
            .used
    };

    let record = service.mark_project_used(&user_key, &project, used).await?;
    Ok(Json(record))
}
