//! Defines routes for object ingestion, retrieval and project housekeeping.
//!
//! ## Structure
//! - **Object endpoints**
//!   - `POST   /objects`                          upload (multipart or raw body)
//!   - `GET    /objects/{project}/{id}`           download as attachment
//!   - `GET    /objects/{project}/{id}/stream`    same bytes, inline
//!   - `GET    /objects/{project}/{id}/preview`   JSON with stream URL
//!   - `GET    /objects/{project}/{id}/content`   text inline, others attached
//!   - `DELETE /objects/{project}/{id}`           delete one object
//!
//! - **Project endpoints**
//!   - `DELETE /projects/{project}`               delete project
//!   - `POST   /projects/{project}/mark-used`     record the used flag
//!
//! Every object and project route requires an `X-User-Id` header.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{
            delete_object, download_object, object_content, preview_object, stream_object,
            upload_object,
        },
        project_handlers::{delete_project, mark_project_used},
    },
    services::storage_service::StorageService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build the router. Shared state (`StorageService`) reaches every handler.
pub fn routes() -> Router<StorageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // uploads are streamed to disk, so the default body cap does not apply
        .route(
            "/objects",
            post(upload_object).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/objects/{project}/{id}",
            get(download_object).delete(delete_object),
        )
        .route("/objects/{project}/{id}/stream", get(stream_object))
        .route("/objects/{project}/{id}/preview", get(preview_object))
        .route("/objects/{project}/{id}/content", get(object_content))
        .route("/projects/{project}", delete(delete_project))
        .route("/projects/{project}/mark-used", post(mark_project_used))
}
