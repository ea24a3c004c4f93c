//! Media ingestion and retrieval.
//!
//! The server half (`handlers`, `routes`, `services`) accepts uploads as
//! multipart forms or raw chunked bodies, stores them under
//! `{base}/{user}/{project}/{id}_{filename}` and indexes them in SQLite.
//! The `client` half picks a transfer mode for a source and drives the
//! upload with retries.

pub mod client;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use axum::Router;
use services::storage_service::StorageService;

/// The full application router with state applied.
pub fn app(service: StorageService) -> Router {
    routes::routes::routes().with_state(service)
}
