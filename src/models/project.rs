//! Represents a project, the per-user container objects are uploaded into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A project row in the metadata store.
///
/// Keyed by `(user_key, safe_name)`; `name` keeps the display name the
/// first upload was made with.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ProjectRecord {
    /// Sanitized caller key that owns this project.
    pub user_key: String,

    /// Sanitized project identifier, also the directory name on disk.
    pub safe_name: String,

    /// Project name as the client sent it.
    pub name: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Whether the project has been marked as used downstream.
    pub used: bool,

    pub last_used_at: Option<DateTime<Utc>>,
}
