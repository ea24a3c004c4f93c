//! Represents an object (file) stored inside a project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{FromRow, types::Json};

/// Logical type of an uploaded object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ObjectKind {
    /// A video clip carrying descriptive fields (title, tags, time range).
    Video,
    /// A generic file.
    Files,
}

impl ObjectKind {
    /// Status recorded for a freshly committed object of this kind.
    pub fn initial_status(self) -> &'static str {
        match self {
            ObjectKind::Video => "UPLOADED",
            ObjectKind::Files => "ready",
        }
    }
}

/// Durable metadata describing one stored object.
///
/// The `id` is generated server-side for every ingestion and is part of the
/// on-disk filename, so two uploads of the same original file never collide.
/// `storage_path` is relative to the storage base directory.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Sanitized caller key that owns the object.
    pub user_key: String,

    /// Sanitized project identifier.
    pub project: String,

    /// Opaque object identifier (UUID v4 text).
    pub id: String,

    pub kind: ObjectKind,

    /// Sanitized original filename, used as the download name.
    pub filename: String,

    /// Path relative to the storage base: `{user}/{project}/{id}_{filename}`.
    pub storage_path: String,

    pub uploaded_at: DateTime<Utc>,

    /// Bytes actually written to disk (never the client-declared length).
    pub size_bytes: i64,

    /// MD5 of the stored payload.
    pub etag: Option<String>,

    pub status: String,

    pub title: Option<String>,

    pub description: Option<String>,

    pub tags: Json<Vec<String>>,

    pub start_time: Option<String>,

    pub end_time: Option<String>,

    pub thumbnail_url: Option<String>,

    /// Descriptive fields the client sent that have no dedicated column.
    pub extra: Json<Map<String, Value>>,
}
