//! src/services/metadata_store.rs
//!
//! Hierarchical metadata index: user → project → object. Every lookup is a
//! point query on the composite key; nothing here scans across projects.
//! `SqliteMetadataStore` is the production backend.

use crate::models::{
    object::{ObjectKind, ObjectRecord},
    project::ProjectRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

use super::storage_service::StorageResult;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const OBJECT_COLUMNS: &str = "user_key, project, id, kind, filename, storage_path, uploaded_at, \
     size_bytes, etag, status, title, description, tags, start_time, end_time, thumbnail_url, extra";

/// Point operations over the metadata index.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Look up a single object record. `Ok(None)` is the expected "absent"
    /// outcome; `Err` is reserved for store faults.
    async fn find_object(
        &self,
        user_key: &str,
        project: &str,
        id: &str,
    ) -> StorageResult<Option<ObjectRecord>>;

    /// Persist a record for a file that already exists on disk.
    async fn commit_object(&self, project_name: &str, record: &ObjectRecord) -> StorageResult<()>;

    /// Remove one object record. Returns whether a row existed.
    async fn delete_object(&self, user_key: &str, project: &str, id: &str) -> StorageResult<bool>;

    /// Remove a project row and every object row beneath it. Returns whether
    /// anything existed.
    async fn delete_project(&self, user_key: &str, project: &str) -> StorageResult<bool>;

    /// Record the `used` flag on a project.
    async fn mark_project_used(
        &self,
        user_key: &str,
        project: &str,
        used: bool,
    ) -> StorageResult<Option<ProjectRecord>>;

    /// Cheap connectivity probe for readiness checks.
    async fn ping(&self) -> StorageResult<()>;
}

/// Metadata store backed by a SQLite pool.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    pub db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> StorageResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    async fn ensure_project(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_key: &str,
        project: &str,
        project_name: &str,
    ) -> StorageResult<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO projects (user_key, safe_name, name, created_at, updated_at, used)
             VALUES (?, ?, ?, ?, ?, 0)
             ON CONFLICT(user_key, safe_name) DO UPDATE SET updated_at = excluded.updated_at",
        )
        .bind(user_key)
        .bind(project)
        .bind(project_name)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn find_object(
        &self,
        user_key: &str,
        project: &str,
        id: &str,
    ) -> StorageResult<Option<ObjectRecord>> {
        let record = sqlx::query_as::<_, ObjectRecord>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE user_key = ? AND project = ? AND id = ?"
        ))
        .bind(user_key)
        .bind(project)
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    async fn commit_object(&self, project_name: &str, record: &ObjectRecord) -> StorageResult<()> {
        let mut tx = self.db.begin().await?;
        self.ensure_project(&mut tx, &record.user_key, &record.project, project_name)
            .await?;

        // Video uploads refresh an existing entry in place; file uploads always
        // land on a fresh id, so a plain insert is enough.
        let on_conflict = match record.kind {
            ObjectKind::Video => {
                " ON CONFLICT(user_key, project, id) DO UPDATE SET
                    filename = excluded.filename,
                    storage_path = excluded.storage_path,
                    uploaded_at = excluded.uploaded_at,
                    size_bytes = excluded.size_bytes,
                    etag = excluded.etag,
                    status = excluded.status,
                    title = excluded.title,
                    description = excluded.description,
                    tags = excluded.tags,
                    start_time = excluded.start_time,
                    end_time = excluded.end_time,
                    thumbnail_url = excluded.thumbnail_url,
                    extra = excluded.extra"
            }
            ObjectKind::Files => "",
        };

        sqlx::query(&format!(
            "INSERT INTO objects ({OBJECT_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?){on_conflict}"
        ))
        .bind(&record.user_key)
        .bind(&record.project)
        .bind(&record.id)
        .bind(record.kind)
        .bind(&record.filename)
        .bind(&record.storage_path)
        .bind(record.uploaded_at)
        .bind(record.size_bytes)
        .bind(&record.etag)
        .bind(&record.status)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.tags)
        .bind(&record.start_time)
        .bind(&record.end_time)
        .bind(&record.thumbnail_url)
        .bind(&record.extra)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_object(&self, user_key: &str, project: &str, id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM objects WHERE user_key = ? AND project = ? AND id = ?")
            .bind(user_key)
            .bind(project)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_project(&self, user_key: &str, project: &str) -> StorageResult<bool> {
        let mut tx = self.db.begin().await?;
        let objects = sqlx::query("DELETE FROM objects WHERE user_key = ? AND project = ?")
            .bind(user_key)
            .bind(project)
            .execute(&mut *tx)
            .await?;
        let projects = sqlx::query("DELETE FROM projects WHERE user_key = ? AND safe_name = ?")
            .bind(user_key)
            .bind(project)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(objects.rows_affected() + projects.rows_affected() > 0)
    }

    async fn mark_project_used(
        &self,
        user_key: &str,
        project: &str,
        used: bool,
    ) -> StorageResult<Option<ProjectRecord>> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, ProjectRecord>(
            "UPDATE projects SET used = ?, last_used_at = ?, updated_at = ?
             WHERE user_key = ? AND safe_name = ?
             RETURNING user_key, safe_name, name, created_at, updated_at, used, last_used_at",
        )
        .bind(used)
        .bind(now)
        .bind(now)
        .bind(user_key)
        .bind(project)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}
