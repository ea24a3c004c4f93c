//! src/services/storage_service.rs
//!
//! StorageService: ingestion and retrieval of uploaded objects. Payloads
//! live on local disk beneath `base_path/{user}/{project}/{id}_{filename}`;
//! their records live in the metadata store; reads resolve through the
//! TTL-bounded `PathCache`.
//!
//! An ingestion moves through validate → resolve path → write → commit.
//! Nothing touches the filesystem before validation passes, and every file
//! created along the way is owned by a guard that removes it on any exit
//! that does not end in a committed record.

use crate::models::{
    metadata::TransferMetadata,
    object::{ObjectKind, ObjectRecord},
    project::ProjectRecord,
};
use crate::services::{
    metadata_store::MetadataStore,
    path_cache::PathCache,
    sanitize::{is_allowed_extension, sanitize_filename, sanitize_identifier},
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use serde::Serialize;
use sqlx::types::Json;
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Block size for disk writes.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Spool directory (under the base path) for multipart bodies whose file
/// part arrives before the metadata field.
const INCOMING_DIR: &str = ".incoming";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    Validation(String),
    #[error("object `{id}` not found in project `{project}`")]
    ObjectNotFound { project: String, id: String },
    #[error("project `{0}` not found")]
    ProjectNotFound(String),
    #[error("path `{}` escapes the storage directory", .0.display())]
    UnsafePath(PathBuf),
    #[error("upload body interrupted: {0}")]
    BodyRead(#[source] io::Error),
    #[error("failed to write object: {0}")]
    Write(#[source] io::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Owns a file on disk and removes it when dropped, unless disarmed.
///
/// Cleanup runs on every exit path, including a dropped request future.
#[derive(Debug)]
pub struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn retarget(&mut self, path: PathBuf) {
        self.path = path;
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed partial file {}", self.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                "failed to remove partial file {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

/// Bytes written to disk but not yet committed.
#[derive(Debug)]
pub struct SpooledFile {
    file: PartialFile,
    size_bytes: i64,
    etag: String,
}

impl SpooledFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// A validated ingestion, before any I/O.
#[derive(Debug, Clone)]
pub struct IngestPlan {
    pub user_key: String,
    pub project: String,
    pub project_name: String,
    pub kind: ObjectKind,
    pub object_id: String,
    pub filename: String,
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub metadata: TransferMetadata,
}

/// A resolved object ready to be served.
#[derive(Debug, Clone)]
pub struct ResolvedObject {
    pub path: PathBuf,
    pub filename: String,
    pub etag: Option<String>,
}

/// Outcome of a single-object delete. Each half reports independently.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDeleteReport {
    pub object_id: String,
    pub filename: String,
    pub removed_from_disk: bool,
    pub disk_reason: Option<String>,
    pub removed_from_metadata: bool,
}

/// What happened to a project's directory during delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskOutcome {
    Removed,
    Absent,
    Failed,
}

/// Outcome of a project delete.
#[derive(Debug, Serialize)]
pub struct ProjectDeleteReport {
    pub project: String,
    pub disk: DiskOutcome,
    pub existed_in_metadata: bool,
    pub removed_from_metadata: bool,
}

impl ProjectDeleteReport {
    /// Human readable summary, e.g. `metadata removed, files removal failed`.
    pub fn summary(&self) -> String {
        let metadata = match (self.existed_in_metadata, self.removed_from_metadata) {
            (_, false) => "metadata removal failed",
            (true, true) => "metadata removed",
            (false, true) => "metadata not found",
        };
        let disk = match self.disk {
            DiskOutcome::Removed => "files removed",
            DiskOutcome::Absent => "no files on disk",
            DiskOutcome::Failed => "files removal failed",
        };
        format!("{metadata}, {disk}")
    }
}

/// StorageService ties together the payload directory, the metadata store
/// and the path cache. Cheap to clone; handlers receive it as axum state.
#[derive(Clone)]
pub struct StorageService {
    /// Metadata index (user → project → object).
    pub store: Arc<dyn MetadataStore>,

    /// Shared resolution cache.
    pub cache: Arc<PathCache>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl StorageService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        cache: Arc<PathCache>,
        base_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            cache,
            base_path: base_path.into(),
        }
    }

    /// Join a relative path onto the base directory, refusing anything that
    /// could step outside it.
    fn ensure_within_base(&self, relative: &str) -> StorageResult<PathBuf> {
        let rel = Path::new(relative);
        let mut components = rel.components().peekable();
        if components.peek().is_none()
            || !components.all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::UnsafePath(rel.to_path_buf()));
        }
        Ok(self.base_path.join(rel))
    }

    fn project_dir(&self, user_key: &str, project: &str) -> StorageResult<PathBuf> {
        self.ensure_within_base(&format!("{user_key}/{project}"))
    }

    /// Parse the raw metadata blob sent with an upload.
    pub fn parse_metadata(raw: &str) -> StorageResult<TransferMetadata> {
        serde_json::from_str(raw)
            .map_err(|err| StorageError::Validation(format!("metadata is not valid JSON: {err}")))
    }

    /// Validate an upload and decide where it will be stored. No I/O.
    pub fn plan_ingest(
        &self,
        user_key: &str,
        metadata: TransferMetadata,
        raw_filename: &str,
    ) -> StorageResult<IngestPlan> {
        let project_name = metadata
            .project_name()
            .ok_or_else(|| StorageError::Validation("projectName is required in metadata".into()))?
            .to_string();
        Self::check_filename(raw_filename)?;

        let filename = sanitize_filename(raw_filename);
        let project = sanitize_identifier(&project_name);
        if project.is_empty() {
            return Err(StorageError::Validation(
                "projectName has no usable characters".into(),
            ));
        }

        let object_id = Uuid::new_v4().to_string();
        let relative_path = format!("{user_key}/{project}/{object_id}_{filename}");
        let absolute_path = self.ensure_within_base(&relative_path)?;

        Ok(IngestPlan {
            user_key: user_key.to_string(),
            project,
            project_name,
            kind: metadata.kind.unwrap_or(ObjectKind::Video),
            object_id,
            filename,
            relative_path,
            absolute_path,
            metadata,
        })
    }

    /// Filename checks that can run before the metadata is known.
    pub fn check_filename(raw_filename: &str) -> StorageResult<()> {
        if raw_filename.trim().is_empty() {
            return Err(StorageError::Validation("filename is empty".into()));
        }
        if !is_allowed_extension(raw_filename) {
            return Err(StorageError::Validation("file type not allowed".into()));
        }
        if sanitize_filename(raw_filename).is_empty() {
            return Err(StorageError::Validation(
                "filename has no usable characters".into(),
            ));
        }
        Ok(())
    }

    /// Stream a body straight into its final location and commit the record.
    pub async fn ingest_stream<S, E>(&self, plan: IngestPlan, stream: S) -> StorageResult<ObjectRecord>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let dir = plan
            .absolute_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::UnsafePath(plan.absolute_path.clone()))?;
        let spooled = self.spool(&dir, stream).await?;
        self.ingest_spooled(plan, spooled).await
    }

    /// Spool a body whose destination is not known yet.
    pub async fn spool_incoming<S, E>(&self, stream: S) -> StorageResult<SpooledFile>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let dir = self.base_path.join(INCOMING_DIR);
        self.spool(&dir, stream).await
    }

    /// Move spooled bytes into the planned location and commit the record.
    pub async fn ingest_spooled(
        &self,
        plan: IngestPlan,
        mut spooled: SpooledFile,
    ) -> StorageResult<ObjectRecord> {
        if spooled.path() != plan.absolute_path.as_path() {
            if let Some(parent) = plan.absolute_path.parent() {
                fs::create_dir_all(parent).await.map_err(StorageError::Write)?;
            }
            fs::rename(spooled.path(), &plan.absolute_path)
                .await
                .map_err(StorageError::Write)?;
            spooled.file.retarget(plan.absolute_path.clone());
        }

        let record = build_record(&plan, &spooled);
        if let Err(err) = self.store.commit_object(&plan.project_name, &record).await {
            error!(
                user_key = %plan.user_key,
                project = %plan.project,
                id = %plan.object_id,
                "failed to commit object record: {}",
                err
            );
            // `spooled` drops here and takes the file with it.
            return Err(err);
        }
        spooled.file.disarm();

        info!(
            user_key = %record.user_key,
            project = %record.project,
            id = %record.id,
            size_bytes = record.size_bytes,
            "object stored"
        );
        Ok(record)
    }

    /// Write a stream into a fresh temp file under `dir`, in `CHUNK_SIZE`
    /// blocks, measuring size and MD5 of what actually landed on disk.
    async fn spool<S, E>(&self, dir: &Path, stream: S) -> StorageResult<SpooledFile>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        fs::create_dir_all(dir).await.map_err(StorageError::Write)?;
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let file = File::create(&tmp_path).await.map_err(StorageError::Write)?;
        let guard = PartialFile::new(tmp_path);
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = chunk_res
                .map_err(|err| StorageError::BodyRead(io::Error::other(err)))?;
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            writer.write_all(&chunk).await.map_err(StorageError::Write)?;
        }
        writer.flush().await.map_err(StorageError::Write)?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(StorageError::Write)?;

        Ok(SpooledFile {
            file: guard,
            size_bytes,
            etag: format!("{:x}", digest.compute()),
        })
    }

    /// Resolve an object through the cache and check its payload exists.
    pub async fn resolve_object(
        &self,
        user_key: &str,
        project_raw: &str,
        id: &str,
    ) -> StorageResult<ResolvedObject> {
        let project = sanitize_identifier(project_raw);
        let not_found = || StorageError::ObjectNotFound {
            project: project.clone(),
            id: id.to_string(),
        };

        let resolved = self
            .cache
            .resolve(&*self.store, user_key, &project, id)
            .await?
            .ok_or_else(not_found)?;
        let path = self.ensure_within_base(&resolved.path)?;

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(not_found()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("payload missing on disk for {}", path.display());
                return Err(not_found());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        Ok(ResolvedObject {
            path,
            filename: resolved.filename,
            etag: resolved.etag,
        })
    }

    /// Resolve and open an object for streaming out.
    pub async fn open_object(
        &self,
        user_key: &str,
        project_raw: &str,
        id: &str,
    ) -> StorageResult<(ResolvedObject, File)> {
        let resolved = self.resolve_object(user_key, project_raw, id).await?;
        let file = File::open(&resolved.path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    project: sanitize_identifier(project_raw),
                    id: id.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok((resolved, file))
    }

    /// Delete one object: payload first, then record, then cache entries.
    ///
    /// Either half may fail independently; the report says which.
    pub async fn delete_object(
        &self,
        user_key: &str,
        project_raw: &str,
        id: &str,
    ) -> StorageResult<ObjectDeleteReport> {
        let project = sanitize_identifier(project_raw);
        let record = self
            .store
            .find_object(user_key, &project, id)
            .await?
            .ok_or_else(|| StorageError::ObjectNotFound {
                project: project.clone(),
                id: id.to_string(),
            })?;

        let (removed_from_disk, disk_reason) = if record.storage_path.is_empty() {
            (false, Some("record has no storage path".to_string()))
        } else {
            let path = self.ensure_within_base(&record.storage_path)?;
            match fs::remove_file(&path).await {
                Ok(()) => {
                    info!("removed payload {}", path.display());
                    (true, None)
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    info!("payload {} already absent", path.display());
                    (false, Some("file was already absent".to_string()))
                }
                Err(err) => {
                    error!("failed to remove payload {}: {}", path.display(), err);
                    (false, Some("failed to remove file from disk".to_string()))
                }
            }
        };

        let removed_from_metadata = match self.store.delete_object(user_key, &project, id).await {
            Ok(_) => true,
            Err(err) => {
                error!(user_key, project = %project, id, "failed to remove record: {}", err);
                false
            }
        };

        self.cache.purge_project(user_key, &project);

        Ok(ObjectDeleteReport {
            object_id: id.to_string(),
            filename: record.filename,
            removed_from_disk,
            disk_reason,
            removed_from_metadata,
        })
    }

    /// Delete a whole project: directory, records, cache entries, and the
    /// user directory if that leaves it empty.
    pub async fn delete_project(
        &self,
        user_key: &str,
        project_raw: &str,
    ) -> StorageResult<ProjectDeleteReport> {
        let project = sanitize_identifier(project_raw);
        if project.is_empty() {
            return Err(StorageError::Validation("project name has no usable characters".into()));
        }
        let project_dir = self.project_dir(user_key, &project)?;

        let disk = match fs::remove_dir_all(&project_dir).await {
            Ok(()) => {
                info!("removed project directory {}", project_dir.display());
                DiskOutcome::Removed
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("project directory {} not found", project_dir.display());
                DiskOutcome::Absent
            }
            Err(err) => {
                error!(
                    "failed to remove project directory {}: {}",
                    project_dir.display(),
                    err
                );
                DiskOutcome::Failed
            }
        };

        let (existed_in_metadata, removed_from_metadata) =
            match self.store.delete_project(user_key, &project).await {
                Ok(existed) => (existed, true),
                Err(err) => {
                    error!(user_key, project = %project, "failed to remove project records: {}", err);
                    (true, false)
                }
            };

        self.cache.purge_project(user_key, &project);

        if let Some(user_dir) = project_dir.parent() {
            self.prune_empty_dirs(user_dir, &self.base_path).await;
        }

        Ok(ProjectDeleteReport {
            project,
            disk,
            existed_in_metadata,
            removed_from_metadata,
        })
    }

    /// Flag a project as used (or not) downstream.
    pub async fn mark_project_used(
        &self,
        user_key: &str,
        project_raw: &str,
        used: bool,
    ) -> StorageResult<ProjectRecord> {
        let project = sanitize_identifier(project_raw);
        self.store
            .mark_project_used(user_key, &project, used)
            .await?
            .ok_or(StorageError::ProjectNotFound(project))
    }

    /// Recursively remove empty directories up to (not including) `stop`.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

fn build_record(plan: &IngestPlan, spooled: &SpooledFile) -> ObjectRecord {
    let meta = &plan.metadata;
    let title = match plan.kind {
        ObjectKind::Video => meta.title.clone().or_else(|| Some(plan.filename.clone())),
        ObjectKind::Files => meta.title.clone(),
    };

    ObjectRecord {
        user_key: plan.user_key.clone(),
        project: plan.project.clone(),
        id: plan.object_id.clone(),
        kind: plan.kind,
        filename: plan.filename.clone(),
        storage_path: plan.relative_path.clone(),
        uploaded_at: Utc::now(),
        size_bytes: spooled.size_bytes,
        etag: Some(spooled.etag.clone()),
        status: plan.kind.initial_status().to_string(),
        title,
        description: meta.description.clone(),
        tags: Json(meta.tags.clone()),
        start_time: meta.start_time.clone(),
        end_time: meta.end_time.clone(),
        thumbnail_url: meta.thumbnail_url.clone(),
        extra: Json(meta.extra.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::metadata_store::test_support::memory_store;
    use futures::stream;
    use tempfile::TempDir;

    async fn service() -> (StorageService, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(memory_store().await);
        let svc = StorageService::new(store, Arc::new(PathCache::default()), dir.path());
        (svc, dir)
    }

    fn chunks(data: &[u8], size: usize) -> impl Stream<Item = Result<Bytes, io::Error>> + Send {
        let parts: Vec<Result<Bytes, io::Error>> = data
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(parts)
    }

    fn count_files(root: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(root) else {
            return 0;
        };
        entries
            .flatten()
            .map(|e| {
                let p = e.path();
                if p.is_dir() { count_files(&p) } else { 1 }
            })
            .sum()
    }

    #[tokio::test]
    async fn ingest_reassembles_blocks_in_order() {
        let (svc, _dir) = service().await;
        let data: Vec<u8> = (0..(3 * CHUNK_SIZE + 123)).map(|i| (i % 251) as u8).collect();

        let plan = svc
            .plan_ingest("u123", TransferMetadata::files("Highlights"), "clip.mp4")
            .unwrap();
        let record = svc.ingest_stream(plan, chunks(&data, 64 * 1024)).await.unwrap();

        assert_eq!(record.size_bytes, data.len() as i64);
        assert_eq!(
            record.storage_path,
            format!("u123/Highlights/{}_clip.mp4", record.id)
        );
        let on_disk = std::fs::read(svc.base_path.join(&record.storage_path)).unwrap();
        assert_eq!(on_disk, data);
        assert_eq!(record.etag.as_deref(), Some(format!("{:x}", md5::compute(&data)).as_str()));
    }

    #[tokio::test]
    async fn same_filename_never_collides() {
        let (svc, _dir) = service().await;
        let mut paths = Vec::new();
        for body in [b"one".as_slice(), b"two".as_slice()] {
            let plan = svc
                .plan_ingest("u123", TransferMetadata::files("P"), "clip.mp4")
                .unwrap();
            let rec = svc.ingest_stream(plan, chunks(body, 2)).await.unwrap();
            paths.push(rec.storage_path);
        }
        assert_ne!(paths[0], paths[1]);
    }

    #[tokio::test]
    async fn validation_failures_touch_nothing() {
        let (svc, dir) = service().await;

        let err = svc
            .plan_ingest("u123", TransferMetadata::default(), "clip.mp4")
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));

        let err = svc
            .plan_ingest("u123", TransferMetadata::files("P"), "tool.exe")
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));

        let err = svc
            .plan_ingest("u123", TransferMetadata::files("!!!"), "clip.mp4")
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));

        assert!(StorageService::parse_metadata("{not json").is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn interrupted_body_leaves_no_partial_file() {
        let (svc, dir) = service().await;
        let plan = svc
            .plan_ingest("u123", TransferMetadata::files("P"), "clip.mp4")
            .unwrap();
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"first block")),
            Err(io::Error::new(ErrorKind::ConnectionReset, "peer went away")),
        ]);

        let err = svc.ingest_stream(plan, body).await.unwrap_err();
        assert!(matches!(err, StorageError::BodyRead(_)));
        assert_eq!(count_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn resolve_after_ingest_hits_store_then_cache() {
        let (svc, _dir) = service().await;
        let plan = svc
            .plan_ingest("u123", TransferMetadata::video("Highlights"), "clip.mp4")
            .unwrap();
        let rec = svc.ingest_stream(plan, chunks(b"video", 2)).await.unwrap();
        assert_eq!(rec.status, "UPLOADED");
        assert_eq!(rec.title.as_deref(), Some("clip.mp4"));

        let resolved = svc.resolve_object("u123", "Highlights", &rec.id).await.unwrap();
        assert_eq!(resolved.filename, "clip.mp4");
        assert_eq!(svc.cache.len(), 1);

        let err = svc.resolve_object("u999", "Highlights", &rec.id).await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn delete_purges_cache_and_reports_each_half() {
        let (svc, _dir) = service().await;
        let plan = svc
            .plan_ingest("u123", TransferMetadata::files("Highlights"), "clip.mp4")
            .unwrap();
        let rec = svc.ingest_stream(plan, chunks(b"bytes", 2)).await.unwrap();
        svc.resolve_object("u123", "Highlights", &rec.id).await.unwrap();
        assert_eq!(svc.cache.len(), 1);

        let report = svc.delete_object("u123", "Highlights", &rec.id).await.unwrap();
        assert!(report.removed_from_disk);
        assert!(report.removed_from_metadata);
        assert!(svc.cache.is_empty());

        let err = svc.resolve_object("u123", "Highlights", &rec.id).await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn delete_tolerates_missing_payload() {
        let (svc, _dir) = service().await;
        let plan = svc
            .plan_ingest("u123", TransferMetadata::files("P"), "clip.mp4")
            .unwrap();
        let rec = svc.ingest_stream(plan, chunks(b"x", 1)).await.unwrap();
        std::fs::remove_file(svc.base_path.join(&rec.storage_path)).unwrap();

        let report = svc.delete_object("u123", "P", &rec.id).await.unwrap();
        assert!(!report.removed_from_disk);
        assert!(report.disk_reason.is_some());
        assert!(report.removed_from_metadata);
    }

    #[tokio::test]
    async fn project_delete_clears_everything() {
        let (svc, dir) = service().await;
        let plan = svc
            .plan_ingest("u123", TransferMetadata::files("Highlights"), "clip.mp4")
            .unwrap();
        let rec = svc.ingest_stream(plan, chunks(b"bytes", 2)).await.unwrap();
        svc.resolve_object("u123", "Highlights", &rec.id).await.unwrap();

        let report = svc.delete_project("u123", "Highlights").await.unwrap();
        assert_eq!(report.disk, DiskOutcome::Removed);
        assert!(report.existed_in_metadata);
        assert_eq!(report.summary(), "metadata removed, files removed");
        assert!(svc.cache.is_empty());
        assert!(!dir.path().join("u123").exists());

        let again = svc.delete_project("u123", "Highlights").await.unwrap();
        assert_eq!(again.summary(), "metadata not found, no files on disk");
    }

    #[tokio::test]
    async fn spooled_upload_moves_into_place() {
        let (svc, dir) = service().await;
        let spooled = svc.spool_incoming(chunks(b"early file part", 4)).await.unwrap();
        assert!(spooled.path().starts_with(dir.path().join(INCOMING_DIR)));

        let plan = svc
            .plan_ingest("u123", TransferMetadata::files("P"), "notes.txt")
            .unwrap();
        let rec = svc.ingest_spooled(plan, spooled).await.unwrap();
        assert_eq!(
            std::fs::read(dir.path().join(&rec.storage_path)).unwrap(),
            b"early file part"
        );
        assert_eq!(count_files(&dir.path().join(INCOMING_DIR)), 0);
    }

    #[tokio::test]
    async fn dropped_spool_is_cleaned_up() {
        let (svc, dir) = service().await;
        let spooled = svc.spool_incoming(chunks(b"orphan", 3)).await.unwrap();
        let path = spooled.path().to_path_buf();
        assert!(path.exists());
        drop(spooled);
        assert!(!path.exists());
        assert_eq!(count_files(dir.path()), 0);
    }

    #[test]
    fn paths_outside_base_are_refused() {
        let svc = StorageService {
            store: Arc::new(NeverStore),
            cache: Arc::new(PathCache::default()),
            base_path: PathBuf::from("/srv/objects"),
        };
        for bad in ["../etc/passwd", "/etc/passwd", "u/../../x", "", "./x"] {
            assert!(
                matches!(svc.ensure_within_base(bad), Err(StorageError::UnsafePath(_))),
                "{bad:?}"
            );
        }
        assert_eq!(
            svc.ensure_within_base("u/p/id_clip.mp4").unwrap(),
            PathBuf::from("/srv/objects/u/p/id_clip.mp4")
        );
    }

    struct NeverStore;

    #[async_trait::async_trait]
    impl MetadataStore for NeverStore {
        async fn find_object(&self, _: &str, _: &str, _: &str) -> StorageResult<Option<ObjectRecord>> {
            Ok(None)
        }
        async fn commit_object(&self, _: &str, _: &ObjectRecord) -> StorageResult<()> {
            Ok(())
        }
        async fn delete_object(&self, _: &str, _: &str, _: &str) -> StorageResult<bool> {
            Ok(false)
        }
        async fn delete_project(&self, _: &str, _: &str) -> StorageResult<bool> {
            Ok(false)
        }
        async fn mark_project_used(
            &self,
            _: &str,
            _: &str,
            _: bool,
        ) -> StorageResult<Option<ProjectRecord>> {
            Ok(None)
        }
        async fn ping(&self) -> StorageResult<()> {
            Ok(())
        }
    }
}
