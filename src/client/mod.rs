//! Upload/download client for the media store.
//!
//! `ObjectClient::upload` inspects the source once, picks a transfer mode
//! and runs the whole transfer, retries included, under one deadline.

pub mod error;
pub mod retry;
pub mod source;
pub mod transport;

use crate::models::metadata::TransferMetadata;
use error::TransferError;
use futures::StreamExt;
use retry::{RetryPolicy, send_with_retry};
use source::{TransferSource, prepare};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, info, warn};
use transport::{Endpoint, USER_ID_HEADER, UploadReceipt};

/// Default end-to-end budget for one upload, retries included.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `http://127.0.0.1:3000`.
    pub base_url: String,
    pub user_id: String,
    pub retry: RetryPolicy,
    pub deadline: Duration,
    /// Temp files for the staged fallback go here.
    pub staging_dir: PathBuf,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_id: user_id.into(),
            retry: RetryPolicy::default(),
            deadline: DEFAULT_DEADLINE,
            staging_dir: std::env::temp_dir(),
        }
    }
}

#[derive(Clone)]
pub struct ObjectClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ObjectClient {
    pub fn new(config: ClientConfig) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| TransferError::Terminal(format!("building HTTP client: {err}")))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Upload `source` with `metadata`. Fails fast, before touching the
    /// source, when the metadata has no project name.
    pub async fn upload(
        &self,
        source: TransferSource,
        metadata: &TransferMetadata,
    ) -> Result<UploadReceipt, TransferError> {
        if metadata.project_name().is_none() {
            return Err(TransferError::Validation(
                "metadata must carry a non-empty projectName".into(),
            ));
        }
        let metadata = serde_json::to_string(metadata)
            .map_err(|err| TransferError::Validation(format!("metadata: {err}")))?;

        let deadline = self.config.deadline;
        tokio::time::timeout(deadline, self.upload_inner(source, &metadata))
            .await
            .map_err(|_| {
                warn!(?deadline, "upload deadline exceeded");
                TransferError::DeadlineExceeded(deadline)
            })?
    }

    async fn upload_inner(
        &self,
        source: TransferSource,
        metadata: &str,
    ) -> Result<UploadReceipt, TransferError> {
        let prepared = prepare(source).await?;
        info!(filename = %prepared.filename(), mode = ?prepared.mode(), "starting upload");

        let url = self.url("/objects");
        let endpoint = Endpoint {
            http: &self.http,
            url: &url,
            user_id: &self.config.user_id,
            policy: &self.config.retry,
            staging_dir: &self.config.staging_dir,
        };
        transport::upload(endpoint, prepared, metadata).await
    }

    /// Download an object into `dest`, returning the number of bytes written.
    ///
    /// Bytes land in a temp file next to `dest` that replaces it only once
    /// the body is complete, so a failed download leaves `dest` as it was.
    pub async fn download(
        &self,
        project: &str,
        id: &str,
        dest: &Path,
    ) -> Result<u64, TransferError> {
        let deadline = self.config.deadline;
        tokio::time::timeout(deadline, self.download_inner(project, id, dest))
            .await
            .unwrap_or(Err(TransferError::DeadlineExceeded(deadline)))
    }

    async fn download_inner(&self, project: &str, id: &str, dest: &Path) -> Result<u64, TransferError> {
        let url = self.url(&format!("/objects/{project}/{id}"));
        let response = send_with_retry(&self.config.retry, || {
            let req = self
                .http
                .get(&url)
                .header(USER_ID_HEADER, &self.config.user_id);
            async move { Ok(req) }
        })
        .await?;

        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let partial = tempfile::NamedTempFile::new_in(dir)?;
        let mut file = File::from_std(partial.reopen()?);
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| TransferError::Terminal(format!("download interrupted: {err}")))?;
            if chunk.is_empty() {
                continue;
            }
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        partial.persist(dest).map_err(|err| {
            warn!("failed to move download into {}: {}", dest.display(), err.error);
            TransferError::Io(err.error)
        })?;

        debug!(project, id, written, dest = %dest.display(), "download complete");
        Ok(written)
    }
}
