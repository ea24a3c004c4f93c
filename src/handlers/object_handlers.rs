//! HTTP handlers for object ingestion and retrieval.
//! Streams bodies in both directions and delegates storage concerns to
//! `StorageService`.

use crate::{
    errors::{AppError, CLIENT_CLOSED_REQUEST},
    handlers::extract::UserKey,
    models::{metadata::TransferMetadata, object::{ObjectKind, ObjectRecord}},
    services::storage_service::{
        CHUNK_SIZE, ResolvedObject, SpooledFile, StorageService,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::Stream;
use serde_json::json;
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Raw uploads carry the filename here.
pub const FILENAME_HEADER: &str = "x-filename";

/// Raw uploads carry the JSON metadata blob here.
pub const METADATA_HEADER: &str = "x-metadata";

/// Extensions served inline by the content endpoint, with their MIME type.
const TEXT_CONTENT_TYPES: [(&str, &str); 5] = [
    ("txt", "text/plain; charset=utf-8"),
    ("md", "text/plain; charset=utf-8"),
    ("log", "text/plain; charset=utf-8"),
    ("json", "application/json"),
    ("csv", "text/csv; charset=utf-8"),
];

/// `POST /objects`
///
/// Accepts either a multipart form (`file` + `metadata`) or a raw body with
/// `X-Filename` / `X-Metadata` headers, chosen by `Content-Type`.
pub async fn upload_object(
    State(service): State<StorageService>,
    UserKey(user_key): UserKey,
    request: Request,
) -> Result<Response, AppError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"));

    let (record, project_name) = if is_multipart {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|err| AppError::bad_request(err.body_text()))?;
        ingest_multipart(&service, &user_key, multipart).await?
    } else {
        ingest_raw(&service, &user_key, request).await?
    };

    Ok(upload_response(&record, &project_name))
}

async fn ingest_raw(
    service: &StorageService,
    user_key: &str,
    request: Request,
) -> Result<(ObjectRecord, String), AppError> {
    let headers = request.headers();
    let filename = header_str(headers, FILENAME_HEADER)
        .ok_or_else(|| AppError::bad_request("X-Filename header is required"))?
        .to_string();
    let metadata = header_str(headers, METADATA_HEADER)
        .ok_or_else(|| AppError::bad_request("X-Metadata header is required"))
        .and_then(|raw| StorageService::parse_metadata(raw).map_err(AppError::from))?;

    let plan = service.plan_ingest(user_key, metadata, &filename)?;
    let project_name = plan.project_name.clone();
    debug!(user_key, project = %plan.project, id = %plan.object_id, "raw ingestion started");

    let stream = request.into_body().into_data_stream();
    let record = service.ingest_stream(plan, stream).await?;
    Ok((record, project_name))
}

async fn ingest_multipart(
    service: &StorageService,
    user_key: &str,
    mut multipart: Multipart,
) -> Result<(ObjectRecord, String), AppError> {
    let mut metadata: Option<TransferMetadata> = None;
    let mut stored: Option<(ObjectRecord, String)> = None;
    // File part that arrived before the metadata field.
    let mut spooled: Option<(SpooledFile, String)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("metadata") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.body_text()))?;
                metadata = Some(StorageService::parse_metadata(&raw)?);
            }
            Some("file") => {
                if stored.is_some() || spooled.is_some() {
                    return Err(AppError::bad_request("only one file part is accepted"));
                }
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("file part has no filename"))?;

                match &metadata {
                    Some(meta) => {
                        let plan = service.plan_ingest(user_key, meta.clone(), &filename)?;
                        let project_name = plan.project_name.clone();
                        let record = service.ingest_stream(plan, field).await?;
                        stored = Some((record, project_name));
                    }
                    None => {
                        StorageService::check_filename(&filename)?;
                        debug!(user_key, %filename, "file part precedes metadata, spooling");
                        spooled = Some((service.spool_incoming(field).await?, filename));
                    }
                }
            }
            other => debug!("ignoring multipart field {:?}", other),
        }
    }

    if let Some(done) = stored {
        return Ok(done);
    }
    let Some((spool, filename)) = spooled else {
        return Err(AppError::bad_request("file part is required"));
    };
    // Dropping `spool` on any early return removes the spooled bytes.
    let metadata =
        metadata.ok_or_else(|| AppError::bad_request("metadata field is required"))?;
    let plan = service.plan_ingest(user_key, metadata, &filename)?;
    let project_name = plan.project_name.clone();
    let record = service.ingest_spooled(plan, spool).await?;
    Ok((record, project_name))
}

fn upload_response(record: &ObjectRecord, project_name: &str) -> Response {
    let (status, body) = match record.kind {
        ObjectKind::Video => (
            StatusCode::OK,
            json!({
                "item_id": record.id,
                "video_id": record.id,
                "filename": record.filename,
                "project_name": project_name,
            }),
        ),
        ObjectKind::Files => (
            StatusCode::CREATED,
            json!({
                "video_id": record.id,
                "filename": record.filename,
                "project_name": project_name,
                "size_bytes": record.size_bytes,
            }),
        ),
    };

    let mut response = (status, Json(body)).into_response();
    if let Some(etag) = record.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            response.headers_mut().insert(header::ETAG, value);
        }
    }
    response
}

/// `GET /objects/{project}/{id}`: download as an attachment.
pub async fn download_object(
    State(service): State<StorageService>,
    UserKey(user_key): UserKey,
    Path((project, id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (resolved, file) = service.open_object(&user_key, &project, &id).await?;
    serve_file(resolved, file, None, Disposition::Attachment).await
}

/// `GET /objects/{project}/{id}/stream`: same bytes, served inline.
pub async fn stream_object(
    State(service): State<StorageService>,
    UserKey(user_key): UserKey,
    Path((project, id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (resolved, file) = service.open_object(&user_key, &project, &id).await?;
    serve_file(resolved, file, None, Disposition::Inline).await
}

/// `GET /objects/{project}/{id}/preview`
pub async fn preview_object(
    State(service): State<StorageService>,
    UserKey(user_key): UserKey,
    Path((project, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let resolved = service.resolve_object(&user_key, &project, &id).await?;
    Ok(Json(json!({
        "preview_url": format!("/objects/{project}/{id}/stream"),
        "filename": resolved.filename,
    })))
}

/// `GET /objects/{project}/{id}/content`: text-like files inline, the rest
/// as attachments.
pub async fn object_content(
    State(service): State<StorageService>,
    UserKey(user_key): UserKey,
    Path((project, id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (resolved, file) = service.open_object(&user_key, &project, &id).await?;
    match text_content_type(&resolved.filename) {
        Some(ct) => serve_file(resolved, file, Some(ct), Disposition::Inline).await,
        None => serve_file(resolved, file, None, Disposition::Attachment).await,
    }
}

/// `DELETE /objects/{project}/{id}`
pub async fn delete_object(
    State(service): State<StorageService>,
    UserKey(user_key): UserKey,
    Path((project, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let report = service.delete_object(&user_key, &project, &id).await?;
    info!(
        user_key = %user_key,
        project = %project,
        id = %id,
        removed_from_disk = report.removed_from_disk,
        removed_from_metadata = report.removed_from_metadata,
        "object deleted"
    );
    Ok(Json(report))
}

#[derive(Clone, Copy)]
enum Disposition {
    Attachment,
    Inline,
}

async fn serve_file(
    resolved: ResolvedObject,
    file: File,
    content_type: Option<&'static str>,
    disposition: Disposition,
) -> Result<Response, AppError> {
    let length = file.metadata().await.map(|m| m.len()).map_err(|err| {
        warn!("failed to stat {}: {}", resolved.path.display(), err);
        AppError::internal()
    })?;

    let stream = DownloadStream::new(
        ReaderStream::with_capacity(file, CHUNK_SIZE),
        length,
        resolved.filename.clone(),
    );
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let content_type = content_type.unwrap_or_else(|| guess_content_type(&resolved.filename));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    let kind = match disposition {
        Disposition::Attachment => "attachment",
        Disposition::Inline => "inline",
    };
    if let Ok(value) = HeaderValue::from_str(&format!("{kind}; filename=\"{}\"", resolved.filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(etag) = resolved.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    Ok(response)
}

/// Body stream that notices when the client disconnects before the last
/// byte went out. Hyper drops the body in that case; the drop is logged as
/// a client-closed request rather than surfacing as a server fault.
struct DownloadStream<S> {
    inner: S,
    sent: u64,
    expected: u64,
    done: bool,
    filename: String,
}

impl<S> DownloadStream<S> {
    fn new(inner: S, expected: u64, filename: String) -> Self {
        Self {
            inner,
            sent: 0,
            expected,
            done: false,
            filename,
        }
    }
}

impl<S> Stream for DownloadStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => self.sent += chunk.len() as u64,
            Poll::Ready(Some(Err(err))) => {
                warn!(filename = %self.filename, "read failed mid-download: {}", err);
                self.done = true;
            }
            Poll::Ready(None) => self.done = true,
            Poll::Pending => {}
        }
        polled
    }
}

impl<S> Drop for DownloadStream<S> {
    fn drop(&mut self) {
        if !self.done {
            warn!(
                status = CLIENT_CLOSED_REQUEST,
                filename = %self.filename,
                sent = self.sent,
                expected = self.expected,
                "client closed request during download"
            );
        }
    }
}

/// Header value as UTF-8. `HeaderValue::to_str` only admits visible ASCII,
/// which would turn an accented title or filename into a missing header.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| std::str::from_utf8(v.as_bytes()).ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

fn text_content_type(filename: &str) -> Option<&'static str> {
    let ext = extension(filename)?;
    TEXT_CONTENT_TYPES
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, ct)| *ct)
}

fn guess_content_type(filename: &str) -> &'static str {
    match extension(filename).as_deref() {
        Some("mp4") => "video/mp4",
        Some("wav") => "audio/wav",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "jsx") => "text/javascript; charset=utf-8",
        Some("txt" | "md" | "srt" | "ass" | "py" | "ts" | "tsx") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
