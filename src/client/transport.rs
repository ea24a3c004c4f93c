//! Wire encodings for an upload: multipart (replayable, retried) and raw
//! chunked (single shot), plus the staged fallback that turns a failed
//! chunked attempt into a multipart upload from a temp file.

use super::{
    error::TransferError,
    retry::{RetryPolicy, send_with_retry},
    source::{ForwardRead, PreparedSource, SeekableRead, TransferMode},
};
use bytes::Bytes;
use futures::{Stream, stream};
use reqwest::{
    Body, Client, RequestBuilder, Response, StatusCode,
    header::CONTENT_TYPE,
    multipart::{Form, Part},
};
use serde_json::Value;
use std::{
    io::{self, SeekFrom},
    path::Path,
    sync::Arc,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Block size for streamed request bodies.
pub const CHUNK_SIZE: usize = 1024 * 1024;

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const FILENAME_HEADER: &str = "X-Filename";
pub const METADATA_HEADER: &str = "X-Metadata";

/// Where and as whom to upload.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint<'a> {
    pub http: &'a Client,
    pub url: &'a str,
    pub user_id: &'a str,
    pub policy: &'a RetryPolicy,
    /// Where the staged fallback writes its temp file.
    pub staging_dir: &'a Path,
}

/// A successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub object_id: String,
    pub filename: String,
    pub mode: TransferMode,
    pub status: u16,
}

/// Send a prepared source with the mode it was prepared for.
pub async fn upload(
    endpoint: Endpoint<'_>,
    source: PreparedSource,
    metadata: &str,
) -> Result<UploadReceipt, TransferError> {
    match source {
        PreparedSource::File {
            path,
            filename,
            len,
        } => upload_file(endpoint, &path, &filename, len, metadata, TransferMode::Multipart).await,
        PreparedSource::Seekable {
            reader,
            filename,
            start,
            len,
        } => upload_seekable(endpoint, reader, &filename, start, len, metadata).await,
        PreparedSource::Chunked { reader, filename } => {
            upload_chunked(endpoint, reader, &filename, metadata).await
        }
    }
}

/// Multipart from a file, reopened on every attempt.
async fn upload_file(
    endpoint: Endpoint<'_>,
    path: &Path,
    filename: &str,
    len: u64,
    metadata: &str,
    mode: TransferMode,
) -> Result<UploadReceipt, TransferError> {
    let response = send_with_retry(endpoint.policy, move || async move {
        let file = File::open(path).await?;
        let body = Body::wrap_stream(ReaderStream::with_capacity(file, CHUNK_SIZE));
        multipart_request(endpoint, body, len, filename, metadata)
    })
    .await?;
    receipt(response, filename, mode).await
}

/// A seekable reader shared across attempts. Each attempt bumps
/// `generation`; a body left over from an earlier attempt stops reading.
struct ReplayState {
    reader: Box<dyn SeekableRead>,
    generation: u64,
}

/// Multipart from a seekable stream, rewound to `start` before every
/// attempt.
async fn upload_seekable(
    endpoint: Endpoint<'_>,
    reader: Box<dyn SeekableRead>,
    filename: &str,
    start: u64,
    len: u64,
    metadata: &str,
) -> Result<UploadReceipt, TransferError> {
    let shared = Arc::new(Mutex::new(ReplayState {
        reader,
        generation: 0,
    }));
    let response = send_with_retry(endpoint.policy, move || {
        let shared = shared.clone();
        async move {
            let generation = {
                let mut state = shared.lock().await;
                state.generation += 1;
                state.reader.seek(SeekFrom::Start(start)).await?;
                state.generation
            };
            let body = Body::wrap_stream(replay_body(shared, generation, len));
            multipart_request(endpoint, body, len, filename, metadata)
        }
    })
    .await?;
    receipt(response, filename, TransferMode::Multipart).await
}

/// Exactly `len` bytes from the shared reader, in `CHUNK_SIZE` blocks.
fn replay_body(
    shared: Arc<Mutex<ReplayState>>,
    generation: u64,
    len: u64,
) -> impl Stream<Item = io::Result<Bytes>> + Send + Sync {
    stream::unfold(Some((shared, len)), move |step| async move {
        let (shared, remaining) = step?;
        if remaining == 0 {
            return None;
        }
        let mut state = shared.lock().await;
        if state.generation != generation {
            return Some((Err(io::Error::other("superseded by a newer attempt")), None));
        }
        let mut buf = vec![0u8; remaining.min(CHUNK_SIZE as u64) as usize];
        match state.reader.read(&mut buf).await {
            Ok(0) => Some((
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended before its probed length",
                )),
                None,
            )),
            Ok(n) => {
                drop(state);
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some((shared, remaining - n as u64))))
            }
            Err(err) => Some((Err(err), None)),
        }
    })
}

/// Content-type hint on the file part. The server infers the real type
/// from the extension on download.
const FILE_PART_MIME: &str = "video/mp4";

fn multipart_request(
    endpoint: Endpoint<'_>,
    body: Body,
    len: u64,
    filename: &str,
    metadata: &str,
) -> Result<RequestBuilder, TransferError> {
    let part = Part::stream_with_length(body, len)
        .file_name(filename.to_string())
        .mime_str(FILE_PART_MIME)
        .map_err(|err| TransferError::Validation(err.to_string()))?;
    // Metadata first, so the server can validate before writing any bytes.
    let form = Form::new()
        .text("metadata", metadata.to_string())
        .part("file", part);
    Ok(endpoint
        .http
        .post(endpoint.url)
        .header(USER_ID_HEADER, endpoint.user_id)
        .multipart(form))
}

/// State shared between a chunked body and the code that may need the
/// reader back after the attempt fails.
struct ChunkedState {
    reader: Option<ForwardRead>,
    consumed: u64,
}

/// Read `CHUNK_SIZE` blocks from the shared reader until a read returns
/// zero bytes. A read error ends the body with that error.
fn chunked_body(
    state: Arc<Mutex<ChunkedState>>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + Sync {
    stream::unfold(Some(state), |state| async move {
        let state = state?;
        let mut guard = state.lock().await;
        let reader = guard.reader.as_mut()?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                guard.consumed += n as u64;
                drop(guard);
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(state)))
            }
            Err(err) => Some((Err(err), None)),
        }
    })
}

/// Raw chunked upload: one attempt, since the source cannot be replayed.
/// Transport-level failures hand over to the staged fallback.
async fn upload_chunked(
    endpoint: Endpoint<'_>,
    reader: ForwardRead,
    filename: &str,
    metadata: &str,
) -> Result<UploadReceipt, TransferError> {
    let state = Arc::new(Mutex::new(ChunkedState {
        reader: Some(reader),
        consumed: 0,
    }));
    let metadata_header = ascii_json(metadata);

    let attempt = send_with_retry(&endpoint.policy.once(), || {
        let body = Body::wrap_stream(chunked_body(state.clone()));
        let request = endpoint
            .http
            .post(endpoint.url)
            .header(USER_ID_HEADER, endpoint.user_id)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(FILENAME_HEADER, filename)
            .header(METADATA_HEADER, metadata_header.as_str())
            .body(body);
        async move { Ok(request) }
    })
    .await;

    let err = match attempt {
        Ok(response) => return receipt(response, filename, TransferMode::RawChunked).await,
        Err(err) if err.is_server_verdict() => return Err(err),
        Err(err) => err,
    };

    let (reader, consumed) = {
        let mut guard = state.lock().await;
        (guard.reader.take(), guard.consumed)
    };
    if consumed > 0 {
        return Err(TransferError::SourceExhausted {
            consumed,
            reason: err.to_string(),
        });
    }
    let Some(reader) = reader else {
        return Err(err);
    };

    warn!(%filename, "raw chunked upload failed ({err}), staging to disk");
    staged_fallback(endpoint, reader, filename, metadata).await
}

/// Drain what is left of the source into a temp file, then upload that
/// file as multipart. The temp file is removed when this returns.
async fn staged_fallback(
    endpoint: Endpoint<'_>,
    mut reader: ForwardRead,
    filename: &str,
    metadata: &str,
) -> Result<UploadReceipt, TransferError> {
    let staging = tempfile::NamedTempFile::new_in(endpoint.staging_dir)?;
    let mut file = File::from_std(staging.reopen()?);
    let len = tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    drop(file);
    debug!(len, path = %staging.path().display(), "source staged");

    upload_file(
        endpoint,
        staging.path(),
        filename,
        len,
        metadata,
        TransferMode::StagedFallback,
    )
    .await
}

/// JSON with every non-ASCII character written as a `\uXXXX` escape, so
/// it travels as a plain ASCII header value. JSON syntax is ASCII, so only
/// string contents change, and they decode to the same text.
fn ascii_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut units = [0u16; 2];
    for ch in json.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

/// Accept 200/201 with a JSON body naming the object under `video_id` or
/// `item_id`. Anything else is a failure; the id is never guessed.
async fn receipt(
    response: Response,
    filename: &str,
    mode: TransferMode,
) -> Result<UploadReceipt, TransferError> {
    let status = response.status();
    if status != StatusCode::OK && status != StatusCode::CREATED {
        return Err(TransferError::InvalidResponse(format!(
            "unexpected status {status}"
        )));
    }
    let body = response
        .bytes()
        .await
        .map_err(|err| TransferError::InvalidResponse(err.to_string()))?;
    let value: Value = serde_json::from_slice(&body)
        .map_err(|err| TransferError::InvalidResponse(format!("body is not JSON: {err}")))?;
    let object_id = ["video_id", "item_id"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| TransferError::InvalidResponse("no object id in response".into()))?
        .to_string();

    info!(%object_id, %filename, ?mode, "upload complete");
    Ok(UploadReceipt {
        object_id,
        filename: filename.to_string(),
        mode,
        status: status.as_u16(),
    })
}
