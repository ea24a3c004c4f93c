//! Upload sources and transfer-mode selection.
//!
//! A caller hands over a `TransferSource`; `prepare` inspects it once and
//! yields a `PreparedSource` that fixes the transfer mode. Nothing after
//! that point probes the source again.

use super::error::TransferError;
use std::{
    fmt,
    io::SeekFrom,
    path::{Path, PathBuf},
};
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};
use tracing::debug;

/// A byte source that can be repositioned.
pub trait SeekableRead: AsyncRead + AsyncSeek + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Sync + Unpin> SeekableRead for T {}

/// A byte source that can only be read forward once.
pub type ForwardRead = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// What the caller wants uploaded.
pub enum TransferSource {
    /// A file on local disk. Always sent as multipart.
    FilePath(PathBuf),
    /// A stream that claims to support seeking.
    SeekableStream(Box<dyn SeekableRead>),
    /// A stream that can only be read once.
    NonSeekableStream(ForwardRead),
    /// Any source with an explicit upload filename. Mode selection is the
    /// same as for the wrapped source.
    Named {
        source: Box<TransferSource>,
        filename: String,
    },
}

impl TransferSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        TransferSource::FilePath(path.into())
    }

    pub fn seekable(reader: impl SeekableRead + 'static) -> Self {
        TransferSource::SeekableStream(Box::new(reader))
    }

    pub fn forward_only(reader: impl AsyncRead + Send + Sync + Unpin + 'static) -> Self {
        TransferSource::NonSeekableStream(Box::new(reader))
    }

    /// Attach an explicit filename.
    pub fn named(self, filename: impl Into<String>) -> Self {
        let source = match self {
            TransferSource::Named { source, .. } => source,
            other => Box::new(other),
        };
        TransferSource::Named {
            source,
            filename: filename.into(),
        }
    }
}

impl fmt::Debug for TransferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferSource::FilePath(path) => f.debug_tuple("FilePath").field(path).finish(),
            TransferSource::SeekableStream(_) => f.write_str("SeekableStream"),
            TransferSource::NonSeekableStream(_) => f.write_str("NonSeekableStream"),
            TransferSource::Named { source, filename } => f
                .debug_struct("Named")
                .field("source", source)
                .field("filename", filename)
                .finish(),
        }
    }
}

/// How the bytes go over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// `multipart/form-data` with a declared part length. Replayable.
    Multipart,
    /// Raw body with chunked transfer encoding. Single attempt.
    RawChunked,
    /// Remainder staged on disk after a failed `RawChunked` attempt, then
    /// sent as multipart. Never chosen up front.
    StagedFallback,
}

/// A source after inspection, with its transfer mode decided.
pub enum PreparedSource {
    File {
        path: PathBuf,
        filename: String,
        len: u64,
    },
    Seekable {
        reader: Box<dyn SeekableRead>,
        filename: String,
        /// Position the upload starts from; restored before each attempt.
        start: u64,
        len: u64,
    },
    Chunked {
        reader: ForwardRead,
        filename: String,
    },
}

impl PreparedSource {
    pub fn mode(&self) -> TransferMode {
        match self {
            PreparedSource::File { .. } | PreparedSource::Seekable { .. } => TransferMode::Multipart,
            PreparedSource::Chunked { .. } => TransferMode::RawChunked,
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            PreparedSource::File { filename, .. }
            | PreparedSource::Seekable { filename, .. }
            | PreparedSource::Chunked { filename, .. } => filename,
        }
    }
}

impl fmt::Debug for PreparedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedSource")
            .field("mode", &self.mode())
            .field("filename", &self.filename())
            .finish()
    }
}

/// Inspect a source and decide how to send it.
///
/// Paths go multipart. Streams go multipart only if their length can be
/// probed by seeking to the end and back; any probe failure falls back to
/// raw chunked. Streams need a filename, either from `Named` or not at all.
pub async fn prepare(source: TransferSource) -> Result<PreparedSource, TransferError> {
    let (source, filename) = match source {
        TransferSource::Named { source, filename } => (*source, Some(filename)),
        other => (other, None),
    };

    match source {
        TransferSource::FilePath(path) => {
            let filename = match filename {
                Some(name) => name,
                None => file_name_of(&path)?,
            };
            let meta = tokio::fs::metadata(&path).await?;
            if !meta.is_file() {
                return Err(TransferError::Validation(format!(
                    "{} is not a regular file",
                    path.display()
                )));
            }
            Ok(PreparedSource::File {
                path,
                filename,
                len: meta.len(),
            })
        }
        TransferSource::SeekableStream(mut reader) => {
            let filename = require_filename(filename)?;
            match probe_length(&mut reader).await {
                Ok((start, len)) => Ok(PreparedSource::Seekable {
                    reader,
                    filename,
                    start,
                    len,
                }),
                Err(ProbeFailure::Unmoved(err)) => {
                    debug!("length probe failed ({err}), sending as raw chunked");
                    Ok(PreparedSource::Chunked {
                        reader: Box::new(reader),
                        filename,
                    })
                }
                Err(ProbeFailure::Lost(err)) => Err(TransferError::Terminal(format!(
                    "stream position could not be restored after probing: {err}"
                ))),
            }
        }
        TransferSource::NonSeekableStream(reader) => Ok(PreparedSource::Chunked {
            reader,
            filename: require_filename(filename)?,
        }),
        TransferSource::Named { .. } => Err(TransferError::Validation(
            "nested named sources are not supported".into(),
        )),
    }
}

enum ProbeFailure {
    /// The read position is where it was before the probe.
    Unmoved(std::io::Error),
    /// The position may have moved and could not be put back.
    Lost(std::io::Error),
}

/// Returns `(current position, remaining length)`, leaving the position as
/// it was found.
async fn probe_length(reader: &mut Box<dyn SeekableRead>) -> Result<(u64, u64), ProbeFailure> {
    let start = reader.stream_position().await.map_err(ProbeFailure::Unmoved)?;
    let end = match reader.seek(SeekFrom::End(0)).await {
        Ok(end) => end,
        Err(err) => {
            // A failed seek may still have moved the cursor.
            return match reader.seek(SeekFrom::Start(start)).await {
                Ok(_) => Err(ProbeFailure::Unmoved(err)),
                Err(_) => Err(ProbeFailure::Lost(err)),
            };
        }
    };
    reader
        .seek(SeekFrom::Start(start))
        .await
        .map_err(ProbeFailure::Lost)?;
    Ok((start, end.saturating_sub(start)))
}

fn file_name_of(path: &Path) -> Result<String, TransferError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            TransferError::Validation(format!("cannot infer a filename from {}", path.display()))
        })
}

fn require_filename(filename: Option<String>) -> Result<String, TransferError> {
    filename
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| TransferError::Validation("stream sources need an explicit filename".into()))
}
