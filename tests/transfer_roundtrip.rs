//! End-to-end: the real client against the real router on an ephemeral port.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use bytes::Bytes;
use futures::stream;
use media_store::{
    app,
    client::{
        ClientConfig, ObjectClient,
        error::TransferError,
        retry::RetryPolicy,
        source::{TransferMode, TransferSource},
    },
    models::metadata::TransferMetadata,
    services::{
        metadata_store::SqliteMetadataStore, path_cache::PathCache,
        storage_service::StorageService,
    },
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{io, sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::io::StreamReader;
use tower::ServiceExt;

struct Harness {
    service: StorageService,
    _dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteMetadataStore::new(Arc::new(pool));
        store.migrate().await.unwrap();
        let service = StorageService::new(
            Arc::new(store),
            Arc::new(PathCache::default()),
            dir.path(),
        );
        Self { service, _dir: dir }
    }

    fn router(&self) -> Router {
        app(self.service.clone())
    }

    async fn serve(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }
}

fn client(base_url: &str) -> ObjectClient {
    let mut config = ClientConfig::new(base_url, "u123");
    config.retry = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
    };
    ObjectClient::new(config).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[tokio::test]
async fn non_seekable_stream_round_trips_unmodified() {
    let harness = Harness::new().await;
    let base = harness.serve().await;
    let client = client(&base);

    let data = pattern(10 * 1024 * 1024);
    let chunks: Vec<io::Result<Bytes>> = data
        .chunks(64 * 1024)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let reader = StreamReader::new(stream::iter(chunks));

    let receipt = client
        .upload(
            TransferSource::forward_only(reader).named("clip.mp4"),
            &TransferMetadata::video("Highlights"),
        )
        .await
        .unwrap();
    assert_eq!(receipt.mode, TransferMode::RawChunked);
    assert_eq!(receipt.status, 200);

    let stored = harness
        .service
        .base_path
        .join("u123/Highlights")
        .join(format!("{}_clip.mp4", receipt.object_id));
    assert_eq!(std::fs::metadata(&stored).unwrap().len(), data.len() as u64);

    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("clip.mp4");
    let written = client
        .download("Highlights", &receipt.object_id, &dest)
        .await
        .unwrap();
    assert_eq!(written, data.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn file_path_uploads_as_multipart() {
    let harness = Harness::new().await;
    let base = harness.serve().await;
    let client = client(&base);

    let src = tempfile::tempdir().unwrap();
    let path = src.path().join("notes.txt");
    std::fs::write(&path, b"hello from disk").unwrap();

    let receipt = client
        .upload(TransferSource::path(&path), &TransferMetadata::files("Docs"))
        .await
        .unwrap();
    assert_eq!(receipt.mode, TransferMode::Multipart);
    assert_eq!(receipt.status, 201);

    let response = reqwest::Client::new()
        .get(format!("{base}/objects/Docs/{}/content", receipt.object_id))
        .header("X-User-Id", "u123")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
    assert_eq!(response.text().await.unwrap(), "hello from disk");
}

#[tokio::test]
async fn deleted_object_is_gone_immediately() {
    let harness = Harness::new().await;
    let base = harness.serve().await;
    let client = client(&base);

    let receipt = client
        .upload(
            TransferSource::forward_only(&b"short clip"[..]).named("clip.mp4"),
            &TransferMetadata::files("Highlights"),
        )
        .await
        .unwrap();

    let http = reqwest::Client::new();
    let url = format!("{base}/objects/Highlights/{}", receipt.object_id);
    // Warm the cache.
    let first = http.get(&url).header("X-User-Id", "u123").send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(
        first.headers()["content-disposition"],
        "attachment; filename=\"clip.mp4\""
    );

    let deleted = http.delete(&url).header("X-User-Id", "u123").send().await.unwrap();
    assert_eq!(deleted.status(), 200);
    let report: serde_json::Value = deleted.json().await.unwrap();
    assert_eq!(report["removedFromDisk"], true);
    assert_eq!(report["removedFromMetadata"], true);

    let after = http.get(&url).header("X-User-Id", "u123").send().await.unwrap();
    assert_eq!(after.status(), 404);
}

#[tokio::test]
async fn accented_metadata_survives_a_raw_upload() {
    let harness = Harness::new().await;
    let base = harness.serve().await;
    let client = client(&base);

    let metadata = TransferMetadata {
        title: Some("Vídeo de teste".into()),
        ..TransferMetadata::video("Vídeos")
    };
    let receipt = client
        .upload(
            TransferSource::forward_only(&b"payload"[..]).named("clip.mp4"),
            &metadata,
        )
        .await
        .unwrap();
    assert_eq!(receipt.mode, TransferMode::RawChunked);
    assert_eq!(receipt.status, 200);

    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("clip.mp4");
    client
        .download("Vídeos", &receipt.object_id, &dest)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
}

#[tokio::test]
async fn failed_download_keeps_existing_destination() {
    let harness = Harness::new().await;
    let base = harness.serve().await;
    let client = client(&base);

    let out = tempfile::tempdir().unwrap();
    let dest = out.path().join("keep.txt");
    std::fs::write(&dest, b"user data").unwrap();

    let err = client
        .download("Highlights", "no-such-id", &dest)
        .await
        .unwrap_err();
    match err {
        TransferError::Rejected { status, .. } => assert_eq!(status, 404),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(std::fs::read(&dest).unwrap(), b"user data");
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn missing_project_name_fails_before_any_io() {
    let harness = Harness::new().await;
    let base = harness.serve().await;
    let client = client(&base);

    let err = client
        .upload(
            TransferSource::forward_only(&b"abc"[..]).named("clip.mp4"),
            &TransferMetadata::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Validation(_)));
}

#[tokio::test]
async fn server_rejects_disallowed_extension_without_writing() {
    let harness = Harness::new().await;
    let base = harness.serve().await;
    let client = client(&base);

    let err = client
        .upload(
            TransferSource::forward_only(&b"MZ..."[..]).named("tool.exe"),
            &TransferMetadata::files("Highlights"),
        )
        .await
        .unwrap_err();
    match err {
        TransferError::Rejected { status, .. } => assert_eq!(status, 400),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!harness.service.base_path.join("u123").exists());
}

#[tokio::test]
async fn requests_without_user_are_unauthorized() {
    let harness = Harness::new().await;
    let response = harness
        .router()
        .oneshot(
            Request::builder()
                .uri("/objects/Highlights/abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn file_part_before_metadata_is_spooled_then_placed() {
    let harness = Harness::new().await;
    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\
         Content-Type: text/plain\r\n\r\nearly bytes\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\n\
         {{\"projectName\":\"Docs\",\"type\":\"files\"}}\r\n--{b}--\r\n",
        b = boundary
    );

    let response = harness
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/objects")
                .header("x-user-id", "u123")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let incoming = harness.service.base_path.join(".incoming");
    assert_eq!(std::fs::read_dir(&incoming).unwrap().count(), 0);
    let docs = harness.service.base_path.join("u123/Docs");
    let entries: Vec<_> = std::fs::read_dir(&docs).unwrap().flatten().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(std::fs::read(entries[0].path()).unwrap(), b"early bytes");
}

#[tokio::test]
async fn spooled_file_is_dropped_when_metadata_is_invalid() {
    let harness = Harness::new().await;
    let boundary = "XBOUNDARYX";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\r\n\
         early bytes\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\n\
         {{\"title\":\"no project\"}}\r\n--{b}--\r\n",
        b = boundary
    );

    let response = harness
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/objects")
                .header("x-user-id", "u123")
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let incoming = harness.service.base_path.join(".incoming");
    assert_eq!(std::fs::read_dir(&incoming).unwrap().count(), 0);
    assert!(!harness.service.base_path.join("u123").exists());
}

#[tokio::test]
async fn project_delete_and_mark_used() {
    let harness = Harness::new().await;
    let base = harness.serve().await;
    let client = client(&base);

    let receipt = client
        .upload(
            TransferSource::forward_only(&b"bytes"[..]).named("clip.mp4"),
            &TransferMetadata::video("Highlights"),
        )
        .await
        .unwrap();

    let http = reqwest::Client::new();
    let marked: serde_json::Value = http
        .post(format!("{base}/projects/Highlights/mark-used"))
        .header("X-User-Id", "u123")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(marked["used"], true);

    let preview: serde_json::Value = http
        .get(format!("{base}/objects/Highlights/{}/preview", receipt.object_id))
        .header("X-User-Id", "u123")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        preview["preview_url"],
        format!("/objects/Highlights/{}/stream", receipt.object_id)
    );

    let deleted: serde_json::Value = http
        .delete(format!("{base}/projects/Highlights"))
        .header("X-User-Id", "u123")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["message"], "metadata removed, files removed");
    assert!(!harness.service.base_path.join("u123").exists());

    let gone = http
        .get(format!("{base}/objects/Highlights/{}", receipt.object_id))
        .header("X-User-Id", "u123")
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);
}
