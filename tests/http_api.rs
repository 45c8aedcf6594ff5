//! End-to-end tests for the HTTP API
//!
//! Requests go straight into the router with `oneshot`; no socket is bound.

#![cfg(feature = "server")]

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use image_processor::server::{build_router, AppState, RouterSettings};
use image_processor::{BatchProcessor, ItemPipeline, ProcessorConfig, SessionStore};
use serde_json::{json, Value};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";
const BODY_LIMIT: usize = 64 * 1024 * 1024;

fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([10, 200, 90, 255]));
    let mut buffer = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .expect("Failed to encode fixture");
    buffer
}

struct TestApp {
    router: Router,
    _sessions: TempDir,
}

impl TestApp {
    fn new() -> Self {
        Self::with_settings(RouterSettings {
            max_body_bytes: BODY_LIMIT,
            cors_origins: Vec::new(),
        })
    }

    fn with_settings(settings: RouterSettings) -> Self {
        let sessions = TempDir::new().expect("Failed to create session root");
        let config = ProcessorConfig::builder()
            .workers(2)
            .item_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        let processor = BatchProcessor::new(ItemPipeline::new(config, None));
        let state = AppState::new(processor, Arc::new(SessionStore::new(sessions.path())));

        Self {
            router: build_router(state, &settings),
            _sessions: sessions,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>, Option<String>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec(), content_type)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>, Option<String>) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post_json(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, bytes, _) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn post_multipart(&self, uri: &str, body: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, bytes, _) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}

#[derive(Default)]
struct MultipartBody {
    buffer: Vec<u8>,
}

impl MultipartBody {
    fn text(mut self, name: &str, value: &str) -> Self {
        write!(
            self.buffer,
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        )
        .unwrap();
        self
    }

    fn file(mut self, name: &str, filename: &str, bytes: &[u8]) -> Self {
        write!(
            self.buffer,
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .unwrap();
        self.buffer.extend_from_slice(bytes);
        self.buffer.extend_from_slice(b"\r\n");
        self
    }

    fn finish(mut self) -> Vec<u8> {
        write!(self.buffer, "--{BOUNDARY}--\r\n").unwrap();
        self.buffer
    }
}

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, bytes) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn zip_names(bytes: &[u8]) -> Vec<String> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body, _) = app.get("/api/health").await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["background_removal"], false);
    let formats = body["supported_formats"].as_array().unwrap();
    assert!(formats.iter().any(|f| f == "PNG"));
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let app = TestApp::new();
    let (status, body, _) = app.get("/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_process_images_inline() {
    let app = TestApp::new();
    let payload = json!({
        "images": [
            { "filename": "a.png", "data": STANDARD.encode(png_fixture(40, 20)) },
            { "filename": "b.xyz", "data": STANDARD.encode(png_fixture(4, 4)) },
        ],
        "resize": true,
        "width": "32",
        "height": 32,
    });

    let (status, body) = app.post_json("/api/process-images", &payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["total_processed"], 2);
    assert_eq!(body["stats"]["successful"], 1);
    assert_eq!(body["stats"]["success_rate"], 50.0);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);

    let ok = results.iter().find(|r| r["filename"] == "a.png").unwrap();
    assert_eq!(ok["success"], true);
    assert_eq!(ok["operations"]["dimensions"], "32x32");
    let uri = ok["processed_image"].as_str().unwrap();
    let png = STANDARD
        .decode(uri.strip_prefix("data:image/png;base64,").unwrap())
        .unwrap();
    assert_eq!(image::load_from_memory(&png).unwrap().dimensions(), (32, 32));

    let failed = results.iter().find(|r| r["filename"] == "b.xyz").unwrap();
    assert_eq!(failed["success"], false);
    assert_eq!(failed["error_kind"], "unsupported_format");
}

#[tokio::test]
async fn test_process_images_rejects_bad_requests() {
    let app = TestApp::new();

    let (status, body) = app
        .post_json("/api/process-images", &json!({ "images": [] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let payload = json!({
        "images": [{ "filename": "a.png", "data": STANDARD.encode(png_fixture(4, 4)) }],
        "resize": true,
        "width": 0,
        "height": 100,
    });
    let (status, _) = app.post_json("/api/process-images", &payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let payload = json!({ "images": [{ "filename": "a.png" }] });
    let (status, _) = app.post_json("/api/process-images", &payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::post("/api/process-images")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let app = TestApp::with_settings(RouterSettings {
        max_body_bytes: 1024,
        cors_origins: Vec::new(),
    });
    let payload = json!({
        "images": [{ "filename": "a.png", "data": "A".repeat(8 * 1024) }],
    });

    let (status, _) = app.post_json("/api/process-images", &payload).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_download_zip() {
    let app = TestApp::new();
    let png = STANDARD.encode(png_fixture(3, 3));

    let empty = json!({ "images": [{ "success": false, "filename": "x.png" }] });
    let (status, _) = app.post_json("/api/download-zip", &empty).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let payload = json!({
        "images": [
            { "success": true, "filename": "photo.jpg", "processed_image": format!("data:image/png;base64,{png}") },
            { "success": true, "filename": "icon.webp", "processed_image": png },
            { "success": false, "filename": "broken.png" },
        ]
    });
    let request = Request::post("/api/download-zip")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, bytes, content_type) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/zip"));
    assert_eq!(zip_names(&bytes), vec!["icon.png", "photo.png"]);
}

#[tokio::test]
async fn test_process_zip() {
    let app = TestApp::new();
    let png = png_fixture(10, 10);
    let archive = zip_of(&[
        ("photos/one.png", &png),
        ("two.png", &png),
        ("notes.txt", b"hello"),
        ("__MACOSX/._one.png", b"junk"),
    ]);

    let body = MultipartBody::default()
        .file("file", "batch.zip", &archive)
        .text("resize", "true")
        .text("width", "16")
        .text("height", "8")
        .finish();
    let (status, body) = app.post_multipart("/api/process-zip", body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["total_extracted"], 2);
    assert_eq!(body["stats"]["successful"], 2);
    let results = body["results"].as_array().unwrap();
    assert!(results.iter().all(|r| r["operations"]["dimensions"] == "16x8"));
}

#[tokio::test]
async fn test_process_zip_validation() {
    let app = TestApp::new();

    let body = MultipartBody::default().text("resize", "true").finish();
    let (status, _) = app.post_multipart("/api/process-zip", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = MultipartBody::default()
        .file("file", "images.tar", b"not a zip")
        .finish();
    let (status, _) = app.post_multipart("/api/process-zip", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = MultipartBody::default()
        .file("file", "broken.zip", b"not a zip")
        .finish();
    let (status, _) = app.post_multipart("/api/process-zip", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let archive = zip_of(&[("readme.md", b"# nothing here")]);
    let body = MultipartBody::default()
        .file("file", "empty.zip", &archive)
        .finish();
    let (status, _) = app.post_multipart("/api/process-zip", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_session_lifecycle_single_output() {
    let app = TestApp::new();

    let body = MultipartBody::default()
        .file("files", "cat.png", &png_fixture(24, 12))
        .file("files", "notes.txt", b"plain text")
        .finish();
    let (status, upload) = app.post_multipart("/api/upload", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(upload["files"].as_array().unwrap().len(), 1);
    assert_eq!(upload["files"][0]["filename"], "cat.png");
    assert_eq!(upload["files"][0]["width"], 24);
    assert_eq!(upload["files"][0]["height"], 12);
    assert_eq!(upload["rejected"], json!(["notes.txt"]));
    let session_id = upload["session_id"].as_str().unwrap().to_string();

    let (status, processed) = app
        .post_json(
            "/api/process",
            &json!({
                "session_id": session_id,
                "settings": { "resize": true, "width": 20, "height": 20 },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(processed["stats"]["successful"], 1);
    assert_eq!(processed["results"][0]["output_file"], "cat.png");

    let (status, bytes, content_type) = app.get(&format!("/api/download/{session_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));
    assert_eq!(image::load_from_memory(&bytes).unwrap().dimensions(), (20, 20));

    let (status, _, content_type) = app
        .get(&format!("/api/preview/{session_id}/cat.png"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("image/png"));

    let (status, _, _) = app
        .get(&format!("/api/preview/{session_id}/missing.png"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/api/cleanup/{session_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["success"], true);

    let (status, _, _) = app.get(&format!("/api/download/{session_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A second cleanup of the same session still succeeds
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/api/cleanup/{session_id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_session_with_several_outputs_downloads_zip() {
    let app = TestApp::new();
    let png = png_fixture(8, 8);

    let body = MultipartBody::default()
        .file("files", "a.png", &png)
        .file("files", "b.png", &png)
        .file("files", "c.png", &png)
        .finish();
    let (status, upload) = app.post_multipart("/api/upload", body).await;
    assert_eq!(status, StatusCode::OK);
    let session_id = upload["session_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .post_json("/api/process", &json!({ "session_id": session_id }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, bytes, content_type) = app.get(&format!("/api/download/{session_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/zip"));
    assert_eq!(zip_names(&bytes), vec!["a.png", "b.png", "c.png"]);
}

#[tokio::test]
async fn test_upload_without_valid_files() {
    let app = TestApp::new();
    let body = MultipartBody::default()
        .file("files", "script.sh", b"echo hi")
        .file("files", "fake.png", b"not really a png")
        .finish();
    let (status, body) = app.post_multipart("/api/upload", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_unknown_sessions_are_not_found() {
    let app = TestApp::new();
    let unknown = "6f1c2d9e-0000-4000-8000-000000000000";

    let (status, _, _) = app.get(&format!("/api/download/{unknown}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = app.get("/api/download/not-a-uuid").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post_json("/api/process", &json!({ "session_id": unknown }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/api/cleanup/{unknown}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = app.send(request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
