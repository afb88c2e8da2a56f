#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::routing::get as get_route;
use axum::Router;
use http_body_util::BodyExt;
use magetool_pipeline::{Toolkit, ToolkitConfig, Transform};
use tempfile::TempDir;
use tower::ServiceExt;

use magetool_api::config::ServerConfig;
use magetool_api::engine::Engine;
use magetool_api::router::build_app_router;
use magetool_api::state::AppState;
use magetool_api::ws::WsManager;

/// Client id most tests submit as.
pub const CLIENT: &str = "test-client";

const BOUNDARY: &str = "magetool-test-boundary";

/// Build a test `ServerConfig` rooted in `dir`.
///
/// Uses `http://localhost:3000` as CORS origin (matching the dev default),
/// a 30-second request timeout, and no per-client job limit.
pub fn test_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        log_json: false,
        storage_dir: dir.join("artifacts"),
        scratch_dir: dir.join("scratch"),
        artifact_ttl_secs: 3600,
        input_ttl_secs: 600,
        max_storage_bytes: 64 * 1024 * 1024,
        max_upload_bytes: 16 * 1024 * 1024,
        job_retention_secs: 600,
        sweep_interval_secs: 60,
        subtask_concurrency: 2,
        max_concurrent_jobs: 4,
        subtask_timeout_secs: 30,
        max_active_jobs_per_client: 0,
        ffmpeg_bin: "ffmpeg".to_string(),
        ffprobe_bin: "ffprobe".to_string(),
        ytdlp_bin: "yt-dlp".to_string(),
    }
}

/// A running application backed by a temporary directory.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub engine: Engine,
    _dir: TempDir,
}

impl TestApp {
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

/// Build the full application with the same engine and middleware stack
/// `main.rs` uses. Image operations and direct URL downloads run for real.
pub async fn build_test_app() -> TestApp {
    build_test_app_with(|_| {}).await
}

/// Like [`build_test_app`], with a hook to adjust the configuration.
pub async fn build_test_app_with(adjust: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    adjust(&mut config);

    let toolkit = Toolkit::new(ToolkitConfig {
        connect_timeout: Duration::from_secs(5),
        ..config.toolkit_config()
    })
    .unwrap();
    let transform: Arc<dyn Transform> = Arc::new(toolkit);
    let engine = Engine::start(&config, transform).await.unwrap();

    let state = AppState {
        config: Arc::new(config.clone()),
        registry: Arc::clone(&engine.registry),
        store: Arc::clone(&engine.store),
        ws_manager: Arc::new(WsManager::new()),
        event_bus: Arc::clone(&engine.event_bus),
    };
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        engine,
        _dir: dir,
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn post_empty(app: Router, uri: &str, client_id: &str) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-client-id", client_id)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

/// One multipart form part.
pub enum Part {
    Text(&'static str, String),
    File {
        field: &'static str,
        file_name: String,
        content_type: &'static str,
        data: Vec<u8>,
    },
}

impl Part {
    pub fn text(name: &'static str, value: impl Into<String>) -> Self {
        Self::Text(name, value.into())
    }

    /// A file in the `files` field.
    pub fn file(file_name: impl Into<String>, content_type: &'static str, data: Vec<u8>) -> Self {
        Self::File {
            field: "files",
            file_name: file_name.into(),
            content_type,
            data,
        }
    }
}

/// Build a `multipart/form-data` POST as `client_id`.
pub fn multipart_request(uri: &str, client_id: &str, parts: Vec<Part>) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                field,
                file_name,
                content_type,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-client-id", client_id)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}

/// One parsed server-sent event.
#[derive(Debug)]
pub struct SseEvent {
    pub id: Option<String>,
    pub data: serde_json::Value,
}

fn parse_sse_block(block: &str) -> Option<SseEvent> {
    let mut id = None;
    let mut data = String::new();
    for line in block.lines() {
        if let Some(value) = line.strip_prefix("id:") {
            id = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push_str(value.trim_start());
        }
    }
    (!data.is_empty()).then(|| SseEvent {
        id,
        data: serde_json::from_str(&data).unwrap(),
    })
}

/// Read an SSE body to its end and parse every data event.
pub async fn sse_events(response: Response<Body>) -> Vec<SseEvent> {
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    text.split("\n\n").filter_map(parse_sse_block).collect()
}

/// Read only the first data event of a live SSE body, then drop the
/// connection the way a browser tab losing its network would.
pub async fn first_sse_event(response: Response<Body>) -> SseEvent {
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();
    let mut text = String::new();
    loop {
        if let Some((block, _)) = text.split_once("\n\n") {
            if let Some(event) = parse_sse_block(block) {
                return event;
            }
            text = text[block.len() + 2..].to_string();
            continue;
        }
        let frame = body
            .frame()
            .await
            .expect("stream ended before any event")
            .unwrap();
        if let Ok(data) = frame.into_data() {
            text.push_str(std::str::from_utf8(&data).unwrap());
        }
    }
}

/// Poll `GET /api/jobs/{id}` until the job leaves pending/running.
pub async fn wait_for_job(app: &Router, job_id: &str) -> serde_json::Value {
    for _ in 0..200 {
        let json = body_json(get(app.clone(), &format!("/api/jobs/{job_id}")).await).await;
        let status = json["data"]["status"].as_str().unwrap_or_default().to_string();
        if status != "pending" && status != "running" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} did not finish in time");
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A small PNG with a gradient so encoders have something to work with.
pub fn tiny_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 16) as u8, (y * 16) as u8, 128])
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Size of the served clip; large enough to arrive in several chunks.
pub const CLIP_BYTES: usize = 512 * 1024;

/// Serve `/clip.mp4` on an ephemeral port, answering after `delay`, and
/// return its URL.
pub async fn spawn_file_server(delay: Duration) -> String {
    let clip: Vec<u8> = (0..CLIP_BYTES).map(|i| (i % 251) as u8).collect();
    let app = Router::new().route(
        "/clip.mp4",
        get_route(move || {
            let clip = clip.clone();
            async move {
                tokio::time::sleep(delay).await;
                ([("content-type", "video/mp4")], clip)
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/clip.mp4")
}
