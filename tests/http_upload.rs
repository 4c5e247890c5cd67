use anyhow::Result;
use std::io::{Cursor, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};

use fruit_lens::api::{ApiConfig, ApiHandle, ApiServer};
use fruit_lens::capture::CameraConfig;
use fruit_lens::detect::BoundingBox;
use fruit_lens::{
    ArtifactLayout, DetectionPipeline, Detector, LabelEmojiTable, SharedBackend, StorageLayout,
    StubBackend,
};

const BOUNDARY: &str = "----fruitboundary7MA4YWxk";

fn png_bytes() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbImage::from_pixel(48, 32, image::Rgb([30, 160, 60]))
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

fn multipart_body(field: &str, filename: Option<&str>, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    let disposition = match filename {
        Some(name) => format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            field, name
        ),
        None => format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", field),
    };
    body.extend_from_slice(disposition.as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

struct Response {
    head: String,
    body: Vec<u8>,
}

impl Response {
    fn status(&self) -> u16 {
        self.head
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap_or(0)
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

fn split_response(raw: Vec<u8>) -> Response {
    let pos = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head");
    Response {
        head: String::from_utf8_lossy(&raw[..pos]).to_string(),
        body: raw[pos + 4..].to_vec(),
    }
}

struct TestApi {
    dir: TempDir,
    calls: Arc<AtomicUsize>,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(backend: StubBackend, camera: Option<CameraConfig>) -> Result<Self> {
        let dir = tempdir()?;
        let storage = StorageLayout::new(
            dir.path().join("uploads"),
            dir.path().join("results"),
            ArtifactLayout::Shared,
        );
        storage.ensure()?;
        let calls = backend.call_counter();
        let shared: SharedBackend = Arc::new(Mutex::new(backend));
        let pipeline = DetectionPipeline::new(
            Detector::new(shared),
            storage,
            Arc::new(LabelEmojiTable::builtin()),
        );
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            max_upload_bytes: 1024 * 1024,
            camera,
        };
        let api_handle = ApiServer::new(api_config, pipeline).spawn()?;
        Ok(Self {
            dir,
            calls,
            api_handle: Some(api_handle),
        })
    }

    fn connect(&self) -> Result<TcpStream> {
        let addr = self.api_handle.as_ref().expect("running").addr;
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        Ok(stream)
    }

    fn send(&self, request: &[u8]) -> Result<Response> {
        let mut stream = self.connect()?;
        stream.write_all(request)?;
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw)?;
        Ok(split_response(raw))
    }

    fn get(&self, path: &str) -> Result<Response> {
        self.send(format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path).as_bytes())
    }

    fn post_form(&self, body: &[u8]) -> Result<Response> {
        let mut request = format!(
            "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary={}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            BOUNDARY,
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(body);
        self.send(&request)
    }

    fn uploads(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.dir.path().join("uploads"))
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default()
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            let _ = handle.stop();
        }
    }
}

fn stub_camera() -> CameraConfig {
    CameraConfig {
        device: "stub://bench".to_string(),
        target_fps: 30,
        width: 64,
        height: 48,
    }
}

#[test]
fn upload_returns_result_page_with_glyphs() -> Result<()> {
    let backend = StubBackend::new()
        .with_detection("Apple", BoundingBox::new(0.1, 0.1, 0.4, 0.5), 0.9)
        .with_detection("Apple", BoundingBox::new(0.5, 0.2, 0.9, 0.8), 0.8);
    let api = TestApi::new(backend, None)?;

    let response = api.post_form(&multipart_body("file", Some("apple.png"), &png_bytes()))?;
    assert_eq!(response.status(), 200);
    assert!(response.head.contains("text/html"));
    let html = response.text();
    assert_eq!(html.matches("<li>🍎 Apple</li>").count(), 1);
    assert!(html.contains("src=\"/static/results/apple.png\""));
    assert_eq!(api.calls.load(Ordering::SeqCst), 1);

    let image = api.get("/static/results/apple.png")?;
    assert_eq!(image.status(), 200);
    assert!(image.head.contains("Content-Type: image/png"));
    assert!(image::load_from_memory(&image.body).is_ok());
    Ok(())
}

fn image_src(html: &str) -> Option<&str> {
    let start = html.find("<img src=\"")? + "<img src=\"".len();
    let len = html[start..].find('"')?;
    Some(&html[start..start + len])
}

#[test]
fn result_image_url_survives_unsafe_filename_characters() -> Result<()> {
    let api = TestApi::new(StubBackend::new().with_labels(&["Apple"]), None)?;

    let response = api.post_form(&multipart_body("file", Some("my apple #2.png"), &png_bytes()))?;
    assert_eq!(response.status(), 200);
    let html = response.text();
    let src = image_src(&html).expect("result image").to_string();
    assert_eq!(src, "/static/results/my%20apple%20%232.png");

    let image = api.get(&src)?;
    assert_eq!(image.status(), 200);
    assert!(image.head.contains("Content-Type: image/png"));
    assert!(image::load_from_memory(&image.body).is_ok());
    assert!(api.dir.path().join("results/my apple #2.png").is_file());
    Ok(())
}

#[test]
fn missing_file_field_is_reported_without_detection() -> Result<()> {
    let api = TestApi::new(StubBackend::new().with_labels(&["Apple"]), None)?;

    let response = api.post_form(&multipart_body("note", None, b"hello"))?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "No file uploaded 😢");
    assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    assert!(api.uploads().is_empty());
    Ok(())
}

#[test]
fn empty_filename_is_reported_without_detection() -> Result<()> {
    let api = TestApi::new(StubBackend::new().with_labels(&["Apple"]), None)?;

    let response = api.post_form(&multipart_body("file", Some(""), b""))?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "No selected file 😢");
    assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    assert!(api.uploads().is_empty());
    Ok(())
}

#[test]
fn undecodable_upload_is_a_server_error() -> Result<()> {
    let api = TestApi::new(StubBackend::new(), None)?;
    let response = api.post_form(&multipart_body("file", Some("apple.jpg"), b"not an image"))?;
    assert_eq!(response.status(), 500);
    assert!(!response.text().contains("not an image"));
    Ok(())
}

#[test]
fn oversized_upload_is_rejected_before_reading() -> Result<()> {
    let api = TestApi::new(StubBackend::new(), None)?;
    let response = api.send(
        b"POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary=x\r\nContent-Length: 99999999\r\n\r\n",
    )?;
    assert_eq!(response.status(), 413);
    assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn pages_and_health() -> Result<()> {
    let api = TestApi::new(StubBackend::new(), None)?;

    let home = api.get("/")?;
    assert_eq!(home.status(), 200);
    assert!(home.text().contains("/upload_mode"));
    assert!(!home.text().contains("/webcam"));

    let form = api.get("/upload_mode")?;
    assert_eq!(form.status(), 200);
    assert!(form.text().contains("enctype=\"multipart/form-data\""));

    let health = api.get("/health")?;
    assert_eq!(health.status(), 200);
    let json: serde_json::Value = serde_json::from_slice(&health.body)?;
    assert_eq!(json["status"], "ok");

    assert_eq!(api.get("/webcam")?.status(), 404);
    assert_eq!(api.get("/video_feed")?.status(), 404);
    assert_eq!(api.get("/nope")?.status(), 404);
    assert_eq!(api.get("/upload")?.status(), 405);
    Ok(())
}

#[test]
fn static_paths_cannot_escape_storage() -> Result<()> {
    let api = TestApi::new(StubBackend::new(), None)?;
    std::fs::write(api.dir.path().join("secret.txt"), b"hidden")?;
    assert_eq!(api.get("/static/uploads/../secret.txt")?.status(), 404);
    assert_eq!(api.get("/static/uploads/%2E%2E/secret.txt")?.status(), 404);
    assert_eq!(api.get("/static/other/secret.txt")?.status(), 404);
    assert_eq!(api.get("/static/results/missing.jpg")?.status(), 404);
    Ok(())
}

#[test]
fn video_feed_streams_jpeg_parts() -> Result<()> {
    let api = TestApi::new(StubBackend::new().with_labels(&["Lemon"]), Some(stub_camera()))?;

    assert_eq!(api.get("/webcam")?.status(), 200);

    let mut stream = api.connect()?;
    stream.write_all(b"GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    // Head plus the first part's headers and at least the JPEG marker.
    while !contains_frame(&raw) {
        let n = stream.read(&mut buf)?;
        assert!(n > 0, "stream closed early");
        raw.extend_from_slice(&buf[..n]);
    }
    let text = String::from_utf8_lossy(&raw);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
    assert!(text.contains("--frame\r\nContent-Type: image/jpeg"));
    drop(stream);

    assert!(api.calls.load(Ordering::SeqCst) >= 1);
    Ok(())
}

fn contains_frame(raw: &[u8]) -> bool {
    let marker = b"--frame\r\n";
    raw.windows(marker.len())
        .position(|w| w == marker)
        .map(|pos| {
            raw[pos..]
                .windows(2)
                .any(|w| w == [0xFF, 0xD8])
        })
        .unwrap_or(false)
}
