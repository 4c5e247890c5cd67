//! HTTP front end.
//!
//! One listener thread accepts connections; each connection is served on its
//! own thread so a live stream never blocks uploads. Detection runs inline on
//! the connection thread.

mod http;
mod multipart;

use anyhow::{anyhow, Context, Result};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::capture::{Camera, CameraConfig};
use crate::pipeline::{DetectionPipeline, UploadedAsset};
use crate::stream::{FrameStream, StreamEnd, CONTENT_TYPE as STREAM_CONTENT_TYPE};
use crate::storage::{RESULTS_AREA, UPLOADS_AREA};
use crate::views;

use self::http::{
    read_body, read_head, write_html_response, write_json_response, write_response,
    write_stream_head, write_text_response, HttpRequest,
};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
    /// Enables `/webcam` and `/video_feed`.
    pub camera: Option<CameraConfig>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            camera: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting and signal open streams to end.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

struct AppState {
    cfg: ApiConfig,
    pipeline: DetectionPipeline,
    shutdown: Arc<AtomicBool>,
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: DetectionPipeline,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: DetectionPipeline) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let listener = TcpListener::bind(&self.cfg.addr)
            .with_context(|| format!("bind {}", self.cfg.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AppState {
            cfg: self.cfg,
            pipeline: self.pipeline,
            shutdown: shutdown.clone(),
        });
        let join = std::thread::Builder::new()
            .name("fruit-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, state) {
                    log::error!("web server stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    loop {
        if state.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let state = state.clone();
                let spawned = std::thread::Builder::new()
                    .name("fruit-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &state) {
                            log::warn!("request from {} failed: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("could not spawn connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_BACKOFF);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &AppState) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut request = read_head(&mut stream)?;
    log::debug!("{} {}", request.method, request.path);

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => {
            write_html_response(&mut stream, 200, &views::home(state.cfg.camera.is_some()))
        }
        ("GET", "/upload_mode") => write_html_response(&mut stream, 200, &views::upload_form()),
        ("GET", "/webcam") if state.cfg.camera.is_some() => {
            write_html_response(&mut stream, 200, &views::webcam())
        }
        ("GET", "/video_feed") => match &state.cfg.camera {
            Some(camera) => serve_video_feed(stream, state, camera.clone()),
            None => write_text_response(&mut stream, 404, "not found"),
        },
        ("POST", "/upload") => handle_upload(&mut stream, &mut request, state),
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", path) if path.starts_with("/static/") => serve_static(&mut stream, path, state),
        (_, "/" | "/upload_mode" | "/upload" | "/video_feed" | "/health") => {
            write_text_response(&mut stream, 405, "method not allowed")
        }
        _ => write_text_response(&mut stream, 404, "not found"),
    }
}

fn handle_upload(stream: &mut TcpStream, request: &mut HttpRequest, state: &AppState) -> Result<()> {
    let len = request.content_length()?;
    if len > state.cfg.max_upload_bytes {
        return write_text_response(stream, 413, "upload too large");
    }
    let body = read_body(stream, request, len)?;
    let asset = match extract_upload(request, &body) {
        Ok(Some(asset)) => asset,
        Ok(None) => return write_text_response(stream, 200, views::MSG_NO_FILE_UPLOADED),
        Err(err) => {
            log::warn!("rejecting malformed upload: {:#}", err);
            return write_text_response(stream, 400, "malformed upload");
        }
    };

    let pipeline = &state.pipeline;
    let outcome = pipeline
        .run(asset, pipeline.confidence())
        .and_then(|result| pipeline.present(&result));
    match outcome {
        Ok(view) => write_html_response(stream, 200, &views::result(&view)),
        Err(err) => match err.user_message() {
            Some(message) => write_text_response(stream, 200, message),
            None => {
                log::error!("detection failed: {:#}", anyhow::Error::new(err));
                write_text_response(stream, 500, "internal server error")
            }
        },
    }
}

/// The `file` field of an upload form, if the form has one.
///
/// A form that is not multipart at all counts as having no file.
fn extract_upload(request: &HttpRequest, body: &[u8]) -> Result<Option<UploadedAsset>> {
    let Some(boundary) = request.header("content-type").and_then(multipart::boundary) else {
        return Ok(None);
    };
    let parts = multipart::parse(body, &boundary)?;
    Ok(multipart::file_field(&parts, "file").map(|part| {
        UploadedAsset::new(part.filename.clone().unwrap_or_default(), part.data.clone())
    }))
}

fn serve_video_feed(mut stream: TcpStream, state: &AppState, camera: CameraConfig) -> Result<()> {
    let target_fps = camera.target_fps;
    let camera = match Camera::open(camera) {
        Ok(camera) => camera,
        Err(err) => {
            log::error!("camera unavailable: {:#}", err);
            return write_text_response(&mut stream, 500, "camera unavailable");
        }
    };
    write_stream_head(&mut stream, STREAM_CONTENT_TYPE)?;

    let pipeline = &state.pipeline;
    let end = FrameStream::new(
        pipeline.detector().clone(),
        camera,
        pipeline.confidence(),
        state.shutdown.clone(),
    )
    .with_target_fps(target_fps)
    .run(&mut stream)?;
    log::info!("video feed ended: {:?}", end);
    if end == StreamEnd::Shutdown {
        let _ = stream.shutdown(std::net::Shutdown::Both);
    }
    Ok(())
}

fn serve_static(stream: &mut TcpStream, path: &str, state: &AppState) -> Result<()> {
    let rest = &path["/static/".len()..];
    let resolved = rest.split_once('/').and_then(|(area, relative)| {
        if area == UPLOADS_AREA || area == RESULTS_AREA {
            state.pipeline.storage().resolve_static(area, relative)
        } else {
            None
        }
    });
    let Some(file) = resolved.filter(|file| file.is_file()) else {
        return write_text_response(stream, 404, "not found");
    };
    let bytes = std::fs::read(&file).with_context(|| format!("read {}", file.display()))?;
    write_response(stream, 200, content_type_for(&file), &bytes)
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}
