//! Live MJPEG detection stream.
//!
//! Each `/video_feed` client gets its own `FrameStream`, which owns the camera
//! for the lifetime of the connection. The loop ends when the client stops
//! reading, the server shuts down, or a frame limit is reached; the camera is
//! dropped on every exit path.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::capture::Camera;
use crate::detect::Detector;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Why a stream stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    ClientGone,
    Shutdown,
    FrameLimit,
}

pub struct FrameStream {
    detector: Detector,
    camera: Camera,
    confidence: f32,
    frame_interval: Duration,
    max_frames: Option<u64>,
    shutdown: Arc<AtomicBool>,
}

impl FrameStream {
    pub fn new(detector: Detector, camera: Camera, confidence: f32, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            detector,
            camera,
            confidence,
            frame_interval: Duration::ZERO,
            max_frames: None,
            shutdown,
        }
    }

    /// Pace output to at most `fps` frames per second. Zero disables pacing.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.frame_interval = if fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis((1000 / fps).max(1) as u64)
        };
        self
    }

    pub fn with_max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = Some(max_frames);
        self
    }

    /// Stream annotated frames into `out` until cancelled.
    ///
    /// Capture and detector failures end the stream with an error.
    pub fn run<W: Write>(mut self, out: &mut W) -> Result<StreamEnd> {
        let mut sent = 0u64;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(StreamEnd::Shutdown);
            }
            if self.max_frames.is_some_and(|max| sent >= max) {
                return Ok(StreamEnd::FrameLimit);
            }
            let started = Instant::now();

            let mut frame = self.camera.next_frame()?;
            self.detector.annotate_frame(&mut frame, self.confidence)?;
            let jpeg = self.detector.annotator().encode_jpeg(&frame)?;

            if let Err(err) = write_part(out, &jpeg) {
                log::info!("stream client disconnected: {}", err);
                return Ok(StreamEnd::ClientGone);
            }
            sent += 1;

            if let Some(rest) = self.frame_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }
}

/// Write one multipart part holding a JPEG frame.
pub fn write_part<W: Write>(out: &mut W, jpeg: &[u8]) -> std::io::Result<()> {
    write!(
        out,
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    )?;
    out.write_all(jpeg)?;
    out.write_all(b"\r\n")?;
    out.flush()
}
