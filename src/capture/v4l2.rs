//! V4L2 camera backend.
//!
//! Opens a local device node (e.g. /dev/video0), asks for packed RGB and falls
//! back to MJPEG when the driver refuses. Frames are converted to `RgbImage`
//! in memory.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::{CameraConfig, CameraStats};

const FOURCC_RGB3: &[u8; 4] = b"RGB3";
const FOURCC_MJPG: &[u8; 4] = b"MJPG";

pub(super) struct DeviceSource {
    config: CameraConfig,
    state: Option<DeviceState>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
    active_fourcc: [u8; 4],
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceSource {
    pub(super) fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            active_fourcc: *FOURCC_RGB3,
            config,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    pub(super) fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(FOURCC_RGB3);

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "camera {}: RGB3 rejected ({}), trying MJPG",
                    self.config.device,
                    err
                );
                format.fourcc = v4l::FourCC::new(FOURCC_MJPG);
                device
                    .set_format(&format)
                    .context("set v4l2 format after RGB3 failure")?
            }
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "camera {}: failed to set fps: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.active_fourcc = format.fourcc.repr;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "camera {} connected ({}x{} {})",
            self.config.device,
            self.active_width,
            self.active_height,
            String::from_utf8_lossy(&self.active_fourcc)
        );
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<RgbImage> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (width, height, fourcc) = (self.active_width, self.active_height, self.active_fourcc);
        let captured = state.with_mut(|fields| {
            fields.stream.next().map(|(buf, meta)| {
                let used = (meta.bytesused as usize).min(buf.len());
                let used = if used == 0 { buf.len() } else { used };
                to_rgb(&buf[..used], width, height, &fourcc)
            })
        });
        let frame = captured.map_err(|err| {
            self.last_error = Some(err.to_string());
            anyhow::Error::new(err).context("capture v4l2 frame")
        })??;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(frame)
    }

    pub(super) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    pub(super) fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

fn to_rgb(buf: &[u8], width: u32, height: u32, fourcc: &[u8; 4]) -> Result<RgbImage> {
    if fourcc == FOURCC_MJPG {
        return Ok(image::load_from_memory(buf)
            .context("decode MJPG frame")?
            .into_rgb8());
    }
    let expected = (width as usize) * (height as usize) * 3;
    if buf.len() < expected {
        return Err(anyhow!(
            "short RGB frame: {} bytes, expected {}",
            buf.len(),
            expected
        ));
    }
    RgbImage::from_raw(width, height, buf[..expected].to_vec())
        .ok_or_else(|| anyhow!("RGB frame does not match {}x{}", width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_rgb_converts() {
        let buf = vec![7u8; 4 * 2 * 3];
        let image = to_rgb(&buf, 4, 2, FOURCC_RGB3).unwrap();
        assert_eq!(image.dimensions(), (4, 2));
    }

    #[test]
    fn short_rgb_buffer_is_rejected() {
        assert!(to_rgb(&[0u8; 5], 4, 2, FOURCC_RGB3).is_err());
    }
}
