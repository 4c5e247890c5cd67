//! Camera frame sources for live detection.
//!
//! - `stub://...` devices produce synthetic frames (tests, demos)
//! - device paths (e.g. `/dev/video0`) use V4L2 (feature: capture-v4l2)
//!
//! A `Camera` holds its device open until it is dropped; the live stream owns
//! exactly one camera per client connection.

#[cfg(feature = "capture-v4l2")]
mod v4l2;

use anyhow::Result;
use image::{Rgb, RgbImage};

#[cfg(feature = "capture-v4l2")]
use v4l2::DeviceSource;

/// Configuration for a camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or `stub://name`.
    pub device: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Statistics for a camera.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub device: String,
}

pub struct Camera {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "capture-v4l2")]
    Device(DeviceSource),
}

impl Camera {
    /// Open and connect a camera.
    pub fn open(config: CameraConfig) -> Result<Self> {
        let mut camera = if config.device.starts_with("stub://") {
            Self {
                backend: CameraBackend::Synthetic(SyntheticSource::new(config)),
            }
        } else {
            #[cfg(feature = "capture-v4l2")]
            {
                Self {
                    backend: CameraBackend::Device(DeviceSource::new(config)),
                }
            }
            #[cfg(not(feature = "capture-v4l2"))]
            {
                anyhow::bail!(
                    "camera {} requires the capture-v4l2 feature",
                    config.device
                )
            }
        };
        camera.connect()?;
        Ok(camera)
    }

    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    /// Capture the next frame. Blocks until the device delivers one.
    pub fn next_frame(&mut self) -> Result<RgbImage> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.next_frame(),
        }
    }

    /// Check if the source is healthy.
    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(_) => true,
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.is_healthy(),
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::Device(source) => source.stats(),
        }
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        let stats = self.stats();
        log::info!(
            "camera {} released after {} frames",
            stats.device,
            stats.frames_captured
        );
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticSource {
    config: CameraConfig,
    frame_count: u64,
}

impl SyntheticSource {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("camera {} connected (synthetic)", self.config.device);
        Ok(())
    }

    /// A gradient with a bright square drifting across it.
    fn next_frame(&mut self) -> Result<RgbImage> {
        self.frame_count += 1;
        let (width, height) = (self.config.width, self.config.height);
        let side = (width.min(height) / 4).max(1);
        let offset = (self.frame_count as u32 * 8) % width.max(1);
        let top = height.saturating_sub(side) / 2;
        Ok(RgbImage::from_fn(width, height, |x, y| {
            let in_square = x >= offset && x < offset + side && y >= top && y < top + side;
            if in_square {
                Rgb([230, 40, 40])
            } else {
                Rgb([
                    (x * 255 / width.max(1)) as u8,
                    (y * 255 / height.max(1)) as u8,
                    (self.frame_count % 256) as u8,
                ])
            }
        }))
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            target_fps: 10,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn stub_camera_produces_frames() -> Result<()> {
        let mut camera = Camera::open(stub_config())?;
        let frame = camera.next_frame()?;
        assert_eq!(frame.dimensions(), (64, 48));
        assert!(camera.is_healthy());
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> Result<()> {
        let mut camera = Camera::open(stub_config())?;
        let a = camera.next_frame()?;
        let b = camera.next_frame()?;
        assert_ne!(a, b);
        assert_eq!(camera.stats().frames_captured, 2);
        Ok(())
    }

    #[cfg(not(feature = "capture-v4l2"))]
    #[test]
    fn device_paths_need_feature() {
        let config = CameraConfig {
            device: "/dev/video0".to_string(),
            ..stub_config()
        };
        assert!(Camera::open(config).is_err());
    }
}
