use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// A backend owns a loaded model and its class-name table. It is loaded once
/// at startup and shared by every request through a `Mutex`, so `detect` may
/// take `&mut self`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Human-readable label for a class id, if the model knows it.
    fn class_name(&self, class_id: usize) -> Option<&str>;

    /// Run detection on an RGB image.
    ///
    /// Returns every detection scoring at least `confidence`, in image pixel
    /// coordinates.
    fn detect(&mut self, image: &RgbImage, confidence: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
