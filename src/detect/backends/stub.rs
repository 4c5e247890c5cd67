use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};

/// Class names of the fruit model the demo ships with.
pub const FRUIT_CLASSES: &[&str] = &[
    "Apple",
    "Banana",
    "Black berry",
    "Carambola",
    "Chilli",
    "Coconut",
    "Dragon fruit",
    "Fig",
    "Grapes",
    "Lemon",
    "Lychee",
    "Papaya",
    "Persimmon",
    "Pomegranate",
    "Raspberry",
    "Tomato",
];

/// Stub backend for tests and model-less runs.
///
/// Replays a fixed list of detections on every image. Boxes are given in
/// normalized 0..1 coordinates and scaled to the image at detect time.
pub struct StubBackend {
    class_names: Vec<String>,
    script: Vec<Detection>,
    calls: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            class_names: FRUIT_CLASSES.iter().map(|c| c.to_string()).collect(),
            script: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build from a `stub://Label,Label,...` model path.
    pub fn from_model_path(path: &str) -> Self {
        let labels: Vec<&str> = path
            .strip_prefix("stub://")
            .unwrap_or(path)
            .split(',')
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .collect();
        Self::new().with_labels(&labels)
    }

    /// Script one full-confidence detection per label, left to right.
    ///
    /// Labels outside the fruit class list are appended as new classes.
    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        let count = labels.len().max(1) as f32;
        for (i, label) in labels.iter().enumerate() {
            let class_id = self.class_id_for(label);
            let x = i as f32 / count;
            self.script.push(Detection {
                class_id,
                bbox: BoundingBox::new(x + 0.02, 0.2, x + 0.9 / count, 0.8),
                confidence: 0.9,
            });
        }
        self
    }

    /// Script a single detection with an explicit normalized box and score.
    pub fn with_detection(mut self, label: &str, bbox: BoundingBox, confidence: f32) -> Self {
        let class_id = self.class_id_for(label);
        self.script.push(Detection {
            class_id,
            bbox,
            confidence,
        });
        self
    }

    /// Shared counter of `detect` invocations.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    fn class_id_for(&mut self, label: &str) -> usize {
        match self.class_names.iter().position(|name| name == label) {
            Some(id) => id,
            None => {
                self.class_names.push(label.to_string());
                self.class_names.len() - 1
            }
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn class_name(&self, class_id: usize) -> Option<&str> {
        self.class_names.get(class_id).map(String::as_str)
    }

    fn detect(&mut self, image: &RgbImage, confidence: f32) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (width, height) = image.dimensions();
        Ok(self
            .script
            .iter()
            .filter(|d| d.confidence >= confidence)
            .map(|d| Detection {
                bbox: d.bbox.scale(width as f32, height as f32),
                ..d.clone()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_script_scaled_to_image() {
        let mut backend = StubBackend::new().with_labels(&["Apple", "Apple"]);
        let image = RgbImage::new(100, 50);
        let detections = backend.detect(&image, 0.5).unwrap();
        assert_eq!(detections.len(), 2);
        assert!(detections.iter().all(|d| d.class_id == 0));
        assert!(detections[1].bbox.x1 > 50.0);
        assert!(detections[0].bbox.y2 <= 50.0);
        assert_eq!(backend.call_counter().load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_labels_become_new_classes() {
        let backend = StubBackend::from_model_path("stub://Kiwi, Apple");
        assert_eq!(backend.class_name(FRUIT_CLASSES.len()), Some("Kiwi"));
        assert_eq!(backend.class_name(0), Some("Apple"));
        assert_eq!(backend.class_name(99), None);
    }

    #[test]
    fn threshold_filters_low_scores() {
        let mut backend = StubBackend::new().with_detection(
            "Lemon",
            BoundingBox::new(0.1, 0.1, 0.5, 0.5),
            0.3,
        );
        let image = RgbImage::new(10, 10);
        assert!(backend.detect(&image, 0.5).unwrap().is_empty());
        assert_eq!(backend.detect(&image, 0.25).unwrap().len(), 1);
    }
}
