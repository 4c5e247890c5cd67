//! Detection capability.
//!
//! A `Detector` pairs the shared model backend with the annotator that writes
//! the overlaid copy of each input. The pipeline and the live stream both go
//! through it, so the model is loaded exactly once per process.

mod annotate;
mod backend;
mod backends;
mod registry;
mod result;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

pub use annotate::Annotator;
pub use backend::DetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::{StubBackend, FRUIT_CLASSES};
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{non_max_suppression, BoundingBox, Detection};

use crate::config::ModelSettings;

/// Outcome of one `Detector::predict` call.
#[derive(Clone, Debug)]
pub struct Prediction {
    pub detections: Vec<Detection>,
    /// Where the annotator wrote the overlay.
    pub written: PathBuf,
}

#[derive(Clone)]
pub struct Detector {
    backend: SharedBackend,
    annotator: Annotator,
}

impl Detector {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            annotator: Annotator::default(),
        }
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    /// Detect on an image file and write its annotated copy into `output_dir`.
    pub fn predict(&self, source: &Path, confidence: f32, output_dir: &Path) -> Result<Prediction> {
        let bytes = std::fs::read(source)
            .with_context(|| format!("read image {}", source.display()))?;
        // Format comes from the content; upload names are not trusted.
        let mut image = image::load_from_memory(&bytes)
            .with_context(|| format!("decode image {}", source.display()))?
            .into_rgb8();
        let detections = self.run(&image, confidence)?;
        self.annotator.draw(&mut image, &detections);
        let written = self.annotator.write(&image, source, output_dir)?;
        Ok(Prediction {
            detections,
            written,
        })
    }

    /// Detect on a captured frame and draw the boxes onto it in place.
    pub fn annotate_frame(&self, frame: &mut RgbImage, confidence: f32) -> Result<Vec<Detection>> {
        let detections = self.run(frame, confidence)?;
        self.annotator.draw(frame, &detections);
        Ok(detections)
    }

    /// Distinct class labels of a detection list.
    ///
    /// Ids the model has no name for are reported as `class_<id>`.
    pub fn label_set(&self, detections: &[Detection]) -> Result<BTreeSet<String>> {
        let backend = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector backend lock poisoned"))?;
        Ok(detections
            .iter()
            .map(|d| {
                backend
                    .class_name(d.class_id)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("class_{}", d.class_id))
            })
            .collect())
    }

    fn run(&self, image: &RgbImage, confidence: f32) -> Result<Vec<Detection>> {
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector backend lock poisoned"))?;
        backend.detect(image, confidence)
    }
}

/// Load the backend named by the model settings.
///
/// `stub://` paths give a `StubBackend`; anything else is an ONNX model file
/// and needs the `backend-tract` feature.
pub fn open_backend(settings: &ModelSettings) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    if settings.path.starts_with("stub://") {
        registry.register(StubBackend::from_model_path(&settings.path));
    } else {
        #[cfg(feature = "backend-tract")]
        {
            let names = resolve_class_names(settings)?;
            let mut backend =
                TractBackend::with_input_size(&settings.path, names, settings.input_size)?;
            backend.warm_up().context("warm up detector")?;
            registry.register(backend);
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            return Err(anyhow!(
                "model {} requires the backend-tract feature",
                settings.path
            ));
        }
    }
    log::info!("detector backends loaded: {:?}", registry.list());
    Ok(registry)
}

/// Class names from `<model>.names` if present, else from configuration,
/// else the fruit classes.
pub fn resolve_class_names(settings: &ModelSettings) -> Result<Vec<String>> {
    let names_path = Path::new(&settings.path).with_extension("names");
    if names_path.is_file() {
        let raw = std::fs::read_to_string(&names_path)
            .with_context(|| format!("read class names {}", names_path.display()))?;
        return Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect());
    }
    if !settings.class_names.is_empty() {
        return Ok(settings.class_names.clone());
    }
    Ok(FRUIT_CLASSES.iter().map(|c| c.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn settings(path: &str) -> ModelSettings {
        ModelSettings {
            path: path.to_string(),
            ..ModelSettings::default()
        }
    }

    #[test]
    fn label_set_collapses_duplicates_and_names_unknown_ids() {
        let backend: SharedBackend = Arc::new(Mutex::new(StubBackend::new()));
        let detector = Detector::new(backend);
        let boxed = |class_id| Detection {
            class_id,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            confidence: 0.9,
        };
        let labels = detector
            .label_set(&[boxed(0), boxed(0), boxed(500)])
            .unwrap();
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        assert_eq!(labels, vec!["Apple", "class_500"]);
    }

    #[test]
    fn stub_paths_open_stub_backend() {
        let registry = open_backend(&settings("stub://Apple")).unwrap();
        assert_eq!(registry.list(), vec!["stub".to_string()]);
    }

    #[test]
    fn names_file_next_to_model_wins() {
        let dir = tempdir().unwrap();
        let model = dir.path().join("best.onnx");
        std::fs::write(model.with_extension("names"), "Kiwi\n\nMango\n").unwrap();
        let mut cfg = settings(&model.to_string_lossy());
        cfg.class_names = vec!["Ignored".to_string()];
        assert_eq!(resolve_class_names(&cfg).unwrap(), vec!["Kiwi", "Mango"]);
    }

    #[test]
    fn configured_names_beat_builtin() {
        let mut cfg = settings("/nonexistent/best.onnx");
        assert_eq!(resolve_class_names(&cfg).unwrap().len(), FRUIT_CLASSES.len());
        cfg.class_names = vec!["Kiwi".to_string()];
        assert_eq!(resolve_class_names(&cfg).unwrap(), vec!["Kiwi"]);
    }
}
