//! Fruit Lens
//!
//! Upload an image (or point a camera at a fruit bowl) and get back the image
//! with detection boxes drawn on it, plus a glyph-decorated list of the fruit
//! classes found.
//!
//! # Module Structure
//!
//! - `pipeline`: upload → detect → locate artifact → present
//! - `detect`: detector backends, annotation, non-maximum suppression
//! - `capture`: camera sources for the live stream
//! - `stream`: MJPEG live detection stream
//! - `api`: HTTP front end
//! - `storage`, `locate`: upload and result directories, artifact lookup
//! - `labels`, `views`: label glyphs and HTML pages
//! - `config`, `model`: runtime configuration and model provisioning

use std::sync::Arc;

pub mod api;
pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod labels;
pub mod locate;
pub mod model;
pub mod pipeline;
pub mod storage;
pub mod stream;
pub mod views;

pub use config::AppConfig;
pub use detect::{Detection, Detector, SharedBackend, StubBackend};
pub use error::PipelineError;
pub use labels::LabelEmojiTable;
pub use pipeline::{DetectionPipeline, DetectionResult, Presentation, UploadedAsset};
pub use storage::{ArtifactLayout, StorageLayout};

/// Glyph table described by the configuration.
pub fn label_table(cfg: &AppConfig) -> LabelEmojiTable {
    let table = LabelEmojiTable::with_overrides(cfg.labels.glyphs.clone());
    match &cfg.labels.default_glyph {
        Some(glyph) => table.with_default_glyph(glyph.clone()),
        None => table,
    }
}

/// Wire a pipeline from configuration around an already-loaded backend.
pub fn build_pipeline(cfg: &AppConfig, backend: SharedBackend) -> DetectionPipeline {
    DetectionPipeline::new(
        Detector::new(backend),
        cfg.storage.layout(),
        Arc::new(label_table(cfg)),
    )
    .with_confidence(cfg.confidence)
}

/// HTTP settings derived from the application configuration.
pub fn api_config(cfg: &AppConfig) -> api::ApiConfig {
    api::ApiConfig {
        addr: cfg.addr.clone(),
        max_upload_bytes: cfg.max_upload_bytes,
        camera: cfg.camera.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_glyphs_override_builtin() {
        let mut cfg = AppConfig::default();
        cfg.labels.glyphs.insert("Kiwi".to_string(), "🥝".to_string());
        cfg.labels.default_glyph = Some("❓".to_string());
        let table = label_table(&cfg);
        assert_eq!(table.glyph("Kiwi"), "🥝");
        assert_eq!(table.glyph("Apple"), "🍎");
        assert_eq!(table.glyph("Durian"), "❓");
    }

    #[test]
    fn api_config_mirrors_app_config() {
        let mut cfg = AppConfig::default();
        cfg.addr = "127.0.0.1:0".to_string();
        cfg.max_upload_bytes = 1024;
        let api = api_config(&cfg);
        assert_eq!(api.addr, "127.0.0.1:0");
        assert_eq!(api.max_upload_bytes, 1024);
        assert!(api.camera.is_none());
    }
}
