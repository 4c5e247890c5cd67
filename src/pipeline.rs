//! Upload-to-result pipeline.
//!
//! save → detect → label-extract → locate → present. One detector call per
//! run, executed on the caller's thread.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::detect::Detector;
use crate::error::PipelineError;
use crate::labels::LabelEmojiTable;
use crate::locate::locate;
use crate::storage::{sanitize_filename, StorageLayout};

/// Default score threshold for a detection to count.
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// A file received from a client.
#[derive(Clone, Debug)]
pub struct UploadedAsset {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedAsset {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

/// Inputs of one detector call.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRequest {
    pub asset_path: PathBuf,
    pub confidence: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    /// Distinct class labels, however many boxes reported each one.
    pub labels: BTreeSet<String>,
    pub output_path: PathBuf,
}

/// View-ready outcome of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct Presentation {
    pub image_url: String,
    pub display: Vec<String>,
}

pub struct DetectionPipeline {
    detector: Detector,
    storage: StorageLayout,
    labels: Arc<LabelEmojiTable>,
    confidence: f32,
}

impl DetectionPipeline {
    pub fn new(detector: Detector, storage: StorageLayout, labels: Arc<LabelEmojiTable>) -> Self {
        Self {
            detector,
            storage,
            labels,
            confidence: DEFAULT_CONFIDENCE,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn storage(&self) -> &StorageLayout {
        &self.storage
    }

    pub fn labels(&self) -> &LabelEmojiTable {
        &self.labels
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn run(
        &self,
        asset: UploadedAsset,
        confidence: f32,
    ) -> Result<DetectionResult, PipelineError> {
        let filename =
            sanitize_filename(&asset.filename).ok_or(PipelineError::NoFileSubmitted)?;

        let space = self.storage.run_space()?;
        let request = DetectionRequest {
            asset_path: space.upload_dir.join(&filename),
            confidence,
        };
        fs::write(&request.asset_path, &asset.bytes)
            .map_err(|err| PipelineError::storage(&request.asset_path, err))?;
        log::info!(
            "saved upload {} ({} bytes)",
            request.asset_path.display(),
            asset.bytes.len()
        );

        let prediction = self
            .detector
            .predict(&request.asset_path, request.confidence, &space.output_dir)
            .map_err(PipelineError::Detector)?;
        log::debug!("annotator wrote {}", prediction.written.display());

        let labels = self
            .detector
            .label_set(&prediction.detections)
            .map_err(PipelineError::Detector)?;

        let output_path = locate(&space.output_dir.join(&filename), &space.output_dir)?;
        log::info!(
            "detected {} boxes, labels {:?}, artifact {}",
            prediction.detections.len(),
            labels,
            output_path.display()
        );

        Ok(DetectionResult {
            labels,
            output_path,
        })
    }

    /// Turn a result into what the result page shows.
    pub fn present(&self, result: &DetectionResult) -> Result<Presentation, PipelineError> {
        let image_url = self.storage.result_url(&result.output_path).ok_or_else(|| {
            PipelineError::ArtifactNotFound {
                dir: self.storage.result_dir().to_path_buf(),
            }
        })?;
        Ok(Presentation {
            image_url,
            display: self.labels.map_all(&result.labels),
        })
    }
}
