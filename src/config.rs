use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::capture::CameraConfig;
use crate::storage::{ArtifactLayout, StorageLayout};

const DEFAULT_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_UPLOAD_DIR: &str = "static/uploads";
const DEFAULT_RESULT_DIR: &str = "static/results";
const DEFAULT_MODEL_PATH: &str = "best.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    addr: Option<String>,
    confidence: Option<f32>,
    max_upload_bytes: Option<usize>,
    storage: Option<StorageConfigFile>,
    model: Option<ModelConfigFile>,
    camera: Option<CameraConfigFile>,
    labels: Option<LabelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    upload_dir: Option<PathBuf>,
    result_dir: Option<PathBuf>,
    layout: Option<ArtifactLayout>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<String>,
    url: Option<String>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct LabelConfigFile {
    glyphs: Option<BTreeMap<String, String>>,
    default_glyph: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub addr: String,
    pub confidence: f32,
    pub max_upload_bytes: usize,
    pub storage: StorageSettings,
    pub model: ModelSettings,
    /// Live capture is enabled only when a camera device is configured.
    pub camera: Option<CameraConfig>,
    pub labels: LabelSettings,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub upload_dir: PathBuf,
    pub result_dir: PathBuf,
    pub layout: ArtifactLayout,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// ONNX file path, or `stub://Label,...` for the stub backend.
    pub path: String,
    /// Where to fetch the model from when `path` does not exist.
    pub url: Option<String>,
    pub input_size: u32,
    pub class_names: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LabelSettings {
    pub glyphs: BTreeMap<String, String>,
    pub default_glyph: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_MODEL_PATH.to_string(),
            url: None,
            input_size: DEFAULT_INPUT_SIZE,
            class_names: Vec::new(),
        }
    }
}

impl StorageSettings {
    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.upload_dir, &self.result_dir, self.layout)
    }
}

impl AppConfig {
    /// Load from the file named by `FRUIT_CONFIG` (if set), then environment.
    pub fn load() -> Result<Self> {
        let config_path = non_empty_env("FRUIT_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let storage = file.storage.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let labels = file.labels.unwrap_or_default();
        let camera = file.camera.and_then(|camera| {
            camera.device.map(|device| CameraConfig {
                device,
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            })
        });
        Self {
            addr: file.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            confidence: file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            max_upload_bytes: file.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            storage: StorageSettings {
                upload_dir: storage
                    .upload_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
                result_dir: storage
                    .result_dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULT_DIR)),
                layout: storage.layout.unwrap_or_default(),
            },
            model: ModelSettings {
                path: model
                    .path
                    .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
                url: model.url,
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                class_names: model.class_names.unwrap_or_default(),
            },
            camera,
            labels: LabelSettings {
                glyphs: labels.glyphs.unwrap_or_default(),
                default_glyph: labels.default_glyph,
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("FRUIT_ADDR") {
            self.addr = addr;
        }
        if let Some(path) = non_empty_env("FRUIT_MODEL_PATH") {
            self.model.path = path;
        }
        if let Some(url) = non_empty_env("FRUIT_MODEL_URL") {
            self.model.url = Some(url);
        }
        if let Some(dir) = non_empty_env("FRUIT_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_env("FRUIT_RESULT_DIR") {
            self.storage.result_dir = PathBuf::from(dir);
        }
        if let Some(layout) = non_empty_env("FRUIT_ARTIFACT_LAYOUT") {
            self.storage.layout = layout.parse()?;
        }
        if let Some(device) = non_empty_env("FRUIT_CAMERA_DEVICE") {
            match self.camera.as_mut() {
                Some(camera) => camera.device = device,
                None => {
                    self.camera = Some(CameraConfig {
                        device,
                        target_fps: DEFAULT_CAMERA_FPS,
                        width: DEFAULT_CAMERA_WIDTH,
                        height: DEFAULT_CAMERA_HEIGHT,
                    })
                }
            }
        }
        if let Some(confidence) = non_empty_env("FRUIT_CONFIDENCE") {
            self.confidence = confidence
                .parse()
                .map_err(|_| anyhow!("FRUIT_CONFIDENCE must be a number between 0 and 1"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "confidence must be between 0 and 1, got {}",
                self.confidence
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }
        if self.model.path.trim().is_empty() {
            return Err(anyhow!("model path must not be empty"));
        }
        if self.model.input_size == 0 || self.model.input_size % 32 != 0 {
            return Err(anyhow!(
                "model input_size must be a positive multiple of 32, got {}",
                self.model.input_size
            ));
        }
        if self.storage.upload_dir == self.storage.result_dir {
            return Err(anyhow!("upload_dir and result_dir must differ"));
        }
        if let Some(camera) = &self.camera {
            if camera.width == 0 || camera.height == 0 {
                return Err(anyhow!("camera width and height must be greater than zero"));
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_file(AppConfigFile::default())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
