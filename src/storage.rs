//! Flat-file storage for uploads and annotated results.
//!
//! Two directories, both created at startup. In the `shared` layout every run
//! writes straight into them, keyed by the uploaded filename; a same-named
//! concurrent upload overwrites the other. The `per-request` layout gives each
//! run its own randomly named subdirectory in both places.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::RngCore;
use serde::Deserialize;

use crate::error::PipelineError;

pub const UPLOADS_AREA: &str = "uploads";
pub const RESULTS_AREA: &str = "results";

/// Bytes escaped inside one URL path segment (RFC 3986 unreserved are kept).
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactLayout {
    /// One results directory for everyone; the locator falls back to the
    /// newest image when the expected name is missing.
    Shared,
    /// A fresh namespace per run.
    #[default]
    PerRequest,
}

impl std::str::FromStr for ArtifactLayout {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "per-request" | "per_request" => Ok(Self::PerRequest),
            other => Err(anyhow::anyhow!(
                "unknown artifact layout '{}'; expected shared or per-request",
                other
            )),
        }
    }
}

/// Directories one pipeline run reads and writes.
#[derive(Clone, Debug)]
pub struct RunSpace {
    pub id: Option<String>,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct StorageLayout {
    upload_dir: PathBuf,
    result_dir: PathBuf,
    layout: ArtifactLayout,
}

impl StorageLayout {
    pub fn new(
        upload_dir: impl Into<PathBuf>,
        result_dir: impl Into<PathBuf>,
        layout: ArtifactLayout,
    ) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            result_dir: result_dir.into(),
            layout,
        }
    }

    /// Create both storage directories if absent.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.upload_dir, &self.result_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("create storage directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    pub fn layout(&self) -> ArtifactLayout {
        self.layout
    }

    /// Allocate the directories for one run.
    pub fn run_space(&self) -> Result<RunSpace, PipelineError> {
        match self.layout {
            ArtifactLayout::Shared => Ok(RunSpace {
                id: None,
                upload_dir: self.upload_dir.clone(),
                output_dir: self.result_dir.clone(),
            }),
            ArtifactLayout::PerRequest => {
                let id = run_id();
                let space = RunSpace {
                    upload_dir: self.upload_dir.join(&id),
                    output_dir: self.result_dir.join(&id),
                    id: Some(id),
                };
                for dir in [&space.upload_dir, &space.output_dir] {
                    fs::create_dir_all(dir).map_err(|err| PipelineError::storage(dir, err))?;
                }
                Ok(space)
            }
        }
    }

    /// Public URL of a file under the results directory.
    pub fn result_url(&self, artifact: &Path) -> Option<String> {
        let relative = artifact.strip_prefix(&self.result_dir).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| match c {
                Component::Normal(part) => {
                    Some(utf8_percent_encode(&part.to_string_lossy(), SEGMENT).to_string())
                }
                _ => None,
            })
            .collect::<Option<_>>()?;
        Some(format!("/static/{}/{}", RESULTS_AREA, parts.join("/")))
    }

    /// Map `/static/<area>/<relative>` back to a stored file.
    ///
    /// `relative` is the percent-encoded request path. Segments are decoded
    /// one at a time and anything that is not a plain relative path inside the
    /// area is rejected.
    pub fn resolve_static(&self, area: &str, relative: &str) -> Option<PathBuf> {
        let root = match area {
            UPLOADS_AREA => &self.upload_dir,
            RESULTS_AREA => &self.result_dir,
            _ => return None,
        };
        let mut path = root.clone();
        let mut depth = 0;
        for raw in relative.split('/') {
            let part = percent_decode_str(raw).decode_utf8().ok()?;
            if part.is_empty()
                || part == "."
                || part == ".."
                || part.contains(['/', '\\', '\0'])
            {
                return None;
            }
            path.push(&*part);
            depth += 1;
        }
        (depth > 0).then_some(path)
    }
}

/// Reduce a client-supplied filename to its final path component.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

fn run_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_filename("apple.jpg").as_deref(), Some("apple.jpg"));
        assert_eq!(
            sanitize_filename("../../etc/apple.jpg").as_deref(),
            Some("apple.jpg")
        );
        assert_eq!(
            sanitize_filename("C:\\photos\\kiwi.png").as_deref(),
            Some("kiwi.png")
        );
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("dir/"), None);
        assert_eq!(sanitize_filename(".."), None);
    }

    #[test]
    fn per_request_spaces_are_distinct() {
        let dir = tempdir().unwrap();
        let storage = StorageLayout::new(
            dir.path().join("uploads"),
            dir.path().join("results"),
            ArtifactLayout::PerRequest,
        );
        storage.ensure().unwrap();
        let a = storage.run_space().unwrap();
        let b = storage.run_space().unwrap();
        assert_ne!(a.output_dir, b.output_dir);
        assert!(a.output_dir.is_dir() && a.upload_dir.is_dir());
        assert_eq!(a.id.as_ref().map(String::len), Some(16));
    }

    #[test]
    fn shared_space_is_the_results_dir() {
        let storage = StorageLayout::new("u", "r", ArtifactLayout::Shared);
        let space = storage.run_space().unwrap();
        assert_eq!(space.output_dir, PathBuf::from("r"));
        assert!(space.id.is_none());
    }

    #[test]
    fn result_urls_and_static_paths_round_trip() {
        let storage = StorageLayout::new("static/uploads", "static/results", ArtifactLayout::Shared);
        let artifact = Path::new("static/results/0a1b/apple.jpg");
        assert_eq!(
            storage.result_url(artifact).as_deref(),
            Some("/static/results/0a1b/apple.jpg")
        );
        assert_eq!(
            storage.resolve_static(RESULTS_AREA, "0a1b/apple.jpg"),
            Some(PathBuf::from("static/results/0a1b/apple.jpg"))
        );
        assert_eq!(storage.result_url(Path::new("elsewhere/apple.jpg")), None);
    }

    #[test]
    fn result_urls_escape_and_static_paths_decode() {
        let storage = StorageLayout::new("static/uploads", "static/results", ArtifactLayout::Shared);
        let url = storage
            .result_url(Path::new("static/results/my apple#1?.png"))
            .unwrap();
        assert_eq!(url, "/static/results/my%20apple%231%3F.png");
        assert_eq!(
            storage.resolve_static(RESULTS_AREA, "my%20apple%231%3F.png"),
            Some(PathBuf::from("static/results/my apple#1?.png"))
        );
        let url = storage.result_url(Path::new("static/results/pêche.jpg")).unwrap();
        assert_eq!(url, "/static/results/p%C3%AAche.jpg");
        assert_eq!(
            storage.resolve_static(RESULTS_AREA, "p%C3%AAche.jpg"),
            Some(PathBuf::from("static/results/pêche.jpg"))
        );
    }

    #[test]
    fn encoded_traversal_is_rejected() {
        let storage = StorageLayout::new("u", "r", ArtifactLayout::Shared);
        assert_eq!(storage.resolve_static(RESULTS_AREA, "%2E%2E/secret"), None);
        assert_eq!(storage.resolve_static(RESULTS_AREA, "a%2F..%2Fsecret"), None);
        assert_eq!(storage.resolve_static(RESULTS_AREA, "a%5Cb"), None);
        assert_eq!(storage.resolve_static(RESULTS_AREA, "%FF.jpg"), None);
    }

    #[test]
    fn static_traversal_is_rejected() {
        let storage = StorageLayout::new("u", "r", ArtifactLayout::Shared);
        assert_eq!(storage.resolve_static(RESULTS_AREA, "../secret"), None);
        assert_eq!(storage.resolve_static(RESULTS_AREA, ""), None);
        assert_eq!(storage.resolve_static("models", "best.onnx"), None);
    }

    #[test]
    fn layout_parses_from_text() {
        assert_eq!("shared".parse::<ArtifactLayout>().unwrap(), ArtifactLayout::Shared);
        assert_eq!(
            "Per-Request".parse::<ArtifactLayout>().unwrap(),
            ArtifactLayout::PerRequest
        );
        assert!("tmp".parse::<ArtifactLayout>().is_err());
    }
}
