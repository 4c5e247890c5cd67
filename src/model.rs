//! Model file acquisition.
//!
//! The server loads its model from a local path. When the file is missing and
//! a download URL is configured, it is fetched once at startup.

use std::path::Path;

use anyhow::{anyhow, Result};

use crate::config::ModelSettings;

/// What `ensure_model` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelStatus {
    /// Not a file-backed model (`stub://`).
    Virtual,
    /// The file was already present.
    Present,
    /// The file was fetched from the configured URL.
    Downloaded,
}

pub fn ensure_model(settings: &ModelSettings) -> Result<ModelStatus> {
    if settings.path.starts_with("stub://") {
        return Ok(ModelStatus::Virtual);
    }
    let path = Path::new(&settings.path);
    if path.is_file() {
        log::info!("model {} already present, skipping download", path.display());
        return Ok(ModelStatus::Present);
    }
    let url = settings.url.as_deref().ok_or_else(|| {
        anyhow!(
            "model {} not found and no download url configured",
            path.display()
        )
    })?;
    download(url, path)?;
    Ok(ModelStatus::Downloaded)
}

#[cfg(feature = "model-download")]
fn download(url: &str, path: &Path) -> Result<()> {
    use anyhow::Context;
    use std::io::{BufWriter, Write};

    log::info!("downloading model from {} to {}", url, path.display());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create model directory {}", parent.display()))?;
    }
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch model from {}", url))?;

    let partial = path.with_extension("part");
    let file = std::fs::File::create(&partial)
        .with_context(|| format!("create {}", partial.display()))?;
    let mut writer = BufWriter::new(file);
    let written = std::io::copy(&mut response.into_reader(), &mut writer)
        .context("write model download")?;
    writer.flush().context("flush model download")?;
    if written == 0 {
        let _ = std::fs::remove_file(&partial);
        return Err(anyhow!("model download from {} was empty", url));
    }
    std::fs::rename(&partial, path)
        .with_context(|| format!("move model into place at {}", path.display()))?;
    log::info!("model downloaded ({} bytes)", written);
    Ok(())
}

#[cfg(not(feature = "model-download"))]
fn download(url: &str, path: &Path) -> Result<()> {
    Err(anyhow!(
        "model {} is missing; downloading from {} requires the model-download feature",
        path.display(),
        url
    ))
}
