//! Result locator.
//!
//! Finds the annotated artifact a detector run produced. The exact expected
//! path is tried first. If the detector renamed or re-extensioned its output,
//! the output directory is scanned for images and the most recently created
//! one wins. Under concurrent runs sharing one directory the scan can pick up
//! another run's artifact; the per-request artifact layout avoids that.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::PipelineError;

/// Extensions the fallback scan treats as images.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub fn locate(expected: &Path, output_dir: &Path) -> Result<PathBuf, PipelineError> {
    if expected.is_file() {
        return Ok(expected.to_path_buf());
    }

    log::debug!(
        "artifact {} missing, scanning {}",
        expected.display(),
        output_dir.display()
    );
    newest_image(output_dir)?.ok_or_else(|| PipelineError::ArtifactNotFound {
        dir: output_dir.to_path_buf(),
    })
}

fn newest_image(dir: &Path) -> Result<Option<PathBuf>, PipelineError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(PipelineError::storage(dir, err)),
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::storage(dir, err))?;
        let path = entry.path();
        if !has_image_extension(&path) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        // Not every filesystem records birth time.
        let Ok(stamp) = metadata.created().or_else(|_| metadata.modified()) else {
            continue;
        };
        if newest.as_ref().map_or(true, |(best, _)| stamp > *best) {
            newest = Some((stamp, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
