use std::path::PathBuf;

use thiserror::Error;

/// Failures of a single detection run.
///
/// `NoFileSubmitted` and `ArtifactNotFound` are user-facing and answered with a
/// plain-text message. The remaining variants are server faults.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no file submitted")]
    NoFileSubmitted,

    #[error("no annotated image found in {}", dir.display())]
    ArtifactNotFound { dir: PathBuf },

    #[error("storage failure at {}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("detector failed")]
    Detector(#[source] anyhow::Error),
}

impl PipelineError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Message shown to the submitter, if this failure is theirs to see.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::NoFileSubmitted => Some(crate::views::MSG_NO_FILE_SELECTED),
            Self::ArtifactNotFound { .. } => Some(crate::views::MSG_NO_ARTIFACT),
            Self::Storage { .. } | Self::Detector(_) => None,
        }
    }
}
