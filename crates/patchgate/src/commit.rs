//! Atomic replacement of the artifact.
//!
//! Content is written to a temporary file beside the artifact, read back and
//! checked, then renamed over the artifact. The rename is the only step that
//! touches the live path, so an interruption before it leaves the artifact
//! exactly as it was.

use std::fs;
use std::io::Write as IoWrite;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

const COMMIT_TARGET: &str = "patchgate::commit";

/// Failures while staging or committing a write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The staging file could not be created or written.
    #[error("failed to stage write for {path}: {message}")]
    Stage {
        /// Artifact being written.
        path: Utf8PathBuf,
        /// I/O error description.
        message: String,
    },
    /// The staged bytes differ from the intended content.
    #[error("staged copy of {path} does not match the intended content ({expected} bytes expected, {found} found)")]
    Mismatch {
        /// Artifact being written.
        path: Utf8PathBuf,
        /// Intended length.
        expected: usize,
        /// Length read back.
        found: usize,
    },
    /// The content to commit is empty.
    #[error("refusing to commit empty content to {path}")]
    Empty {
        /// Artifact being written.
        path: Utf8PathBuf,
    },
    /// The staged copy lacks the marker that proves the patch is in it.
    #[error("staged copy of {path} is missing marker '{marker}'")]
    MissingMarker {
        /// Artifact being written.
        path: Utf8PathBuf,
        /// Marker that was expected.
        marker: String,
    },
    /// The atomic rename failed.
    #[error("failed to replace {path}: {message}")]
    Persist {
        /// Artifact being written.
        path: Utf8PathBuf,
        /// I/O error description.
        message: String,
    },
}

impl WriteError {
    fn stage(path: &Utf8Path, error: &std::io::Error) -> Self {
        Self::Stage {
            path: path.to_owned(),
            message: error.to_string(),
        }
    }
}

/// A verified staging file awaiting its rename.
///
/// Dropping a `StagedWrite` without calling [`StagedWrite::persist`] removes
/// the staging file and leaves the artifact untouched.
#[derive(Debug)]
pub struct StagedWrite {
    target: Utf8PathBuf,
    temp: NamedTempFile,
}

impl StagedWrite {
    /// Location of the staging file.
    #[must_use]
    pub fn staging_path(&self) -> &Path {
        self.temp.path()
    }

    /// Artifact the staged content will replace.
    #[must_use]
    pub fn target(&self) -> &Utf8Path {
        &self.target
    }

    /// Renames the staging file over the artifact.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Persist`] when the rename fails; the staging
    /// file is removed and the artifact is unchanged.
    pub fn persist(self) -> Result<(), WriteError> {
        let Self { target, temp } = self;
        temp.persist(&target).map_err(|error| WriteError::Persist {
            message: error.error.to_string(),
            path: target.clone(),
        })?;
        debug!(target: COMMIT_TARGET, path = %target, "staged write persisted");
        Ok(())
    }
}

/// Stages, verifies and commits whole-file writes.
#[derive(Debug, Clone, Default)]
pub struct AtomicWriter {
    marker: Option<String>,
}

impl AtomicWriter {
    /// Writer that only checks byte equality and non-emptiness.
    #[must_use]
    pub const fn new() -> Self {
        Self { marker: None }
    }

    /// Additionally requires `marker` in the staged copy.
    #[must_use]
    pub fn with_marker(marker: impl Into<String>) -> Self {
        Self {
            marker: Some(marker.into()),
        }
    }

    /// Writes `content` to a staging file beside `target` and verifies it.
    ///
    /// # Errors
    ///
    /// Returns a [`WriteError`] when the content is empty, the staging file
    /// cannot be written, or the read-back differs or lacks the marker.
    pub fn stage(&self, target: &Utf8Path, content: &str) -> Result<StagedWrite, WriteError> {
        if content.is_empty() {
            return Err(WriteError::Empty {
                path: target.to_owned(),
            });
        }

        let temp = stage_bytes(target, content.as_bytes())?;
        let staged = fs::read(temp.path()).map_err(|error| WriteError::stage(target, &error))?;
        if staged != content.as_bytes() {
            return Err(WriteError::Mismatch {
                path: target.to_owned(),
                expected: content.len(),
                found: staged.len(),
            });
        }
        if let Some(marker) = self.marker.as_deref() {
            let text = String::from_utf8_lossy(&staged);
            if !text.contains(marker) {
                return Err(WriteError::MissingMarker {
                    path: target.to_owned(),
                    marker: marker.to_owned(),
                });
            }
        }

        debug!(
            target: COMMIT_TARGET,
            path = %target,
            staging = %temp.path().display(),
            bytes = content.len(),
            "write staged and verified"
        );
        Ok(StagedWrite {
            target: target.to_owned(),
            temp,
        })
    }

    /// Stages and persists `content` over `target`.
    ///
    /// # Errors
    ///
    /// Returns any [`WriteError`] from staging or the rename.
    pub fn commit(&self, target: &Utf8Path, content: &str) -> Result<(), WriteError> {
        self.stage(target, content)?.persist()
    }
}

/// Writes `bytes` into a temporary file in the target's directory, copying
/// the target's permissions when it exists.
pub(crate) fn stage_bytes(target: &Utf8Path, bytes: &[u8]) -> Result<NamedTempFile, WriteError> {
    let parent = match target.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let mut temp =
        NamedTempFile::new_in(parent).map_err(|error| WriteError::stage(target, &error))?;
    temp.write_all(bytes)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|error| WriteError::stage(target, &error))?;

    if let Ok(metadata) = fs::metadata(target) {
        fs::set_permissions(temp.path(), metadata.permissions())
            .map_err(|error| WriteError::stage(target, &error))?;
    }
    Ok(temp)
}
