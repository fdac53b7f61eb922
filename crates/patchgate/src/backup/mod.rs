//! Timestamped snapshots of the artifact and their restoration.
//!
//! A snapshot is taken before anything is written and is verified byte for
//! byte against the artifact. Restoration goes through the same staging and
//! rename path as a commit and is verified afterwards, so the artifact is
//! never observed half restored.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, info, warn};

use crate::commit::stage_bytes;

const BACKUP_TARGET: &str = "patchgate::backup";

/// Failures while taking a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackupError {
    /// The artifact could not be read.
    #[error("failed to read {path} for backup: {message}")]
    ReadSource {
        /// Artifact path.
        path: Utf8PathBuf,
        /// I/O error description.
        message: String,
    },
    /// The copy could not be written.
    #[error("failed to write backup {path}: {message}")]
    Copy {
        /// Backup path.
        path: Utf8PathBuf,
        /// I/O error description.
        message: String,
    },
    /// The backup reads back empty while the artifact is not.
    #[error("backup {path} is empty")]
    Empty {
        /// Backup path.
        path: Utf8PathBuf,
    },
    /// The backup differs from the artifact.
    #[error("backup {path} does not match the artifact ({expected} bytes expected, {found} found)")]
    Mismatch {
        /// Backup path.
        path: Utf8PathBuf,
        /// Artifact length.
        expected: usize,
        /// Backup length.
        found: usize,
    },
    /// The artifact path has no file name to derive a backup name from.
    #[error("cannot derive a backup name from {path}")]
    InvalidSource {
        /// Artifact path.
        path: Utf8PathBuf,
    },
    /// The clock could not be formatted.
    #[error("failed to format backup timestamp: {message}")]
    Timestamp {
        /// Formatter error description.
        message: String,
    },
}

/// Failures while putting a snapshot back. These leave the artifact in an
/// unknown state and demand manual recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestoreError {
    /// The snapshot could not be written over the artifact.
    #[error("failed to restore {path} from {backup}: {message}")]
    Write {
        /// Artifact path.
        path: Utf8PathBuf,
        /// Backup path.
        backup: Utf8PathBuf,
        /// Error description.
        message: String,
    },
    /// The restored artifact does not match the snapshot.
    #[error("restored {path} does not match backup {backup}")]
    Verification {
        /// Artifact path.
        path: Utf8PathBuf,
        /// Backup path.
        backup: Utf8PathBuf,
    },
}

/// A verified snapshot of the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    source: Utf8PathBuf,
    path: Utf8PathBuf,
    timestamp_id: String,
    content: Vec<u8>,
}

impl Backup {
    /// Artifact the snapshot was taken from.
    #[must_use]
    pub fn source(&self) -> &Utf8Path {
        &self.source
    }

    /// Location of the snapshot on disk.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Timestamp component of the backup name.
    #[must_use]
    pub fn timestamp_id(&self) -> &str {
        &self.timestamp_id
    }

    /// Snapshot bytes.
    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

/// What a restore did to the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreAction {
    /// The artifact already matched the snapshot; nothing was written.
    Unchanged,
    /// The snapshot was written back.
    Restored,
}

/// Creates and restores backups under a fixed naming scheme:
/// `<artifact>.<suffix>_<YYYYMMDD_HHMMSS>`, optionally relocated into a
/// dedicated directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupStore {
    suffix: String,
    directory: Option<Utf8PathBuf>,
}

impl Default for BackupStore {
    fn default() -> Self {
        Self::new("bak")
    }
}

impl BackupStore {
    /// Store placing backups beside the artifact.
    #[must_use]
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            directory: None,
        }
    }

    /// Places backups in `directory` instead.
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<Utf8PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Path the backup of `artifact` taken at `timestamp_id` would use.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidSource`] when `artifact` has no file
    /// name.
    pub fn backup_path(
        &self,
        artifact: &Utf8Path,
        timestamp_id: &str,
    ) -> Result<Utf8PathBuf, BackupError> {
        let file_name = artifact
            .file_name()
            .ok_or_else(|| BackupError::InvalidSource {
                path: artifact.to_owned(),
            })?;
        let name = format!("{file_name}.{}_{timestamp_id}", self.suffix);
        Ok(match self.directory.as_deref() {
            Some(directory) => directory.join(name),
            None => artifact.with_file_name(name),
        })
    }

    /// Path the next snapshot of `artifact` at `timestamp_id` will be
    /// written to: [`BackupStore::backup_path`] with a `_N` suffix when
    /// earlier snapshots already took that name.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidSource`] when `artifact` has no file
    /// name.
    pub fn next_backup_path(
        &self,
        artifact: &Utf8Path,
        timestamp_id: &str,
    ) -> Result<Utf8PathBuf, BackupError> {
        self.backup_path(artifact, timestamp_id).map(unused_path)
    }

    /// Snapshots `artifact` using the current UTC time.
    ///
    /// # Errors
    ///
    /// Returns a [`BackupError`] when the timestamp cannot be formatted or the
    /// snapshot cannot be written and verified.
    pub fn snapshot(&self, artifact: &Utf8Path) -> Result<Backup, BackupError> {
        let timestamp_id = timestamp_id(OffsetDateTime::now_utc())?;
        self.snapshot_at(artifact, &timestamp_id)
    }

    /// Snapshots `artifact` under an explicit timestamp id.
    ///
    /// # Errors
    ///
    /// Returns a [`BackupError`] when the artifact cannot be read or the copy
    /// cannot be written, is empty, or differs from the artifact. A copy that
    /// fails verification is removed again.
    pub fn snapshot_at(&self, artifact: &Utf8Path, timestamp_id: &str) -> Result<Backup, BackupError> {
        let path = self.next_backup_path(artifact, timestamp_id)?;
        let content = fs::read(artifact).map_err(|error| BackupError::ReadSource {
            path: artifact.to_owned(),
            message: error.to_string(),
        })?;

        if let Some(directory) = self.directory.as_deref() {
            fs::create_dir_all(directory).map_err(|error| BackupError::Copy {
                path: path.clone(),
                message: error.to_string(),
            })?;
        }
        copy_verified(artifact, &path, &content)?;

        info!(
            target: BACKUP_TARGET,
            artifact = %artifact,
            backup = %path,
            bytes = content.len(),
            "backup created and verified"
        );
        Ok(Backup {
            source: artifact.to_owned(),
            path,
            timestamp_id: timestamp_id.to_owned(),
            content,
        })
    }

    /// Puts the snapshot back over its artifact. Restoring an artifact that
    /// already matches the snapshot is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a [`RestoreError`] when the write fails or the restored file
    /// does not read back identical to the snapshot.
    pub fn restore(&self, backup: &Backup) -> Result<RestoreAction, RestoreError> {
        let source = backup.source();
        if fs::read(source).is_ok_and(|current| current == backup.content) {
            debug!(target: BACKUP_TARGET, artifact = %source, "artifact already matches backup");
            return Ok(RestoreAction::Unchanged);
        }

        let write_error = |message: String| RestoreError::Write {
            path: source.to_owned(),
            backup: backup.path.clone(),
            message,
        };
        let staged = stage_bytes(source, &backup.content).map_err(|error| write_error(error.to_string()))?;
        staged
            .persist(source)
            .map_err(|error| write_error(error.error.to_string()))?;

        let restored = fs::read(source).map_err(|error| write_error(error.to_string()))?;
        if restored != backup.content {
            return Err(RestoreError::Verification {
                path: source.to_owned(),
                backup: backup.path.clone(),
            });
        }

        info!(
            target: BACKUP_TARGET,
            artifact = %source,
            backup = %backup.path,
            "artifact restored from backup"
        );
        Ok(RestoreAction::Restored)
    }
}

/// Copies `artifact` to `path` and checks the copy against `expected`, the
/// artifact content read beforehand. On failure nothing is left at `path`.
fn copy_verified(artifact: &Utf8Path, path: &Utf8Path, expected: &[u8]) -> Result<(), BackupError> {
    let verified = fs::copy(artifact, path)
        .and_then(|_| fs::read(path))
        .map_err(|error| BackupError::Copy {
            path: path.to_owned(),
            message: error.to_string(),
        })
        .and_then(|written| {
            if written.is_empty() && !expected.is_empty() {
                Err(BackupError::Empty {
                    path: path.to_owned(),
                })
            } else if written == expected {
                Ok(())
            } else {
                Err(BackupError::Mismatch {
                    path: path.to_owned(),
                    expected: expected.len(),
                    found: written.len(),
                })
            }
        });
    if verified.is_err() {
        discard_failed_copy(path);
    }
    verified
}

fn discard_failed_copy(path: &Utf8Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(target: BACKUP_TARGET, backup = %path, "unverified backup removed"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!(
            target: BACKUP_TARGET,
            backup = %path,
            %error,
            "unverified backup could not be removed"
        ),
    }
}

/// Appends `_1`, `_2`, ... until the path names nothing on disk, so a
/// second snapshot within the same second never overwrites the first.
fn unused_path(path: Utf8PathBuf) -> Utf8PathBuf {
    if !path.exists() {
        return path;
    }
    (1_u32..)
        .map(|n| Utf8PathBuf::from(format!("{path}_{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

/// Formats `now` as the `YYYYMMDD_HHMMSS` backup id.
///
/// # Errors
///
/// Returns [`BackupError::Timestamp`] when formatting fails.
pub fn timestamp_id(now: OffsetDateTime) -> Result<String, BackupError> {
    now.format(format_description!("[year][month][day]_[hour][minute][second]"))
        .map_err(|error| BackupError::Timestamp {
            message: error.to_string(),
        })
}
