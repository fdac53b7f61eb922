//! Errors surfaced by the CLI before or after a pipeline run.

use std::io;
use std::sync::Arc;

use patchgate::ManifestError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("failed to write the report: {0}")]
    WriteReport(#[source] io::Error),
}
