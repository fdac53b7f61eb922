//! Command-line argument definitions.

use camino::Utf8PathBuf;
use clap::Parser;

/// Applies one patch operation transactionally.
///
/// Runtime settings (`--log-filter`, `--log-format`, `--rollback-policy`,
/// `--backup-suffix`, `--backup-dir`, `--config-path`) must precede the
/// manifest path.
#[derive(Parser, Debug)]
#[command(name = "patchgate", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Operation manifest (TOML) describing the artifact, patch and checks.
    #[arg(value_name = "MANIFEST")]
    pub(crate) manifest: Utf8PathBuf,
    /// Parses and validates the manifest, then exits without touching the
    /// artifact.
    #[arg(long)]
    pub(crate) check: bool,
}
