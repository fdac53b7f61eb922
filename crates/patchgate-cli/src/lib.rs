//! Command-line runtime for patchgate.
//!
//! The runtime splits configuration flags from the command line, loads the
//! layered [`Config`], installs logging, loads the operation manifest and
//! runs the pipeline. The rendered report goes to stdout; the exit code is
//! success only when the operation committed. Streams and the configuration
//! loader are injectable so the runtime can be exercised in-process.

use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::process::ExitCode;

use clap::Parser;
use patchgate::{BackupStore, Operation, Pipeline, ProcessRunner, Reporter};
use patchgate_config::Config;
use tracing::{debug, info};

mod cli;
mod config;
mod errors;
mod prompt;
pub mod telemetry;

use cli::Cli;
pub(crate) use config::{ConfigLoader, OrthoConfigLoader};
use config::split_config_arguments;
pub(crate) use errors::AppError;
use prompt::decider_for;

const CLI_TARGET: &str = "patchgate::cli";

/// CLI flags recognised by the configuration loader.
///
/// Keep in sync with the fields of `patchgate_config::Config`.
const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--rollback-policy",
    "--backup-suffix",
    "--backup-dir",
];

/// Streams handed to the runtime.
pub(crate) struct IoStreams<'a, R, W, E> {
    pub(crate) stdin: &'a mut R,
    pub(crate) stdout: &'a mut W,
    pub(crate) stderr: &'a mut E,
}

/// Runs the CLI with the given arguments and streams.
#[must_use]
pub fn run<I, R, W, E>(args: I, stdin: &mut R, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
{
    let mut io = IoStreams {
        stdin,
        stdout,
        stderr,
    };
    run_with_loader(args, &mut io, &OrthoConfigLoader)
}

pub(crate) fn run_with_loader<I, R, W, E, L>(
    args: I,
    io: &mut IoStreams<'_, R, W, E>,
    loader: &L,
) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    R: BufRead,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);

    let cli = match Cli::try_parse_from(&split.cli_arguments) {
        Ok(cli) => cli,
        Err(error) if !error.use_stderr() => {
            // --help and --version
            let _ = write!(io.stdout, "{error}");
            return ExitCode::SUCCESS;
        }
        Err(error) => return report_error(io, &AppError::CliUsage(error)),
    };

    match execute(&cli, &split.config_arguments, io, loader) {
        Ok(exit_code) => exit_code,
        Err(error) => report_error(io, &error),
    }
}

fn execute<R, W, E, L>(
    cli: &Cli,
    config_arguments: &[OsString],
    io: &mut IoStreams<'_, R, W, E>,
    loader: &L,
) -> Result<ExitCode, AppError>
where
    R: BufRead,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let config = loader.load(config_arguments)?;
    telemetry::initialise(&config)?;
    debug!(target: CLI_TARGET, ?config, "configuration loaded");

    let operation = Operation::load(&cli.manifest)?;
    if cli.check {
        writeln!(
            io.stdout,
            "{}: manifest is valid ({} -> {})",
            cli.manifest,
            operation.name().unwrap_or("unnamed operation"),
            operation.artifact()
        )
        .map_err(AppError::WriteReport)?;
        return Ok(ExitCode::SUCCESS);
    }

    let pipeline = Pipeline::new(operation, backup_store(&config), ProcessRunner);
    let outcome = {
        let mut decider = decider_for(config.rollback_policy(), io.stdin, io.stderr);
        pipeline.run(decider.as_mut())
    };
    info!(
        target: CLI_TARGET,
        status = %outcome.status,
        artifact = %outcome.artifact,
        "operation finished"
    );

    io.stdout
        .write_all(Reporter::new().render(&outcome).as_bytes())
        .and_then(|()| io.stdout.flush())
        .map_err(AppError::WriteReport)?;
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn backup_store(config: &Config) -> BackupStore {
    let store = BackupStore::new(config.backup_suffix());
    match config.backup_dir() {
        Some(directory) => store.with_directory(directory),
        None => store,
    }
}

fn report_error<R, W, E>(io: &mut IoStreams<'_, R, W, E>, error: &AppError) -> ExitCode
where
    E: Write,
{
    let _ = writeln!(io.stderr, "patchgate: {error}");
    ExitCode::FAILURE
}
