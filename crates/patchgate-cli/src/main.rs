//! CLI entrypoint for patchgate.
//!
//! The binary delegates to [`patchgate_cli::run`], which loads configuration,
//! runs the operation manifest named on the command line, prints the report
//! and maps the outcome to the process exit code.

use std::io::{self, StderrLock, StdinLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdin: StdinLock<'_> = io::stdin().lock();
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    patchgate_cli::run(std::env::args_os(), &mut stdin, &mut stdout, &mut stderr)
}
