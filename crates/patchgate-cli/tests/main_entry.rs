//! Integration tests for the `patchgate` binary entry point.
//!
//! Covers usage errors, the version flag and the exit code of a real run
//! against a temporary artifact.

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

#[test]
fn missing_manifest_argument_is_a_usage_error() {
    let mut command = cargo_bin_cmd!("patchgate");
    command
        .assert()
        .failure()
        .stderr(contains("<MANIFEST>"));
}

#[test]
fn version_flag_succeeds() {
    let mut command = cargo_bin_cmd!("patchgate");
    command.arg("--version");
    command
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unreadable_manifest_exits_with_failure() {
    let mut command = cargo_bin_cmd!("patchgate");
    command.arg("/definitely/not/here.toml");
    command
        .assert()
        .failure()
        .stderr(contains("failed to read manifest"));
}

#[test]
fn committed_run_exits_successfully_and_reports() {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("notes.txt"), "draft\n").expect("seed artifact");
    fs::write(
        dir.path().join("op.toml"),
        "artifact = \"notes.txt\"\n[patch]\nold = \"draft\"\nnew = \"final\"\n",
    )
    .expect("write manifest");

    let mut command = cargo_bin_cmd!("patchgate");
    command
        .env("PATCHGATE_ROLLBACK_POLICY", "auto")
        .arg("--log-filter=warn")
        .arg(dir.path().join("op.toml"));
    command
        .assert()
        .success()
        .stdout(contains("Status:   COMMITTED"));
    assert_eq!(
        fs::read_to_string(dir.path().join("notes.txt")).expect("read artifact"),
        "final\n"
    );
}

#[test]
fn bare_invocation_runs_on_built_in_defaults() {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("notes.txt"), "draft\n").expect("seed artifact");
    fs::write(
        dir.path().join("op.toml"),
        "artifact = \"notes.txt\"\n[patch]\nold = \"draft\"\nnew = \"final\"\n",
    )
    .expect("write manifest");

    let mut command = cargo_bin_cmd!("patchgate");
    for (key, _) in std::env::vars_os() {
        if key.to_string_lossy().starts_with("PATCHGATE_") {
            command.env_remove(key);
        }
    }
    command.current_dir(dir.path()).arg("op.toml");
    command
        .assert()
        .success()
        .stdout(contains("Status:   COMMITTED"));
    assert_eq!(
        fs::read_to_string(dir.path().join("notes.txt")).expect("read artifact"),
        "final\n"
    );
}
