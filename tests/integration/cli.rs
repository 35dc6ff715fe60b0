//! End-to-end tests for the `rewind` binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use super::common::fixtures::source_lines;

struct CliEnv {
    dir: TempDir,
}

impl CliEnv {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn rewind(&self) -> Command {
        let mut cmd = Command::cargo_bin("rewind").expect("Failed to find rewind binary");
        cmd.env("HOME", self.root())
            .env_remove("RUST_LOG")
            .arg("--data-dir")
            .arg(self.root().join("data"))
            .arg("--state-dir")
            .arg(self.root().join("state"));
        cmd
    }

    fn write_source(&self) -> String {
        let path = self.root().join("app.py");
        fs::write(&path, source_lines(20).join("\n")).expect("Failed to write source file");
        path.display().to_string()
    }

    /// Set a breakpoint and save it as `name` in a fresh console session.
    fn save_state(&self, name: &str) {
        let file = self.write_source();
        self.rewind()
            .write_stdin(format!("break {file}:3\n/save-state {name}\n"))
            .assert()
            .success()
            .stdout(predicate::str::contains(format!("Saved state '{name}'")));
    }
}

/// An empty state directory lists nothing.
#[test]
fn test_list_with_no_states() {
    let env = CliEnv::new();
    env.rewind()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No saved states"));
}

/// A console session can save a state that `list` and `show` then see.
#[test]
fn test_console_save_then_list_and_show() {
    let env = CliEnv::new();
    env.save_state("cp");

    env.rewind()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("cp"))
        .stdout(predicate::str::contains("named"));

    env.rewind()
        .args(["show", "cp"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id\": \"cp\""))
        .stdout(predicate::str::contains("\"breakpoints\""));
}

/// The first run writes the example config into the data directory.
#[test]
fn test_first_run_writes_example_config() {
    let env = CliEnv::new();
    env.rewind().arg("list").assert().success();
    assert!(env.root().join("data").join("config.toml").exists());
}

/// `--restore` before the debugger is attached queues the restore and runs
/// it on `attach`.
#[test]
fn test_restore_flag_waits_for_attach() {
    let env = CliEnv::new();
    env.save_state("cp");

    env.rewind()
        .args(["--restore", "cp"])
        .write_stdin("attach\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("queued"))
        .stdout(predicate::str::contains("Attached"))
        .stdout(predicate::str::contains("Restored state 'cp'"))
        .stdout(predicate::str::contains("1 applied"));

    assert!(!env.root().join("state").join("pending-restore.json").exists());
}

/// `/restore-next` survives the process and is consumed by the next run.
#[test]
fn test_restore_next_consumed_by_next_run() {
    let env = CliEnv::new();
    env.save_state("cp");

    env.rewind()
        .write_stdin("/restore-next cp\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("queued"));
    assert!(env.root().join("state").join("pending-restore.json").exists());

    env.rewind()
        .write_stdin("attach\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Restored state 'cp'"));
}

/// Queuing an unknown state is refused on the spot instead of failing
/// later on attach.
#[test]
fn test_restore_unknown_state_is_reported_immediately() {
    let env = CliEnv::new();
    env.save_state("cp");

    env.rewind()
        .write_stdin("/restore-next typo\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("State not found: typo"));
    assert!(!env.root().join("state").join("pending-restore.json").exists());

    env.rewind()
        .args(["--restore", "typo"])
        .write_stdin("attach\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("State not found: typo"));
}

/// Deleting by name removes the state; `latest` is refused.
#[test]
fn test_delete_state() {
    let env = CliEnv::new();
    env.save_state("cp");

    env.rewind()
        .args(["delete", "latest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("refusing to delete"));

    env.rewind()
        .args(["delete", "cp"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted"));

    // Only the rolling checkpoint taken before `break` is left.
    env.rewind()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("auto"))
        .stdout(predicate::str::contains("cp").not());
}

/// Comparing labels that were never recorded fails with a clear message.
#[test]
fn test_perf_compare_unknown_labels() {
    let env = CliEnv::new();
    env.rewind()
        .args(["perf", "compare", "a", "b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Perf checkpoint not found"));
}

/// Unknown slash commands are reported without ending the session.
#[test]
fn test_unknown_command_keeps_console_running() {
    let env = CliEnv::new();
    env.rewind()
        .write_stdin("/bogus\n/list-states\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Unknown command: /bogus"))
        .stdout(predicate::str::contains("No saved states"));
}
