//! End-to-end tests for the tether CLI.
//!
//! Devices are `exec://` shells, so no remote hardware is needed.

#![cfg(unix)]
#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Isolated state directory plus a scratch directory for cell files.
struct TestHome {
    temp_dir: TempDir,
}

impl TestHome {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.temp_dir.path().join("state")
    }

    fn tether(&self) -> Command {
        let mut cmd = Command::cargo_bin("tether").expect("Failed to find tether binary");
        cmd.env("TETHER_HOME", self.state_dir())
            .env_remove("RUST_LOG")
            .arg("--no-color")
            .arg("--host")
            .arg("sh");
        cmd
    }

    fn register(&self, url: &str, name: &str) {
        self.tether()
            .args(["register", url, "--name", name])
            .assert()
            .success();
    }

    fn write_cell(&self, filename: &str, source: &str) -> PathBuf {
        let path = self.temp_dir.path().join(filename);
        fs::write(&path, source).expect("Failed to write cell");
        path
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

// =============================================================================
// Device Management
// =============================================================================

#[test]
fn test_devices_empty() {
    let home = TestHome::new();
    home.tether()
        .arg("devices")
        .assert()
        .success()
        .stdout(predicate::str::contains("No devices available"));
}

#[test]
fn test_register_list_unregister() {
    let home = TestHome::new();
    home.tether()
        .args(["register", "exec:///bin/sh", "--name", "shell"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Registered shell @ exec:///bin/sh"));

    home.tether()
        .arg("devices")
        .assert()
        .success()
        .stdout(predicate::str::contains("shell  exec:///bin/sh"));

    home.tether()
        .args(["unregister", "shell"])
        .assert()
        .success();

    home.tether()
        .arg("devices")
        .assert()
        .success()
        .stdout(predicate::str::contains("No devices available"));
}

#[test]
fn test_devices_json() {
    let home = TestHome::new();
    home.register("exec://sh", "sh1");

    let output = home.tether().args(["devices", "--json"]).output().unwrap();
    assert!(output.status.success());
    let devices: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(devices[0]["name"], "sh1");
    assert_eq!(devices[0]["url"], "exec://sh");
}

#[test]
fn test_register_rejects_unknown_scheme() {
    let home = TestHome::new();
    home.tether()
        .args(["register", "serial:///dev/ttyUSB0"])
        .assert()
        .failure();
}

#[test]
fn test_unregister_unknown_device() {
    let home = TestHome::new();
    home.tether()
        .args(["unregister", "ghost"])
        .assert()
        .failure();
}

// =============================================================================
// Cell Evaluation
// =============================================================================

#[test]
fn test_eval_fans_out() {
    let home = TestHome::new();
    home.register("exec:///bin/sh", "one");
    home.register("exec://sh", "two");

    home.tether()
        .args(["eval", "%%connect one two\necho hi"])
        .assert()
        .success()
        .stdout("\n----- one\nhi\n\n----- two\nhi\n");
}

#[test]
fn test_eval_from_stdin() {
    let home = TestHome::new();
    home.register("exec:///bin/sh", "one");

    home.tether()
        .arg("eval")
        .write_stdin("%%connect one -q\necho piped")
        .assert()
        .success()
        .stdout("piped\n");
}

#[test]
fn test_eval_without_target() {
    let home = TestHome::new();
    home.tether()
        .args(["eval", "echo nowhere"])
        .assert()
        .success()
        .stderr(predicate::str::contains("no device connected"));
}

#[test]
fn test_eval_host_section() {
    let home = TestHome::new();
    home.tether()
        .args(["eval", "%%host\necho on host"])
        .assert()
        .success()
        .stdout(predicate::str::contains("on host"));
}

#[test]
fn test_silent_suppresses_target_output() {
    let home = TestHome::new();
    home.register("exec:///bin/sh", "one");

    home.tether()
        .args(["--silent", "eval", "%%connect one -q\necho hidden"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hidden").not());
}

#[test]
fn test_run_files_share_default_device() {
    let home = TestHome::new();
    home.register("exec:///bin/sh", "one");
    let first = home.write_cell("first.cell", "%connect one\n");
    let second = home.write_cell("second.cell", "echo second cell\n");

    home.tether()
        .arg("run")
        .arg(&first)
        .arg(&second)
        .assert()
        .success()
        .stdout(predicate::str::contains("Connected to one @ exec:///bin/sh"))
        .stdout(predicate::str::contains("second cell"));
}

#[test]
fn test_session_remembers_device_and_cwd() {
    let home = TestHome::new();
    home.register("exec:///bin/sh", "one");
    let dir = home.path().canonicalize().unwrap();

    home.tether()
        .args(["--session", "nb", "eval"])
        .arg(format!("%connect one -q\n%cd {}", dir.display()))
        .assert()
        .success();

    home.tether()
        .args(["--session", "nb", "eval", "echo remembered"])
        .assert()
        .success()
        .stdout("remembered\n");

    home.tether()
        .args(["--session", "nb", "eval", "!pwd"])
        .assert()
        .success()
        .stdout(format!("{}\n", dir.display()));
}

#[test]
fn test_run_missing_file() {
    let home = TestHome::new();
    home.tether()
        .args(["run", "does-not-exist.cell"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn test_timeout_flag() {
    let home = TestHome::new();
    home.register("exec:///bin/sh", "one");

    home.tether()
        .args(["--timeout", "1", "eval", "%%connect one -q\nsleep 30"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success()
        .stderr(predicate::str::contains("Timeout after 1s on one"));
}
