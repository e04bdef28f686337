//! End-to-end tests for the `metal` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn metal() -> Command {
    Command::cargo_bin("metal").unwrap()
}

#[test]
fn test_help_lists_commands() {
    metal()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("node"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_init_then_validate() {
    let dir = TempDir::new().unwrap();

    metal()
        .args(["init", "--dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    assert!(dir.path().join(".metal-kit/conductor.toml").exists());
    assert!(dir.path().join(".metal-kit/runbooks/firmware-settings.md").exists());

    metal()
        .args(["validate", "--dir"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("2 runbooks and 2 deploy templates are valid"));
}

#[test]
fn test_init_refuses_existing_directory_without_force() {
    let dir = TempDir::new().unwrap();
    metal().args(["init", "--minimal", "--dir"]).arg(dir.path()).assert().success();

    metal()
        .args(["init", "--dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    metal()
        .args(["init", "--force", "--dir"])
        .arg(dir.path())
        .assert()
        .success();
}

#[test]
fn test_validate_reports_unknown_step() {
    let dir = TempDir::new().unwrap();
    let runbooks = dir.path().join(".metal-kit/runbooks");
    fs::create_dir_all(&runbooks).unwrap();
    fs::write(
        runbooks.join("bad.md"),
        "---\nname: CUSTOM_BAD\nsteps:\n  - interface: bios\n    step: flash_firmware\n---\n",
    )
    .unwrap();

    metal()
        .args(["validate", "--dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("runbook CUSTOM_BAD"))
        .stderr(predicate::str::contains("1 invalid definitions"));
}

#[test]
fn test_node_command_reports_unreachable_conductor() {
    metal()
        .args(["node", "--url", "http://127.0.0.1:9", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not reach conductor"));
}

#[test]
fn test_invalid_step_json_is_rejected_before_sending() {
    metal()
        .args([
            "node",
            "--url",
            "http://127.0.0.1:9",
            "clean",
            "node-1",
            "--clean-steps",
            "{not json",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid step list"));
}
