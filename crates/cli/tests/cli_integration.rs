//! CLI integration tests for the offline subcommands.
//!
//! Uses `assert_cmd` to spawn the `helpdesk` binary and verify
//! exit codes, stdout content, and stderr content.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/helpdesk.toml")
}

/// Helper: create a Command for the `helpdesk` binary with `RUST_LOG`
/// cleared so log lines never depend on the caller's environment.
fn helpdesk() -> Command {
    let mut cmd = cargo_bin_cmd!("helpdesk");
    cmd.env_remove("RUST_LOG")
        .env_remove("HELPDESK_API_KEY")
        .env_remove("HELPDESK_RATE_LIMIT")
        .env_remove("HELPDESK_PORT");
    cmd
}

/// Copy the fixture into `dir`, pointing `[storage] data_file` at `dir/tickets.db`.
fn config_with_data_file(dir: &TempDir) -> PathBuf {
    let data_file = dir.path().join("tickets.db");
    let mut text = fs::read_to_string(fixture()).expect("read fixture");
    text.push_str(&format!("\n[storage]\ndata_file = '{}'\n", data_file.display()));
    let path = dir.path().join("helpdesk.toml");
    fs::write(&path, text).expect("write config");
    path
}

fn write_config(dir: &TempDir, text: &str) -> PathBuf {
    let path = dir.path().join("helpdesk.toml");
    fs::write(&path, text).expect("write config");
    path
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    helpdesk()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("IT support desk ticket service"));
}

#[test]
fn version_exits_0() {
    helpdesk()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("helpdesk"));
}

// ──────────────────────────────────────────────
// 2. check-config
// ──────────────────────────────────────────────

#[test]
fn check_config_valid_fixture() {
    helpdesk()
        .arg("--config")
        .arg(fixture())
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"))
        .stdout(predicate::str::contains("users: 8 (2 technicians)"))
        .stdout(predicate::str::contains("storage: in memory"));
}

#[test]
fn check_config_json_output() {
    let output = helpdesk()
        .arg("--config")
        .arg(fixture())
        .args(["--output", "json", "check-config"])
        .output()
        .expect("run helpdesk");
    assert!(output.status.success());
    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(json["valid"], true);
    assert_eq!(json["users"], 8);
    assert_eq!(json["technicians"], 2);
    assert_eq!(json["webhook"], false);
}

#[test]
fn missing_config_file_fails() {
    let dir = TempDir::new().unwrap();
    helpdesk()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read config"));
}

#[test]
fn unknown_role_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "[[users]]\nid = \"x\"\nfull_name = \"X\"\nrole = \"janitor\"\n",
    );
    helpdesk()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown role 'janitor'"));
}

#[test]
fn unknown_key_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[server]\nprot = 80\n");
    helpdesk()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot parse config"));
}

#[test]
fn bad_environment_override_fails() {
    helpdesk()
        .arg("--config")
        .arg(fixture())
        .arg("check-config")
        .env("HELPDESK_RATE_LIMIT", "lots")
        .assert()
        .failure()
        .stderr(predicate::str::contains("HELPDESK_RATE_LIMIT"));
}

#[test]
fn json_errors_go_to_stderr() {
    let dir = TempDir::new().unwrap();
    let output = helpdesk()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .args(["--output", "json", "check-config"])
        .output()
        .expect("run helpdesk");
    assert!(!output.status.success());
    let json: serde_json::Value =
        serde_json::from_slice(&output.stderr).expect("stderr is JSON");
    assert!(json["error"]
        .as_str()
        .unwrap()
        .contains("cannot read config"));
}

// ──────────────────────────────────────────────
// 3. Data file commands
// ──────────────────────────────────────────────

#[test]
fn tickets_requires_data_file() {
    helpdesk()
        .arg("--config")
        .arg(fixture())
        .arg("tickets")
        .assert()
        .failure()
        .stderr(predicate::str::contains("data_file"));
}

#[test]
fn tickets_on_fresh_data_file_is_empty() {
    let dir = TempDir::new().unwrap();
    let config = config_with_data_file(&dir);
    helpdesk()
        .arg("--config")
        .arg(&config)
        .arg("tickets")
        .assert()
        .success()
        .stdout(predicate::str::contains("no tickets"));
}

#[test]
fn tickets_rejects_unknown_status() {
    let dir = TempDir::new().unwrap();
    let config = config_with_data_file(&dir);
    helpdesk()
        .arg("--config")
        .arg(&config)
        .args(["tickets", "--status", "archived"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown status 'archived'"));
}

#[test]
fn history_of_unknown_ticket_fails() {
    let dir = TempDir::new().unwrap();
    let config = config_with_data_file(&dir);
    helpdesk()
        .arg("--config")
        .arg(&config)
        .args(["history", "#42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ticket #42 not found"));
}

#[test]
fn sweep_on_empty_store_examines_nothing() {
    let dir = TempDir::new().unwrap();
    let config = config_with_data_file(&dir);
    helpdesk()
        .arg("--config")
        .arg(&config)
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("examined 0 resolved ticket(s)"));
}

#[test]
fn sweep_rejects_malformed_instant() {
    let dir = TempDir::new().unwrap();
    let config = config_with_data_file(&dir);
    helpdesk()
        .arg("--config")
        .arg(&config)
        .args(["sweep", "--now", "next tuesday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --now"));
}

#[test]
fn tls_flags_must_come_in_pairs() {
    helpdesk()
        .arg("--config")
        .arg(fixture())
        .args(["serve", "--tls-cert", "cert.pem"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--tls-cert and --tls-key"));
}
