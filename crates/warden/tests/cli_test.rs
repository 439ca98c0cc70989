//! Integration tests for the `warden` CLI binary.
//!
//! These validate argument parsing, help output, shell completions,
//! offline inventory commands and error handling — all without
//! touching a live host over SSH.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `warden` binary with env isolation.
///
/// Clears all `WARDEN_*` env vars and points config/data directories
/// at a throwaway path so tests never touch the user's real files.
fn warden_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("warden");
    cmd.env("HOME", "/tmp/warden-cli-test-scratch")
        .env("XDG_CONFIG_HOME", "/tmp/warden-cli-test-scratch")
        .env("XDG_DATA_HOME", "/tmp/warden-cli-test-scratch")
        .env_remove("WARDEN_CONFIG")
        .env_remove("WARDEN_OUTPUT")
        .env_remove("WARDEN_TIMEOUT");
    cmd
}

/// Concatenate stdout + stderr for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Write a minimal valid config into `dir` and return its path. The
/// state file is pointed into the same tempdir so persistence stays
/// isolated per test.
fn write_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("warden.toml");
    let state = dir.path().join("state.json");
    let toml = format!(
        r#"
[defaults]
state_path = "{}"

[[servers]]
name = "edge-1"
address = "192.0.2.10"

[[applications]]
uuid = "0d0afa53-9e43-4a9c-a09d-51a72bd1c32e"
name = "storefront"
server = "edge-1"
"#,
        state.display()
    );
    std::fs::write(&path, toml).unwrap();
    path
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = warden_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    warden_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("firewall")
            .and(predicate::str::contains("install"))
            .and(predicate::str::contains("validate"))
            .and(predicate::str::contains("status"))
            .and(predicate::str::contains("alerts")),
    );
}

#[test]
fn test_version_flag() {
    warden_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("warden"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    warden_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    warden_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_completions_fish() {
    warden_cmd()
        .args(["completions", "fish"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Offline catalog ─────────────────────────────────────────────────

#[test]
fn test_countries_table() {
    warden_cmd()
        .arg("countries")
        .assert()
        .success()
        .stdout(predicate::str::contains("United States"));
}

#[test]
fn test_countries_plain_emits_codes() {
    warden_cmd()
        .args(["countries", "-o", "plain"])
        .assert()
        .success()
        .stdout(predicate::str::contains("US").and(predicate::str::contains("DE")));
}

// ── Empty-inventory commands ────────────────────────────────────────

#[test]
fn test_status_empty_fleet() {
    warden_cmd()
        .args(["status", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_alerts_list_empty() {
    warden_cmd()
        .args(["alerts", "list", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_firewall_status_empty() {
    warden_cmd().args(["firewall", "status"]).assert().success();
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let output = warden_cmd().arg("foobar").output().unwrap();
    assert!(
        !output.status.success(),
        "Expected failure for invalid subcommand"
    );
    let text = combined_output(&output);
    assert!(
        text.contains("invalid") || text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_invalid_output_format() {
    let output = warden_cmd()
        .args(["--output", "invalid", "status"])
        .output()
        .unwrap();
    assert!(
        !output.status.success(),
        "Expected failure for invalid output format"
    );
    let text = combined_output(&output);
    assert!(
        text.contains("invalid")
            || text.contains("possible values")
            || text.contains("valid value"),
        "Expected error about valid output formats:\n{text}"
    );
}

#[test]
fn test_install_stack_unknown_server() {
    let output = warden_cmd()
        .args(["install", "stack", "nosuch"])
        .output()
        .unwrap();
    assert_eq!(
        output.status.code(),
        Some(4),
        "Expected not-found exit code"
    );
    let text = combined_output(&output);
    assert!(
        text.contains("not found"),
        "Expected a not-found error:\n{text}"
    );
}

#[test]
fn test_validate_unknown_server() {
    warden_cmd()
        .args(["validate", "nosuch"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_fix_acquis_unknown_server() {
    warden_cmd()
        .args(["fix-acquis", "nosuch"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_rules_deploy_unknown_application() {
    warden_cmd()
        .args(["rules", "deploy", "nosuch"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_firewall_enable_unknown_application() {
    warden_cmd()
        .args(["firewall", "enable", "nosuch"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_alerts_sync_unknown_server() {
    warden_cmd()
        .args(["alerts", "sync", "--server", "nosuch"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_explicit_config_path_must_exist() {
    warden_cmd()
        .args(["-c", "/tmp/warden-cli-test-missing/nope.toml", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_global_flags_parsing() {
    warden_cmd()
        .args(["--output", "json", "--verbose", "--timeout", "60", "status"])
        .assert()
        .success();
}

// ── Config file handling ────────────────────────────────────────────

#[test]
fn test_inventory_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir);

    warden_cmd()
        .args(["-c", config.to_str().unwrap(), "firewall", "status", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("storefront"));
}

#[test]
fn test_alerts_list_with_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir);

    warden_cmd()
        .args(["-c", config.to_str().unwrap(), "alerts", "list", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_config_validation_rejects_unknown_server_reference() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("warden.toml");
    std::fs::write(
        &path,
        r#"
[[applications]]
uuid = "0d0afa53-9e43-4a9c-a09d-51a72bd1c32e"
name = "storefront"
server = "ghost"
"#,
    )
    .unwrap();

    warden_cmd()
        .args(["-c", path.to_str().unwrap(), "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown server"));
}

// ── Subcommand help discovery ───────────────────────────────────────

#[test]
fn test_install_subcommands_exist() {
    warden_cmd().args(["install", "--help"]).assert().success().stdout(
        predicate::str::contains("stack")
            .and(predicate::str::contains("crowdsec"))
            .and(predicate::str::contains("access-logs"))
            .and(predicate::str::contains("header-capture"))
            .and(predicate::str::contains("log-integration"))
            .and(predicate::str::contains("traffic-logger")),
    );
}

#[test]
fn test_remove_subcommands_exist() {
    warden_cmd().args(["remove", "--help"]).assert().success().stdout(
        predicate::str::contains("stack")
            .and(predicate::str::contains("crowdsec"))
            .and(predicate::str::contains("traffic-logger")),
    );
}

#[test]
fn test_firewall_subcommands_exist() {
    warden_cmd()
        .args(["firewall", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("enable")
                .and(predicate::str::contains("disable"))
                .and(predicate::str::contains("status")),
        );
}

#[test]
fn test_rules_subcommands_exist() {
    warden_cmd().args(["rules", "--help"]).assert().success().stdout(
        predicate::str::contains("deploy")
            .and(predicate::str::contains("remove"))
            .and(predicate::str::contains("apply-bans"))
            .and(predicate::str::contains("remove-bans")),
    );
}

#[test]
fn test_alerts_subcommands_exist() {
    warden_cmd()
        .args(["alerts", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sync").and(predicate::str::contains("list")));
}
