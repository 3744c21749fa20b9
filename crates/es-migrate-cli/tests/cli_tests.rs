//! CLI integration tests for es-migrate.
//!
//! These tests cover argument parsing, help output and the exit codes
//! for configuration and connectivity failures.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn cmd() -> Command {
    Command::cargo_bin("es-migrate").unwrap()
}

/// Config pointing both clusters at a port nothing listens on.
fn unreachable_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"source:
  url: http://127.0.0.1:1
  alias: old
  timeout_secs: 2
destination:
  url: http://127.0.0.1:1
  alias: new
  timeout_secs: 2
migration:
  source_index: products
  dest_index: products_v2
"#
    )
    .unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_migrate_subcommand_help() {
    cmd()
        .args(["migrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--source-index"))
        .stdout(predicate::str::contains("--dest-index"))
        .stdout(predicate::str::contains("--limit"))
        .stdout(predicate::str::contains("--workers"))
        .stdout(predicate::str::contains("--slices"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("es-migrate"));
}

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"))
        .stdout(predicate::str::contains("--shutdown-timeout"))
        .stdout(predicate::str::contains("[default: 60]"))
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_no_subcommand_shows_usage() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Exit Code Tests - Config Errors (Exit Code 2)
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_2() {
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nonexistent_config_file.yaml"));
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_missing_required_fields_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  url: http://localhost:9200").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_invalid_override_exits_with_code_2() {
    let file = unreachable_config();

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "migrate",
            "--batch-size",
            "0",
        ])
        .assert()
        .code(2);
}

// =============================================================================
// Exit Code Tests - Connectivity (Exit Code 3)
// =============================================================================

#[test]
fn test_health_check_unreachable_exits_with_code_3() {
    let file = unreachable_config();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("UNHEALTHY"));
}

#[test]
fn test_health_check_json_output() {
    let file = unreachable_config();

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--output-json",
            "health-check",
        ])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("\"healthy\": false"));
}

#[test]
fn test_migrate_unreachable_destination_exits_with_code_3() {
    let file = unreachable_config();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "migrate"])
        .assert()
        .code(3);
}
