//! CLI integration tests for the `testbed` binary.
//!
//! Uses `assert_cmd` to spawn the binary and check exit codes and output.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Locate the workspace root by walking up from CARGO_MANIFEST_DIR.
fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    // crates/cli -> workspace root is two levels up
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

fn testbed() -> Command {
    let mut cmd = cargo_bin_cmd!("testbed");
    cmd.current_dir(workspace_root());
    cmd.env_remove("RUST_LOG");
    cmd.env("TESTBED_LOG", "warn");
    cmd
}

fn write_config(dir: &TempDir, text: &str) -> PathBuf {
    let path = dir.path().join("testbed.toml");
    fs::write(&path, text).expect("write config");
    path
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    testbed()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Requirement-driven integration test runner",
        ));
}

#[test]
fn version_exits_0() {
    testbed()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("testbed"));
}

// ──────────────────────────────────────────────
// 2. list
// ──────────────────────────────────────────────

#[test]
fn list_shows_expanded_invocations() {
    testbed()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("nation_is_loaded [smoke, tpch] (1 requirements)"))
        .stdout(predicate::str::contains("orders_in_each_state [1]"))
        .stdout(predicate::str::contains("orders_in_each_state [2]"))
        .stdout(predicate::str::contains("6 tests"));
}

#[test]
fn list_filters_by_group() {
    testbed()
        .args(["list", "--groups", "smoke", "--exclude-groups", "tpch"])
        .assert()
        .success()
        .stdout(predicate::str::contains("orders_start_empty"))
        .stdout(predicate::str::contains("nation_is_loaded").not())
        .stdout(predicate::str::contains("1 tests"));
}

#[test]
fn list_json_is_an_array() {
    let output = testbed()
        .args(["--output", "json", "list", "--tests", "seeded_orders"])
        .output()
        .expect("run testbed");
    assert!(output.status.success());
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    let listed = listed.as_array().expect("array");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["name"], "seeded_orders");
    assert_eq!(listed[0]["requirements"], 2);
}

// ──────────────────────────────────────────────
// 3. run
// ──────────────────────────────────────────────

#[test]
fn run_demo_suite_succeeds() {
    testbed()
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("6 SUCCEEDED / 0 FAILED / 0 SKIPPED"));
}

#[test]
fn run_in_parallel_succeeds() {
    testbed()
        .args(["run", "--threads", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("6 SUCCEEDED"));
}

#[test]
fn run_quiet_prints_only_summary() {
    testbed()
        .args(["--quiet", "run", "--tests", "nation_is_loaded"])
        .assert()
        .success()
        .stdout("1 SUCCEEDED / 0 FAILED / 0 SKIPPED\n");
}

#[test]
fn run_json_reports_outcomes() {
    let output = testbed()
        .args(["--output", "json", "run", "--groups", "smoke"])
        .output()
        .expect("run testbed");
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(report["succeeded"], 2);
    assert_eq!(report["failed"], 0);
    let tests = report["tests"].as_array().expect("tests array");
    assert!(tests.iter().all(|t| t["outcome"] == "SUCCESS"));
}

#[test]
fn run_with_config_file_uses_its_properties() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        r#"
[databases.memory]
table_manager_type = "relational"

[properties]
"demo.region_schema" = "geo"
"#,
    );
    testbed()
        .args(["run", "--tests", "region_in_configured_schema", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 SUCCEEDED"));
}

#[test]
fn mutable_table_on_read_only_database_fails_the_test() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        r#"
[databases.memory]
table_manager_type = "read_only"
"#,
    );
    testbed()
        .args(["run", "--tests", "orders_start_empty", "--config"])
        .arg(&config)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("no table manager found for table orders"))
        .stdout(predicate::str::contains("0 SUCCEEDED / 1 FAILED"));
}

#[test]
fn immutable_table_on_read_only_database_skips_the_suite() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        r#"
[databases.memory]
table_manager_type = "read_only"
"#,
    );
    testbed()
        .args(["run", "--groups", "tpch", "--config"])
        .arg(&config)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("suite error: no table manager found"))
        .stdout(predicate::str::contains("0 SUCCEEDED / 0 FAILED / 2 SKIPPED"));
}

#[test]
fn run_with_missing_config_reports_error() {
    testbed()
        .args(["run", "--config", "does/not/exist.toml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error reading config"));
}

#[test]
fn run_with_unknown_manager_type_skips_everything() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        r#"
[databases.memory]
table_manager_type = "jdbc"
"#,
    );
    testbed()
        .args(["run", "--config"])
        .arg(&config)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("unknown table manager type 'jdbc'"))
        .stdout(predicate::str::contains("0 SUCCEEDED / 0 FAILED / 6 SKIPPED"));
}

// ──────────────────────────────────────────────
// 4. conformance
// ──────────────────────────────────────────────

#[test]
fn conformance_passes_for_relational_manager() {
    testbed()
        .arg("conformance")
        .assert()
        .success()
        .stdout(predicate::str::contains("(0 failed)"));
}

#[test]
fn conformance_json_lists_checks() {
    let output = testbed()
        .args(["--output", "json", "conformance"])
        .output()
        .expect("run testbed");
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(report["failed"], 0);
    assert!(report["checks"].as_array().expect("checks").len() >= 8);
}
