//! Smoke tests -- verify the binary runs and each subcommand works end to end.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn fvrepo() -> Command {
    let mut cmd = Command::cargo_bin("fvrepo").unwrap();
    cmd.env_remove("FVREPO_CONFIG").env("RUST_LOG", "error");
    cmd
}

#[test]
fn test_cli_help() {
    fvrepo()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Feature-vector repository offload"));
}

#[test]
fn test_cli_version() {
    fvrepo()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("fvrepo"));
}

#[test]
fn test_self_test_json_passes() {
    fvrepo()
        .args(["self-test", "--json", "--features", "10", "--queries", "2"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"step\": \"Search N:M\""))
        .stdout(predicates::str::contains("\"status\": \"Fail\"").not());
}

#[test]
fn test_self_test_table_output() {
    fvrepo()
        .args(["self-test", "--features", "4", "--queries", "1"])
        .assert()
        .success()
        .stdout(predicates::str::contains("RepoAdd 1:N"))
        .stdout(predicates::str::contains("PASS"));
}

#[test]
fn test_self_test_bad_options_fail() {
    fvrepo()
        .args(["self-test", "--features", "0"])
        .assert()
        .failure()
        .stdout(predicates::str::contains("FAIL"));
}

#[test]
fn test_plan_search() {
    fvrepo()
        .args(["plan", "--op", "search", "--count", "13"])
        .assert()
        .success()
        .stdout(predicates::str::contains("3 batches"));
}

#[test]
fn test_plan_broadcast_is_one_batch() {
    fvrepo()
        .args(["plan", "--op", "add", "--count", "5000000", "--mode", "one-to-n"])
        .assert()
        .success()
        .stdout(predicates::str::contains("1 batches"));
}

#[test]
fn test_plan_uses_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[batching]\nsearch_max = 1").unwrap();
    fvrepo()
        .arg("--config")
        .arg(file.path())
        .args(["plan", "--op", "search", "--count", "4", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"offset\": 3"));
}

#[test]
fn test_layout_search() {
    fvrepo()
        .args(["layout", "--op", "search"])
        .assert()
        .success()
        .stdout(predicates::str::contains("52 bytes"))
        .stdout(predicates::str::contains("signalId"))
        .stdout(predicates::str::contains("queryIndex"));
}

#[test]
fn test_missing_config_file_fails() {
    fvrepo()
        .args(["--config", "/nonexistent/fvrepo.toml", "layout", "--op", "init"])
        .assert()
        .failure();
}
