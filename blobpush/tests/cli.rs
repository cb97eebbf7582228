use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{tempdir, TempDir};

const KEY: &str = "c2VjcmV0LWtleQ==";

/// A working directory holding `settings.json` and nothing else.
fn workspace(settings: &str) -> TempDir {
    let dir = tempdir().expect("temp dir");
    fs::write(dir.path().join("settings.json"), settings).expect("write settings");
    dir
}

fn blobpush(cwd: &Path) -> Command {
    let mut cmd = Command::cargo_bin("blobpush").expect("Binary exists");
    cmd.current_dir(cwd)
        .env_remove("BLOBPUSH_ACCOUNT_NAME")
        .env_remove("BLOBPUSH_ACCOUNT_KEY")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_upload_flags() {
    let dir = tempdir().unwrap();
    blobpush(dir.path())
        .args(["upload", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--container-name")
                .and(predicate::str::contains("--continue-on-failure"))
                .and(predicate::str::contains("--concurrency")),
        );
}

#[test]
fn version_is_printed() {
    let dir = tempdir().unwrap();
    blobpush(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn missing_credentials_exit_with_one() {
    let dir = workspace(r#"{"mimes": {}}"#);
    fs::create_dir(dir.path().join("site")).unwrap();

    blobpush(dir.path())
        .args(["upload", "-p", "site", "-n", "web"])
        .assert()
        .code(1)
        .stderr(
            predicate::str::contains("[ERROR]")
                .and(predicate::str::contains("--account-name"))
                .and(predicate::str::contains("BLOBPUSH_ACCOUNT_NAME")),
        );
}

#[test]
fn missing_settings_file_exit_with_one() {
    let dir = tempdir().unwrap();

    blobpush(dir.path())
        .args(["upload", "-p", ".", "-n", "web", "-a", "acct", "-k", KEY])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[ERROR]").and(predicate::str::contains("settings.json")));
}

#[test]
fn nonexistent_path_fails_before_any_network_call() {
    let dir = workspace(r#"{"mimes": {}}"#);

    blobpush(dir.path())
        .args(["upload", "-p", "no-such-dir", "-n", "web", "-a", "acct", "-k", KEY])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn file_as_path_is_rejected() {
    let dir = workspace(r#"{"mimes": {}}"#);
    fs::write(dir.path().join("plain.txt"), "x").unwrap();

    blobpush(dir.path())
        .args(["upload", "-p", "plain.txt", "-n", "web", "-a", "acct", "-k", KEY])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("is not a folder"));
}

#[test]
fn cut_path_must_prefix_the_root() {
    let dir = workspace(r#"{"mimes": {}}"#);
    fs::create_dir(dir.path().join("site")).unwrap();

    blobpush(dir.path())
        .args(["upload", "-p", "site", "-c", "other", "-n", "web", "-a", "acct", "-k", KEY])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--cut-path"));
}

#[test]
fn invalid_container_name_is_rejected() {
    let dir = workspace(r#"{"mimes": {}}"#);
    fs::create_dir(dir.path().join("site")).unwrap();

    blobpush(dir.path())
        .args(["upload", "-p", "site", "-n", "Bad_Name", "-a", "acct", "-k", KEY])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[ERROR]"));
}

#[test]
fn credentials_from_settings_file_are_used() {
    // no flags and no env: the settings section supplies both values,
    // so the run gets as far as validating the path
    let dir = workspace(r#"{"mimes": {}, "storage_account": {"name": "acct", "key": "c2VjcmV0LWtleQ=="}}"#);

    blobpush(dir.path())
        .args(["upload", "-p", "missing", "-n", "web"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn usage_errors_exit_with_one() {
    let dir = tempdir().unwrap();
    blobpush(dir.path())
        .args(["upload", "-p", ".", "-n", "web", "--concurrency", "0"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("concurrency"));
}

#[test]
fn log_file_is_written_to_a_daily_folder() {
    let dir = tempdir().unwrap();

    blobpush(dir.path())
        .args(["upload", "-p", ".", "-n", "web"])
        .assert()
        .code(1);

    let logs = dir.path().join("logs");
    let day = fs::read_dir(&logs)
        .expect("logs dir")
        .filter_map(Result::ok)
        .find(|e| e.path().is_dir())
        .expect("daily folder");
    let content = fs::read_to_string(day.path().join("app.log")).expect("app.log");
    assert!(content.contains("Settings file not found"), "{content}");
}
