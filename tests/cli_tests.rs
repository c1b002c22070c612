/// CLI tests for kreify.
///
/// Each test writes a JSON state file into a temporary directory and runs
/// the binary against it.
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value as JsonValue, json};
use std::path::PathBuf;
use tempfile::TempDir;

fn state_file(dir: &TempDir, value: &JsonValue) -> PathBuf {
    let path = dir.path().join("state.json");
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

fn kreify() -> Command {
    let mut cmd = Command::cargo_bin("kreify").unwrap();
    cmd.env_remove("KORU_REIFY_MODE")
        .env_remove("KORU_REIFY_PERMISSIVE")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_show_prints_state() {
    let dir = TempDir::new().unwrap();
    let file = state_file(&dir, &json!({"count": 1, "prices": [3, 4]}));

    kreify()
        .arg("show")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"count\": 1"));
}

#[test]
fn test_show_snapshot_includes_derivations() {
    let dir = TempDir::new().unwrap();
    let file = state_file(&dir, &json!({"prices": [3, 4, 5]}));

    kreify()
        .args(["show", "--snapshot", "--derive", "total=sum:prices"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total\": 12"));

    kreify()
        .args(["show", "--derive", "total=sum:prices"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("total").not());
}

#[test]
fn test_get_path_and_missing_path() {
    let dir = TempDir::new().unwrap();
    let file = state_file(&dir, &json!({"todos": [{"text": "write"}]}));

    kreify()
        .arg("get")
        .arg(&file)
        .arg("todos.0.text")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"write\""));

    kreify()
        .arg("get")
        .arg(&file)
        .arg("todos.3.text")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Path not found"));
}

#[test]
fn test_keys_lists_nested_container() {
    let dir = TempDir::new().unwrap();
    let file = state_file(&dir, &json!({"user": {"name": "a", "age": 3}}));

    kreify()
        .arg("keys")
        .arg(&file)
        .arg("user")
        .assert()
        .success()
        .stdout(predicate::str::contains("name").and(predicate::str::contains("age")));
}

#[test]
fn test_apply_strict_rejects_new_key() {
    let dir = TempDir::new().unwrap();
    let file = state_file(&dir, &json!({"count": 0}));

    kreify()
        .arg("apply")
        .arg(&file)
        .args(["--op", "set:fresh=1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("fresh"));

    kreify()
        .arg("--permissive")
        .arg("apply")
        .arg(&file)
        .args(["--op", "set:fresh=1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"fresh\": 1"));
}

#[test]
fn test_apply_write_persists() {
    let dir = TempDir::new().unwrap();
    let file = state_file(&dir, &json!({"count": 0, "list": [1]}));

    kreify()
        .arg("apply")
        .arg(&file)
        .args(["--op", "set:count=5", "--op", "push:list=2", "--op", "delete:list.0"])
        .arg("--write")
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));

    let written: JsonValue = serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
    assert_eq!(written, json!({"count": 5, "list": [null, 2]}));
}

#[test]
fn test_apply_diff() {
    let dir = TempDir::new().unwrap();
    let file = state_file(&dir, &json!({"count": 0, "list": [1]}));

    kreify()
        .arg("apply")
        .arg(&file)
        .args(["--op", "set:count=9", "--op", "push:list=3", "--diff"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Changes:")
                .and(predicate::str::contains("~ count: 0 -> 9"))
                .and(predicate::str::contains("+ list.1 = 3")),
        );
}

#[test]
fn test_apply_watch_container_path() {
    let dir = TempDir::new().unwrap();
    let file = state_file(&dir, &json!({"user": {"name": "a"}}));

    kreify()
        .args(["--mode", "reactive", "apply"])
        .arg(&file)
        .args(["--op", "set:user.name=\"b\"", "--watch", "user"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"user = {"name":"b"}"#));
}

#[test]
fn test_apply_watch_requires_reactive() {
    let dir = TempDir::new().unwrap();
    let file = state_file(&dir, &json!({"count": 0}));

    kreify()
        .arg("apply")
        .arg(&file)
        .args(["--op", "set:count=1", "--watch", "count"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--watch requires --mode reactive"));

    kreify()
        .args(["--mode", "reactive", "apply"])
        .arg(&file)
        .args(["--op", "set:count=1", "--op", "set:count=1", "--op", "set:count=2"])
        .args(["--watch", "count"])
        .assert()
        .success()
        .stdout(predicate::str::contains("count = 1").and(predicate::str::contains("count = 2")));
}

#[test]
fn test_mode_from_environment() {
    let dir = TempDir::new().unwrap();
    let file = state_file(&dir, &json!({"count": 0}));

    kreify()
        .env("KORU_REIFY_MODE", "reactive")
        .arg("apply")
        .arg(&file)
        .args(["--op", "set:count=3", "--watch", "count"])
        .assert()
        .success()
        .stdout(predicate::str::contains("count = 3"));

    kreify()
        .env("KORU_REIFY_MODE", "eager")
        .arg("show")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown mode"));
}

#[test]
fn test_invalid_json_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{not json").unwrap();

    kreify()
        .arg("show")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to reify"));
}
