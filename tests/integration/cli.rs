//! Integration tests for the `tirex-tracker` binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use tirex_tracker::export::read_document;

fn tracker(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tirex-tracker").expect("binary is built");
    // Keep a developer's ~/.tirex-tracker/config.toml out of the picture.
    cmd.env("HOME", home.path());
    cmd
}

#[test]
fn test_measures_lists_every_measure() {
    let home = TempDir::new().unwrap();
    tracker(&home)
        .arg("measures")
        .assert()
        .success()
        .stdout(predicate::str::contains("os_name"))
        .stdout(predicate::str::contains("runtime_code_archive_path"));
}

#[cfg(unix)]
#[test]
fn test_run_prints_json_results() {
    let home = TempDir::new().unwrap();
    let output = tracker(&home)
        .args(["run", "-m", "os_name", "-m", "time_elapsed_wall_clock_ms", "-f", "json", "--", "true"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(json["os_name"]["value"].is_string());
    assert_eq!(json["time_elapsed_wall_clock_ms"]["type"], "integer");
}

#[cfg(unix)]
#[test]
fn test_run_propagates_exit_code() {
    let home = TempDir::new().unwrap();
    tracker(&home)
        .args(["run", "-m", "os_name", "--", "sh", "-c", "exit 3"])
        .assert()
        .code(3);
}

#[cfg(unix)]
#[test]
fn test_run_exports_metadata_and_files() {
    let home = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    std::fs::write(work.path().join("qrels.txt"), "q1 0 d1 1\n").unwrap();
    let script = work.path().join("train.sh");
    std::fs::write(&script, "exit 0\n").unwrap();
    let out = TempDir::new().unwrap();
    let destination = out.path().join("run.ir_metadata");

    tracker(&home)
        .arg("run")
        .args(["-m", "os_name", "--export"])
        .arg(&destination)
        .args(["--name", "bm25", "--metadata", "data.test collection.name=msmarco"])
        .arg("--register-file")
        .arg(format!("{}:qrels.txt:inputs", work.path().display()))
        .arg("--")
        .arg("sh")
        .arg(&script)
        .assert()
        .success();

    let doc = read_document(&destination).unwrap();
    assert_eq!(doc["method"]["name"].as_str(), Some("bm25"));
    assert_eq!(doc["data"]["test collection"]["name"].as_str(), Some("msmarco"));
    assert_eq!(doc["implementation"]["executable"]["args"][0].as_str(), Some(script.to_str().unwrap()));
    assert!(out.path().join("inputs/qrels.txt").is_file());
    assert!(out
        .path()
        .join(".tirex-tracker/run.ir_metadata/code-archive.zip")
        .is_file());
}

#[cfg(unix)]
#[test]
fn test_inline_command_exports_without_archive() {
    let home = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let destination = out.path().join("inline.ir_metadata");

    tracker(&home)
        .args(["run", "-m", "os_name", "--export"])
        .arg(&destination)
        .args(["--", "sh", "-c", "exit 0"])
        .assert()
        .success();

    let doc = read_document(&destination).unwrap();
    assert!(doc["implementation"]["source"]["archive"].is_null());
    assert!(doc["implementation"]["script"].is_null());
    assert!(!out.path().join(".tirex-tracker/inline.ir_metadata/code-archive.zip").exists());
}

#[test]
fn test_unknown_measure_fails() {
    let home = TempDir::new().unwrap();
    tracker(&home)
        .args(["run", "-m", "not_a_measure", "--", "true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not_a_measure"));
}

#[test]
fn test_run_requires_command() {
    let home = TempDir::new().unwrap();
    tracker(&home).args(["run", "-m", "os_name"]).assert().failure();
}
