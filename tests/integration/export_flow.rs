//! Integration tests for the export document
//!
//! Covers layering of provider output, runtime facts and registered metadata,
//! the ir_metadata envelope and compressed destinations.

use super::common::isolation::{isolated_config, session_lock};
use flate2::read::GzDecoder;
use std::io::Read;
use std::sync::Arc;
use tempfile::TempDir;
use tirex_tracker::archive::{archive_entries, InteractiveHost, ARCHIVE_FILE_NAME};
use tirex_tracker::export::{metadata_dir, read_document, write_document};
use tirex_tracker::provider::MockConfig;
use tirex_tracker::{
    Measure, MetadataPath, MetadataRegistry, MockProvider, ResultSet, RuntimeFacts,
    TrackingSession,
};

struct NotebookHost;

impl InteractiveHost for NotebookHost {
    fn script(&self) -> tirex_tracker::Result<(String, Vec<u8>)> {
        Ok(("script.py".to_string(), b"x = 1\nprint(x)\n".to_vec()))
    }

    fn notebook(&self) -> tirex_tracker::Result<(String, Vec<u8>)> {
        Ok(("notebook.ipynb".to_string(), br#"{"cells": [], "nbformat": 4}"#.to_vec()))
    }
}

fn provider_with_kernel(kernel: &str) -> MockProvider {
    let mut baseline = ResultSet::new();
    baseline.set(Measure::OsName, "MockOS");
    baseline.set(Measure::OsKernel, kernel);
    let mut final_results = ResultSet::new();
    final_results.set(Measure::TimeElapsedWallClockMs, 1500i64);
    MockProvider::new(MockConfig::default().with_baseline(baseline).with_final(final_results))
}

/// Registered metadata overrides provider sections on overlapping keys only
#[test]
fn test_registered_metadata_has_final_precedence() {
    let _lock = session_lock();
    let out = TempDir::new().unwrap();
    let destination = out.path().join("metadata.yml");
    let registry = MetadataRegistry::new();
    registry
        .register([
            (MetadataPath::dotted("platform.operating system.kernel"), "registered"),
            (MetadataPath::dotted("data.test collection.name"), "msmarco-passage"),
        ])
        .unwrap();

    let config = isolated_config(&["os_name", "os_kernel", "time_elapsed_wall_clock_ms"])
        .with_metadata_registry(registry)
        .with_export(&destination)
        .with_name("bm25")
        .with_description("BM25 baseline run");
    TrackingSession::start(provider_with_kernel("6.8.0"), config)
        .unwrap()
        .stop()
        .unwrap();

    let doc = read_document(&destination).unwrap();
    let os = &doc["platform"]["operating system"];
    assert_eq!(os["kernel"].as_str(), Some("registered"));
    assert_eq!(doc["data"]["test collection"]["name"].as_str(), Some("msmarco-passage"));
    assert_eq!(doc["method"]["name"].as_str(), Some("bm25"));
    assert_eq!(doc["method"]["description"].as_str(), Some("BM25 baseline run"));
    assert!(doc["resources"]["runtime"].is_mapping());
}

/// A gzip-compressed ir_metadata export survives a read and re-write unchanged
#[test]
fn test_compressed_envelope_round_trip() {
    let _lock = session_lock();
    let out = TempDir::new().unwrap();
    let destination = out.path().join("run.ir-metadata.gz");
    let config = isolated_config(&["os_name", "runtime_version"])
        .with_export(&destination)
        .with_runtime(RuntimeFacts::detect().with_version("1.2.3"));
    TrackingSession::start(provider_with_kernel("6.8.0"), config)
        .unwrap()
        .stop()
        .unwrap();

    let raw = std::fs::read(&destination).unwrap();
    let mut text = String::new();
    GzDecoder::new(raw.as_slice()).read_to_string(&mut text).unwrap();
    assert!(text.starts_with("ir_metadata.start\n"));
    assert!(text.ends_with("ir_metadata.end\n"));

    let first = read_document(&destination).unwrap();
    assert_eq!(first["implementation"]["executable"]["version"].as_str(), Some("1.2.3"));
    let copy = out.path().join("copy.ir_metadata");
    write_document(&copy, &first).unwrap();
    assert_eq!(read_document(&copy).unwrap(), first);
}

/// Plain YAML destinations carry no envelope
#[test]
fn test_yaml_destination_has_no_envelope() {
    let _lock = session_lock();
    let out = TempDir::new().unwrap();
    let destination = out.path().join("metadata.yaml");
    TrackingSession::start(provider_with_kernel("6.8.0"), isolated_config(&["os_name"]).with_export(&destination))
        .unwrap()
        .stop()
        .unwrap();
    let text = std::fs::read_to_string(&destination).unwrap();
    assert!(!text.contains("ir_metadata.start"));
    let parsed: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
    assert_eq!(parsed["platform"]["operating system"]["distribution"].as_str(), Some("MockOS"));
}

/// Interactive hosts contribute a script and a notebook to the archive
#[test]
fn test_interactive_archive_paths() {
    let _lock = session_lock();
    let out = TempDir::new().unwrap();
    let destination = out.path().join("notebook.ir_metadata");
    let mut config = isolated_config(&["runtime_is_interactive", "runtime_notebook_file_path_in_code_archive"])
        .with_export(&destination)
        .with_interactive_host(Arc::new(NotebookHost));
    config.code_archive = true;

    let results = TrackingSession::start(MockProvider::default(), config)
        .unwrap()
        .stop()
        .unwrap();

    let archive = metadata_dir(&destination, ".tirex-tracker").join(ARCHIVE_FILE_NAME);
    let mut entries = archive_entries(&archive).unwrap();
    entries.sort();
    assert_eq!(entries, vec!["notebook.ipynb", "script.py"]);

    let doc = read_document(&destination).unwrap();
    let source = &doc["implementation"]["source"]["archive"];
    assert_eq!(source["script path"].as_str(), Some("script.py"));
    assert_eq!(source["notebook path"].as_str(), Some("notebook.ipynb"));
    assert!(doc["implementation"]["script"].is_null());
    assert_eq!(doc["implementation"]["rust"]["interactive"].as_bool(), Some(true));
    assert_eq!(
        results
            .value(Measure::RuntimeNotebookFilePathInCodeArchive)
            .and_then(|v| v.as_str()),
        Some("notebook.ipynb")
    );
}

/// A rejected export leaves an earlier run's archive alone
#[test]
fn test_rejected_export_keeps_previous_archive() {
    let _lock = session_lock();
    let src = TempDir::new().unwrap();
    let script = src.path().join("run.sh");
    std::fs::write(&script, "echo first\n").unwrap();
    let out = TempDir::new().unwrap();
    let destination = out.path().join("metadata.yml");

    let config = || {
        let mut config = isolated_config(&["os_name"])
            .with_export(&destination)
            .with_runtime(RuntimeFacts::detect().with_script(&script));
        config.code_archive = true;
        config
    };

    TrackingSession::start(MockProvider::default(), config())
        .unwrap()
        .stop()
        .unwrap();
    let archive = metadata_dir(&destination, ".tirex-tracker").join(ARCHIVE_FILE_NAME);
    let before = std::fs::read(&archive).unwrap();

    std::fs::write(&script, "echo second\n").unwrap();
    assert!(TrackingSession::start(MockProvider::default(), config())
        .unwrap()
        .stop()
        .is_err());
    assert_eq!(std::fs::read(&archive).unwrap(), before);
}
