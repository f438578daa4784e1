//! Integration tests for the tracking session lifecycle
//!
//! Sessions run against the scripted mock provider and the built-in system
//! provider, exporting into temporary directories.

use super::common::git_fixtures::TestRepo;
use super::common::isolation::{isolated_config, session_lock, visible_entries};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tempfile::TempDir;
use tirex_tracker::archive::{archive_entries, ARCHIVE_FILE_NAME};
use tirex_tracker::export::{metadata_dir, read_document};
use tirex_tracker::provider::MockConfig;
use tirex_tracker::{
    abort, AbortChannel, FileRegistry, LogLevel, Measure, MockProvider, ResultValue, RuntimeFacts,
    SessionState, SystemProvider, TrackerError, TrackingSession,
};

/// Two sequential sessions exporting to different files in one directory
#[test]
fn test_different_destinations() {
    let _lock = session_lock();
    let dir = TempDir::new().unwrap();

    for name in ["metadata1.yml", "metadata2.yml"] {
        let config = isolated_config(&["os_name"]).with_export(dir.path().join(name));
        TrackingSession::start(MockProvider::default(), config)
            .unwrap()
            .stop()
            .unwrap();
    }

    assert_eq!(visible_entries(dir.path()), vec!["metadata1.yml", "metadata2.yml"]);
    for name in ["metadata1.yml", "metadata2.yml"] {
        let doc = read_document(&dir.path().join(name)).unwrap();
        assert!(doc.is_mapping(), "{} should hold a mapping", name);
    }
}

/// Exporting a second session to the same destination fails and keeps the first file
#[test]
fn test_redundant_export_is_rejected() {
    let _lock = session_lock();
    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("metadata.yml");

    TrackingSession::start(
        MockProvider::default(),
        isolated_config(&["os_name"]).with_export(&destination).with_name("first"),
    )
    .unwrap()
    .stop()
    .unwrap();
    let first = std::fs::read(&destination).unwrap();

    let err = TrackingSession::start(
        MockProvider::default(),
        isolated_config(&["os_name"]).with_export(&destination).with_name("second"),
    )
    .unwrap()
    .stop()
    .unwrap_err();

    assert!(matches!(err, TrackerError::AlreadyExists(_)));
    assert_eq!(std::fs::read(&destination).unwrap(), first);
    assert!(!AbortChannel::is_active());
}

/// A file registered under "subdir" is the only thing copied there
#[test]
fn test_file_registration_subdir() {
    let _lock = session_lock();
    let src = TempDir::new().unwrap();
    std::fs::write(src.path().join("qrels.txt"), "q1 0 d1 1\n").unwrap();
    std::fs::write(src.path().join("other.txt"), "not registered\n").unwrap();
    let files = FileRegistry::new();
    files.register(src.path(), "qrels.txt", Some("subdir")).unwrap();

    let out = TempDir::new().unwrap();
    let config = isolated_config(&["os_name"])
        .with_file_registry(files)
        .with_export(out.path().join("metadata.yml"));
    TrackingSession::start(MockProvider::default(), config)
        .unwrap()
        .stop()
        .unwrap();

    assert_eq!(visible_entries(&out.path().join("subdir")), vec!["qrels.txt"]);
    assert_eq!(
        std::fs::read_to_string(out.path().join("subdir/qrels.txt")).unwrap(),
        "q1 0 d1 1\n"
    );
}

/// A fatal provider condition interrupts the work once with the reported message
#[test]
fn test_abort_delivered_once() {
    let _lock = session_lock();
    let out = TempDir::new().unwrap();
    let destination = out.path().join("aborted.yml");
    let provider = MockProvider::new(MockConfig::default().with_abort_after(
        Duration::from_millis(40),
        LogLevel::Critical,
        "energy counter overflow",
    ));

    let mut session =
        TrackingSession::start(provider.clone(), isolated_config(&["os_name"]).with_export(&destination)).unwrap();
    let mut errors = Vec::new();
    for _ in 0..3 {
        if let Err(e) = abort::sleep(Duration::from_secs(20)) {
            errors.push(e);
            break;
        }
    }
    assert_eq!(session.state(), SessionState::Aborted);
    assert!(session.checkpoint().is_err());
    session.stop().unwrap();

    assert_eq!(errors.len(), 1);
    match &errors[0] {
        TrackerError::AbortedDuringWork(msg) => assert_eq!(msg, "energy counter overflow"),
        other => panic!("expected abort, got {:?}", other),
    }
    // Resources are still released and the export still happens.
    assert!(!AbortChannel::is_active());
    assert!(destination.is_file());
    assert!(provider.calls().contains(&"clear_abort_callback".to_string()));
}

/// A provider that fails to stop still gets its handle and abort hook torn down
#[test]
fn test_failing_stop_releases_resources() {
    let _lock = session_lock();
    let out = TempDir::new().unwrap();
    let destination = out.path().join("never.yml");
    let provider = MockProvider::new(MockConfig::default().failing_stop());

    let session =
        TrackingSession::start(provider.clone(), isolated_config(&["os_name"]).with_export(&destination)).unwrap();
    let err = session.stop().unwrap_err();

    assert!(matches!(err, TrackerError::ProviderFailure(_)));
    assert!(!AbortChannel::is_active());
    let calls = provider.calls();
    assert!(calls.contains(&"stop_monitoring".to_string()));
    assert_eq!(calls.last().map(String::as_str), Some("clear_abort_callback"));
    assert!(!destination.exists());
}

/// A panicking block still stops the session on unwind
#[test]
fn test_panic_in_tracked_block_releases_session() {
    let _lock = session_lock();
    let out = TempDir::new().unwrap();
    let destination = out.path().join("panicked.yml");
    let provider = MockProvider::default();
    let config = isolated_config(&["os_name"]).with_export(&destination);

    let handle_provider = provider.clone();
    let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
        let _ = TrackingSession::run(handle_provider, config, || -> tirex_tracker::Result<()> {
            panic!("tracked work failed");
        });
    }));

    assert!(result.is_err());
    assert!(!AbortChannel::is_active());
    assert!(destination.is_file());
    assert!(provider.calls().contains(&"stop_monitoring".to_string()));
}

/// Git facts and the git archive strategy on a real repository
#[test]
fn test_system_provider_in_git_repo() {
    let _lock = session_lock();
    let repo = TestRepo::new();
    repo.commit_file("lib/model.py", "W = 1\n", "Add model");
    repo.commit_file("stale.py", "old\n", "Add stale");
    repo.delete_file("stale.py");
    let script = repo.create_file("scripts/train.py", "print('train')\n");

    let out = TempDir::new().unwrap();
    let destination = out.path().join("run.ir_metadata");
    let mut config = isolated_config(&[
        "git_is_repo",
        "git_last_commit_hash",
        "git_branch",
        "git_uncommitted_changes",
        "git_archive_path",
        "time_elapsed_wall_clock_ms",
        "runtime_script_file_path",
    ])
    .with_export(&destination)
    .with_runtime(RuntimeFacts::detect().with_script(&script));
    config.code_archive = true;

    let provider = SystemProvider::with_workdir(&repo.path);
    let run = TrackingSession::run(provider, config, || {
        abort::sleep(Duration::from_millis(20))?;
        Ok(())
    })
    .unwrap();

    let results = run.results;
    assert_eq!(results.value(Measure::GitIsRepo), Some(&ResultValue::Bool(true)));
    assert_eq!(
        results.value(Measure::GitLastCommitHash).and_then(ResultValue::as_str),
        Some(repo.head_sha().as_str())
    );
    assert_eq!(
        results.value(Measure::GitUncommittedChanges),
        Some(&ResultValue::Bool(true))
    );
    assert_eq!(
        results.value(Measure::RuntimeScriptFilePath).and_then(ResultValue::as_str),
        Some("scripts/train.py")
    );
    assert!(results.contains(Measure::TimeElapsedWallClockMs));

    let archive = metadata_dir(&destination, ".tirex-tracker").join(ARCHIVE_FILE_NAME);
    assert_eq!(
        results.value(Measure::GitArchivePath).and_then(ResultValue::as_str),
        Some(archive.display().to_string().as_str())
    );
    let mut entries = archive_entries(&archive).unwrap();
    entries.sort();
    assert_eq!(entries, vec!["README.md", "lib/model.py", "scripts/train.py"]);

    let doc = read_document(&destination).unwrap();
    assert_eq!(
        doc["implementation"]["source"]["archive"]["script path"].as_str(),
        Some("scripts/train.py")
    );
    assert_eq!(doc["implementation"]["source"]["is repo"].as_bool(), Some(true));
}

/// Sessions outside any repository report that, without git facts
#[test]
fn test_system_provider_outside_repo() {
    let _lock = session_lock();
    let dir = TempDir::new().unwrap();
    let provider = SystemProvider::with_workdir(dir.path());
    let run = TrackingSession::run(provider, isolated_config(&["git_is_repo", "git_branch"]), || Ok(())).unwrap();
    // Parent directories of the temp dir are not expected to be repositories.
    if run.results.value(Measure::GitIsRepo) == Some(&ResultValue::Bool(false)) {
        assert!(!run.results.contains(Measure::GitBranch));
    }
}
