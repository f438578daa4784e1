//! Isolation helpers
//!
//! Only one abort handler may be installed per process, so every test that
//! starts a tracking session holds [`session_lock`] for its duration.

use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use tirex_tracker::{FileRegistry, MeasureRequest, MetadataRegistry, TrackingConfig};

static SESSION_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub fn session_lock() -> MutexGuard<'static, ()> {
    SESSION_LOCK.lock()
}

/// Session config with fresh registries and no code archive.
#[allow(dead_code)] // Used in integration tests via #[path] includes
pub fn isolated_config(ids: &[&str]) -> TrackingConfig {
    TrackingConfig::new(MeasureRequest::from_ids(ids).expect("valid measure ids"))
        .with_metadata_registry(MetadataRegistry::new())
        .with_file_registry(FileRegistry::new())
        .without_archive()
}

/// Names of the non-hidden entries in `dir`, sorted.
#[allow(dead_code)] // Used in integration tests via #[path] includes
pub fn visible_entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("readable dir")
        .map(|e| e.expect("dir entry").file_name().to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}
