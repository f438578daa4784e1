//! Error types for tracking, registry and export operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Error, Debug)]
pub enum TrackerError {
    /// Malformed or unknown measure id, or an unusable configuration value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The measurement provider reported a non-argument error.
    #[error("Provider failure: {0}")]
    ProviderFailure(String),

    /// The export destination exists already.
    #[error("Export destination already exists: {0}")]
    AlreadyExists(PathBuf),

    /// A registered file vanished before it could be copied.
    #[error("Registered file is missing: {0}")]
    MissingFile(PathBuf),

    /// Deregistering a metadata path that has no visible registration.
    #[error("Metadata key not found: {0}")]
    KeyNotFound(String),

    /// A fatal condition detected by the provider interrupted the tracked work.
    #[error("Tracked work was aborted: {0}")]
    AbortedDuringWork(String),

    /// Another abort handler is already installed in this process.
    #[error("An abort handler is already registered for this process")]
    AbortChannelBusy,

    /// A scoped registration was closed while a newer one was still open.
    #[error("Scoped registration closed out of order (overlay {0} is not the innermost)")]
    ScopeOrder(u64),

    #[error("Git command failed: {0}")]
    Git(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl TrackerError {
    /// Whether this error came from the abort channel rather than a synchronous call.
    pub fn is_abort(&self) -> bool {
        matches!(self, TrackerError::AbortedDuringWork(_))
    }
}
