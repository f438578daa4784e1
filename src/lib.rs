//! Reproducibility tracking for experiments.
//!
//! A [`TrackingSession`] wraps a unit of work with resource measurements from a
//! [`MeasurementProvider`], merges them with registered metadata, runtime facts
//! and a code archive, and writes everything as one ir_metadata document.
//!
//! ```no_run
//! use tirex_tracker::{MeasureRequest, SystemProvider, TrackingConfig, TrackingSession};
//!
//! # fn main() -> tirex_tracker::Result<()> {
//! let config = TrackingConfig::new(MeasureRequest::from_groups(["system", "git"])?)
//!     .with_export("run.ir_metadata")
//!     .with_name("bm25");
//! let run = TrackingSession::run(SystemProvider::new(), config, || {
//!     tirex_tracker::abort::checkpoint()?;
//!     Ok(42)
//! })?;
//! assert_eq!(run.value, 42);
//! # Ok(())
//! # }
//! ```

pub mod abort;
pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod git;
pub mod measure;
pub mod provider;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod util;

pub use abort::{AbortChannel, AbortRegistration};
pub use archive::{build_archive, ArchiveResult, ArchiveStrategy, InteractiveHost};
pub use config::Config;
pub use error::{Result, TrackerError};
pub use export::{deep_merge, ExportFormat};
pub use measure::{
    Aggregation, Measure, MeasureGroup, MeasureRequest, ResultEntry, ResultSet, ResultType,
    ResultValue,
};
pub use provider::{LogLevel, MeasurementProvider, MockProvider, SystemProvider};
pub use registry::{
    clear_file_register, clear_metadata_register, deregister_metadata, register_file,
    register_metadata, scoped_metadata, FileRegistry, MetadataPath, MetadataRegistry,
    MetadataValue, ScopedMetadata,
};
pub use runtime::RuntimeFacts;
pub use session::{SessionState, TrackedRun, TrackingConfig, TrackingSession};
