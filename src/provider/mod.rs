//! The measurement provider boundary.
//!
//! A provider computes measure values. The tracking session drives it through
//! [`MeasurementProvider`]: baseline facts first, then monitoring between
//! `start_monitoring` and `stop_monitoring`, and optionally a native export.

pub mod ir_metadata;
pub mod mock;
mod system;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::measure::{MeasureRequest, ResultSet};

pub use crate::abort::AbortCallback;
pub use mock::{MockConfig, MockProvider};
pub use system::{SystemMonitor, SystemProvider};

/// Receives provider log output: `(level, component, message)`.
pub type LogCallback = Arc<dyn Fn(LogLevel, &str, &str) + Send + Sync>;

/// Severity of provider log output. Also used as the abort threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    #[default]
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "critical" | "fatal" => Ok(LogLevel::Critical),
            other => Err(TrackerError::InvalidArgument(format!(
                "unknown log level '{}'",
                other
            ))),
        }
    }
}

/// Contract between the tracking session and a measurement source.
///
/// `Handle` is the provider's monitoring state. It is created only by
/// `start_monitoring` and consumed only by `stop_monitoring`.
pub trait MeasurementProvider {
    type Handle: Send;

    /// Facts that stay fixed for the duration of a run.
    fn fetch_baseline(&mut self, request: &MeasureRequest) -> Result<ResultSet>;

    /// Begin monitoring. A negative interval selects the provider default.
    fn start_monitoring(&mut self, request: &MeasureRequest, poll_interval_ms: i64) -> Result<Self::Handle>;

    fn stop_monitoring(&mut self, handle: Self::Handle) -> Result<ResultSet>;

    /// Write the provider-computed ir_metadata sections to `destination`.
    fn export_native(&self, baseline: &ResultSet, result: &ResultSet, destination: &Path) -> Result<()> {
        ir_metadata::write_native(baseline, result, destination)
    }

    fn set_abort_threshold(&mut self, level: LogLevel);

    fn set_abort_callback(&mut self, callback: Option<AbortCallback>);

    fn set_log_callback(&mut self, callback: Option<LogCallback>);
}

#[derive(Default)]
struct HookState {
    threshold: LogLevel,
    abort: Option<AbortCallback>,
    log: Option<LogCallback>,
}

/// Callbacks a provider shares with its monitor thread.
///
/// [`ProviderHooks::report`] forwards to the log callback and fires the abort
/// callback when the severity reaches the threshold.
#[derive(Clone, Default)]
pub struct ProviderHooks {
    inner: Arc<Mutex<HookState>>,
}

impl ProviderHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_threshold(&self, level: LogLevel) {
        self.inner.lock().threshold = level;
    }

    pub fn threshold(&self) -> LogLevel {
        self.inner.lock().threshold
    }

    pub fn set_abort(&self, callback: Option<AbortCallback>) {
        self.inner.lock().abort = callback;
    }

    pub fn set_log(&self, callback: Option<LogCallback>) {
        self.inner.lock().log = callback;
    }

    pub fn report(&self, level: LogLevel, component: &str, message: &str) {
        let (log, abort) = {
            let state = self.inner.lock();
            let abort = if level >= state.threshold {
                state.abort.clone()
            } else {
                None
            };
            (state.log.clone(), abort)
        };
        if let Some(log) = log {
            log(level, component, message);
        }
        if let Some(abort) = abort {
            abort(message);
        }
    }
}

impl fmt::Debug for ProviderHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ProviderHooks")
            .field("threshold", &state.threshold)
            .field("abort", &state.abort.is_some())
            .field("log", &state.log.is_some())
            .finish()
    }
}

/// Log callback that re-emits provider output as `tracing` events.
pub fn tracing_log_callback() -> LogCallback {
    Arc::new(|level: LogLevel, component: &str, message: &str| match level {
        LogLevel::Trace => tracing::trace!(component, "{}", message),
        LogLevel::Debug => tracing::debug!(component, "{}", message),
        LogLevel::Info => tracing::info!(component, "{}", message),
        LogLevel::Warn => tracing::warn!(component, "{}", message),
        LogLevel::Error | LogLevel::Critical => tracing::error!(component, "{}", message),
    })
}
