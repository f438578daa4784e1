//! Scripted provider for deterministic tests.
//!
//! Returns pre-configured baseline and final results, records every call, and
//! can simulate failures: a rejected start, or a fatal condition reported from
//! its monitor thread after a delay.
//!
//! # Example
//! ```no_run
//! use std::time::Duration;
//! use tirex_tracker::provider::{LogLevel, MockConfig, MockProvider};
//!
//! let provider = MockProvider::new(
//!     MockConfig::default().with_abort_after(Duration::from_millis(50), LogLevel::Critical, "disk full"),
//! );
//! ```

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, TrackerError};
use crate::measure::{MeasureRequest, ResultSet};

use super::{AbortCallback, LogCallback, LogLevel, MeasurementProvider, ProviderHooks};

/// Failure to simulate at a given step
#[derive(Clone, Debug)]
pub enum MockFailure {
    InvalidArgument(String),
    Provider(String),
}

impl MockFailure {
    fn into_error(self) -> TrackerError {
        match self {
            MockFailure::InvalidArgument(msg) => TrackerError::InvalidArgument(msg),
            MockFailure::Provider(msg) => TrackerError::ProviderFailure(msg),
        }
    }
}

#[derive(Clone, Debug)]
struct ScheduledReport {
    delay: Duration,
    level: LogLevel,
    message: String,
}

#[derive(Clone, Debug, Default)]
pub struct MockConfig {
    pub baseline: ResultSet,
    pub final_results: ResultSet,
    pub fail_baseline: Option<MockFailure>,
    pub fail_start: Option<MockFailure>,
    pub fail_stop: Option<MockFailure>,
    /// Raw text written by `export_native` instead of the computed document
    pub native_text: Option<String>,
    report: Option<ScheduledReport>,
}

impl MockConfig {
    pub fn with_baseline(mut self, baseline: ResultSet) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_final(mut self, results: ResultSet) -> Self {
        self.final_results = results;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = Some(MockFailure::Provider("mock-failure".into()));
        self
    }

    pub fn failing_baseline_with(mut self, failure: MockFailure) -> Self {
        self.fail_baseline = Some(failure);
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = Some(MockFailure::Provider("mock stop failure".into()));
        self
    }

    pub fn with_native_text(mut self, text: impl Into<String>) -> Self {
        self.native_text = Some(text.into());
        self
    }

    /// Report `message` at `level` from the monitor thread after `delay`.
    pub fn with_abort_after(mut self, delay: Duration, level: LogLevel, message: impl Into<String>) -> Self {
        self.report = Some(ScheduledReport {
            delay,
            level,
            message: message.into(),
        });
        self
    }
}

/// Handle for one mock monitoring run
#[derive(Debug)]
pub struct MockHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl MockHandle {
    fn finish(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.finish();
    }
}

#[derive(Clone, Debug, Default)]
pub struct MockProvider {
    config: MockConfig,
    hooks: ProviderHooks,
    calls: Arc<Mutex<Vec<String>>>,
    requests: Arc<Mutex<Vec<MeasureRequest>>>,
}

impl MockProvider {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Names of the trait methods called so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn requests(&self) -> Vec<MeasureRequest> {
        self.requests.lock().clone()
    }

    pub fn hooks(&self) -> &ProviderHooks {
        &self.hooks
    }

    fn record(&self, call: &str) {
        self.calls.lock().push(call.to_string());
    }
}

impl MeasurementProvider for MockProvider {
    type Handle = MockHandle;

    fn fetch_baseline(&mut self, request: &MeasureRequest) -> Result<ResultSet> {
        self.record("fetch_baseline");
        self.requests.lock().push(request.clone());
        if let Some(failure) = self.config.fail_baseline.clone() {
            return Err(failure.into_error());
        }
        Ok(self.config.baseline.clone())
    }

    fn start_monitoring(&mut self, _request: &MeasureRequest, _poll_interval_ms: i64) -> Result<MockHandle> {
        self.record("start_monitoring");
        if let Some(failure) = self.config.fail_start.clone() {
            return Err(failure.into_error());
        }
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let hooks = self.hooks.clone();
        let report = self.config.report.clone();
        let thread = std::thread::spawn(move || {
            let Some(report) = report else {
                let _ = stop_rx.recv();
                return;
            };
            if let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(report.delay) {
                hooks.report(report.level, "mock", &report.message);
                let _ = stop_rx.recv();
            }
        });
        Ok(MockHandle {
            stop_tx,
            thread: Some(thread),
        })
    }

    fn stop_monitoring(&mut self, mut handle: MockHandle) -> Result<ResultSet> {
        self.record("stop_monitoring");
        handle.finish();
        if let Some(failure) = self.config.fail_stop.clone() {
            return Err(failure.into_error());
        }
        Ok(self.config.final_results.clone())
    }

    fn export_native(&self, baseline: &ResultSet, result: &ResultSet, destination: &Path) -> Result<()> {
        self.record("export_native");
        match &self.config.native_text {
            Some(text) => {
                std::fs::write(destination, text)?;
                Ok(())
            }
            None => super::ir_metadata::write_native(baseline, result, destination),
        }
    }

    fn set_abort_threshold(&mut self, level: LogLevel) {
        self.hooks.set_threshold(level);
    }

    fn set_abort_callback(&mut self, callback: Option<AbortCallback>) {
        self.record(if callback.is_some() {
            "set_abort_callback"
        } else {
            "clear_abort_callback"
        });
        self.hooks.set_abort(callback);
    }

    fn set_log_callback(&mut self, callback: Option<LogCallback>) {
        self.hooks.set_log(callback);
    }
}
