//! Tracking sessions.
//!
//! A [`TrackingSession`] owns one measurement run: baseline facts, provider
//! monitoring, the abort channel and, when configured, the export. It is
//! stopped exactly once, either through [`TrackingSession::stop`] or by its
//! `Drop` on any other exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::abort::{AbortChannel, AbortRegistration};
use crate::archive::{ArchiveResult, InteractiveHost, StagedArchive, ARCHIVE_FILE_NAME};
use crate::error::Result;
use crate::export::{self, metadata_dir, ExportFormat, ExportJob};
use crate::measure::{MeasureRequest, ResultSet};
use crate::provider::{tracing_log_callback, LogLevel, MeasurementProvider};
use crate::registry::{FileRegistry, MetadataRegistry};
use crate::runtime::RuntimeFacts;

pub const DEFAULT_METADATA_DIR_NAME: &str = ".tirex-tracker";

/// Per-session settings
#[derive(Clone)]
pub struct TrackingConfig {
    pub measures: MeasureRequest,
    /// Negative means the provider's default interval
    pub poll_interval_ms: i64,
    pub export_path: Option<PathBuf>,
    pub export_format: Option<ExportFormat>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: MetadataRegistry,
    pub files: FileRegistry,
    pub runtime: Option<RuntimeFacts>,
    pub host: Option<Arc<dyn InteractiveHost>>,
    pub abort_threshold: LogLevel,
    pub metadata_dir_name: String,
    pub code_archive: bool,
}

impl TrackingConfig {
    pub fn new(measures: MeasureRequest) -> Self {
        Self {
            measures,
            poll_interval_ms: -1,
            export_path: None,
            export_format: None,
            name: None,
            description: None,
            metadata: MetadataRegistry::global().clone(),
            files: FileRegistry::global().clone(),
            runtime: None,
            host: None,
            abort_threshold: LogLevel::Critical,
            metadata_dir_name: DEFAULT_METADATA_DIR_NAME.to_string(),
            code_archive: true,
        }
    }

    pub fn with_poll_interval(mut self, ms: i64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = Some(path.into());
        self
    }

    pub fn with_export_format(mut self, format: ExportFormat) -> Self {
        self.export_format = Some(format);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata_registry(mut self, registry: MetadataRegistry) -> Self {
        self.metadata = registry;
        self
    }

    pub fn with_file_registry(mut self, registry: FileRegistry) -> Self {
        self.files = registry;
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeFacts) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_interactive_host(mut self, host: Arc<dyn InteractiveHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_abort_threshold(mut self, level: LogLevel) -> Self {
        self.abort_threshold = level;
        self
    }

    pub fn with_metadata_dir_name(mut self, name: impl Into<String>) -> Self {
        self.metadata_dir_name = name.into();
        self
    }

    /// Skip building the code archive on export.
    pub fn without_archive(mut self) -> Self {
        self.code_archive = false;
        self
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::new(MeasureRequest::all())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Started,
    /// A fatal provider condition interrupted the work; results are unreliable.
    Aborted,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Started => "started",
            SessionState::Aborted => "aborted",
            SessionState::Stopped => "stopped",
        }
    }
}

/// Value returned by the tracked block, with the session's results.
#[derive(Debug)]
pub struct TrackedRun<T> {
    pub value: T,
    pub results: ResultSet,
}

pub struct TrackingSession<P: MeasurementProvider> {
    id: Uuid,
    provider: P,
    config: TrackingConfig,
    state: SessionState,
    finished: bool,
    runtime: RuntimeFacts,
    provider_request: MeasureRequest,
    baseline: ResultSet,
    runtime_results: ResultSet,
    handle: Option<P::Handle>,
    registration: Option<AbortRegistration>,
    archive: Option<StagedArchive>,
}

impl<P: MeasurementProvider> TrackingSession<P> {
    /// Fetch the baseline, arm the abort channel and start monitoring.
    pub fn start(provider: P, config: TrackingConfig) -> Result<Self> {
        let mut runtime = config.runtime.clone().unwrap_or_else(RuntimeFacts::detect);
        if let Some(host) = config.host.as_ref().filter(|_| !runtime.interactive) {
            runtime = runtime.interactive(host.notebook_path());
        }
        let (_, provider_request) = config.measures.split_runtime();

        let mut session = Self {
            id: Uuid::new_v4(),
            provider,
            config,
            state: SessionState::Created,
            finished: false,
            runtime,
            provider_request,
            baseline: ResultSet::new(),
            runtime_results: ResultSet::new(),
            handle: None,
            registration: None,
            archive: None,
        };
        session.begin()?;
        Ok(session)
    }

    fn begin(&mut self) -> Result<()> {
        self.provider.set_log_callback(Some(tracing_log_callback()));
        self.baseline = self.provider.fetch_baseline(&self.provider_request)?;

        if self.config.export_path.is_some() && self.config.code_archive {
            self.archive = self.stage_archive()?;
        }
        let preview = self.archive_preview();
        self.runtime_results = self.runtime.to_results(&self.config.measures, preview.as_ref());

        let registration = AbortChannel::install()?;
        self.provider.set_abort_threshold(self.config.abort_threshold);
        self.provider.set_abort_callback(Some(registration.callback()));
        self.registration = Some(registration);

        let handle = self
            .provider
            .start_monitoring(&self.provider_request, self.config.poll_interval_ms)?;
        self.handle = Some(handle);
        self.state = SessionState::Started;

        tracing::info!(
            session = %self.id,
            measures = self.config.measures.len(),
            poll_interval_ms = self.config.poll_interval_ms,
            export = ?self.config.export_path,
            "Tracking session started"
        );
        Ok(())
    }

    fn stage_archive(&self) -> Result<Option<StagedArchive>> {
        let host = self.config.host.as_deref();
        let script = self.runtime.script.as_deref();
        if host.is_none() && script.is_none() {
            tracing::debug!(session = %self.id, "Nothing to archive");
            return Ok(None);
        }
        let staged = StagedArchive::build(script, host)?;
        tracing::debug!(
            session = %self.id,
            strategy = staged.staged().strategy.as_str(),
            "Code archive staged"
        );
        Ok(Some(staged))
    }

    /// Where the staged archive will live once the export persists it.
    fn archive_preview(&self) -> Option<ArchiveResult> {
        let staged = self.archive.as_ref()?;
        let destination = self.config.export_path.as_deref()?;
        Some(ArchiveResult {
            archive_path: metadata_dir(destination, &self.config.metadata_dir_name).join(ARCHIVE_FILE_NAME),
            ..staged.staged().clone()
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        let aborted = self.registration.as_ref().is_some_and(|r| r.is_aborted());
        if self.state == SessionState::Started && aborted {
            SessionState::Aborted
        } else {
            self.state
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn export_path(&self) -> Option<&Path> {
        self.config.export_path.as_deref()
    }

    /// Facts known before the work ran: baseline plus runtime facts.
    pub fn results(&self) -> ResultSet {
        let mut results = self.baseline.clone();
        results.merge(self.runtime_results.clone());
        results
    }

    /// Interruption point: fails once the provider has signalled an abort.
    pub fn checkpoint(&mut self) -> Result<()> {
        let Some(registration) = &self.registration else {
            return Ok(());
        };
        if let Err(err) = registration.check() {
            self.state = SessionState::Aborted;
            return Err(err);
        }
        Ok(())
    }

    /// Stop monitoring, tear down the abort channel and export.
    ///
    /// Returns baseline, runtime and stop facts merged in that order of precedence.
    pub fn stop(mut self) -> Result<ResultSet> {
        self.finish()
    }

    fn finish(&mut self) -> Result<ResultSet> {
        self.finished = true;
        let stopped = self
            .handle
            .take()
            .map(|handle| self.provider.stop_monitoring(handle));
        self.provider.set_abort_callback(None);
        let abort_message = self.registration.take().and_then(|r| r.message());

        let result = match stopped {
            None => {
                self.provider.set_log_callback(None);
                tracing::debug!(session = %self.id, "Released session that never started monitoring");
                return Ok(self.results());
            }
            Some(stopped) => {
                if let Some(message) = &abort_message {
                    self.state = SessionState::Aborted;
                    tracing::warn!(session = %self.id, reason = %message, "Tracking session was aborted");
                } else if self.state != SessionState::Aborted {
                    self.state = SessionState::Stopped;
                }
                stopped.and_then(|final_results| {
                    let mut results = self.results();
                    results.merge(final_results);
                    self.export(&results)?;
                    Ok(results)
                })
            }
        };
        self.provider.set_log_callback(None);

        match &result {
            Ok(results) => tracing::info!(
                session = %self.id,
                state = self.state.as_str(),
                results = results.len(),
                "Tracking session stopped"
            ),
            Err(e) => tracing::error!(session = %self.id, error = %e, "Tracking session stopped with error"),
        }
        result
    }

    fn export(&mut self, results: &ResultSet) -> Result<()> {
        let Some(destination) = self.config.export_path.clone() else {
            return Ok(());
        };
        let job = ExportJob {
            destination: &destination,
            format: self.config.export_format,
            name: self.config.name.as_deref(),
            description: self.config.description.as_deref(),
            metadata_dir_name: &self.config.metadata_dir_name,
            runtime: &self.runtime,
            archive: self.archive.take(),
            metadata: self.config.metadata.snapshot(),
            files: self.config.files.registrations(),
        };
        export::export(&self.provider, &self.baseline, results, job)?;
        Ok(())
    }

    /// Track `work` in a session that is stopped however the work ends.
    ///
    /// An abort signalled while the work ran is reported even when the work
    /// itself never reached an interruption point.
    pub fn run<T, F>(provider: P, config: TrackingConfig, work: F) -> Result<TrackedRun<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut session = Self::start(provider, config)?;
        let outcome = work();
        let interrupted = session.checkpoint();
        let stopped = session.stop();

        let value = match (outcome, interrupted) {
            (Err(err), _) | (Ok(_), Err(err)) => {
                if let Err(stop_err) = &stopped {
                    tracing::warn!(error = %stop_err, cause = %err, "Stop failed after tracked work ended early");
                }
                return Err(err);
            }
            (Ok(value), Ok(())) => value,
        };
        Ok(TrackedRun {
            value,
            results: stopped?,
        })
    }
}

impl<P: MeasurementProvider> Drop for TrackingSession<P> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.finish() {
            tracing::warn!(session = %self.id, error = %e, "Failed to stop tracking session on drop");
        }
    }
}
