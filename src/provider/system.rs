//! Portable provider built from `sysinfo`, `getrusage` and the `git` CLI.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::{Result, TrackerError};
use crate::git::GitRepo;
use crate::measure::{Aggregation, Measure, MeasureGroup, MeasureRequest, ResultSet, ResultValue, TimeSeries};

use super::{AbortCallback, LogCallback, LogLevel, MeasurementProvider, ProviderHooks};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const COMPONENT: &str = "system";

/// Measures that need a before/after pair or sampling.
const MONITORED: &[Measure] = &[
    Measure::TimeStart,
    Measure::TimeStop,
    Measure::TimeElapsedWallClockMs,
    Measure::TimeElapsedUserMs,
    Measure::TimeElapsedSystemMs,
    Measure::CpuUsedProcessPercent,
    Measure::RamUsedProcessKb,
    Measure::RamUsedSystemMb,
];

/// Measures filled in by the tracking session itself.
const SESSION_FILLED: &[Measure] = &[Measure::GitArchivePath];

/// Built-in provider. Energy and most GPU measures are not available from it.
#[derive(Debug, Clone)]
pub struct SystemProvider {
    workdir: PathBuf,
    hooks: ProviderHooks,
}

impl Default for SystemProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProvider {
    /// Provider reporting git facts for the current directory.
    pub fn new() -> Self {
        Self::with_workdir(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn with_workdir(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            hooks: ProviderHooks::new(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn static_fact(&self, measure: Measure, host: &HostFacts, repo: Option<&GitRepo>) -> Option<ResultValue> {
        match measure {
            Measure::CpuArchitecture => Some(std::env::consts::ARCH.into()),
            Measure::CpuByteOrder => Some(
                if cfg!(target_endian = "little") {
                    "Little Endian"
                } else {
                    "Big Endian"
                }
                .into(),
            ),
            Measure::CpuAvailableSystemCores => std::thread::available_parallelism()
                .ok()
                .map(|n| ResultValue::Int(n.get() as i64)),
            Measure::GpuSupported => Some(false.into()),
            Measure::GitIsRepo => Some(repo.is_some().into()),
            Measure::GitRoot => repo.map(|r| r.root().display().to_string().into()),
            Measure::GitHash => repo.and_then(GitRepo::tree_hash).map(Into::into),
            Measure::GitLastCommitHash => repo.and_then(GitRepo::head_commit).map(Into::into),
            Measure::GitBranch => repo.and_then(GitRepo::branch).map(Into::into),
            Measure::GitBranchUpstream => repo.and_then(GitRepo::upstream).map(Into::into),
            Measure::GitTags => repo.map(|r| ResultValue::string_list(r.tags_at_head())),
            Measure::GitRemoteOrigin => repo.and_then(|r| r.remote_url("origin")).map(Into::into),
            Measure::GitUncommittedChanges => repo
                .and_then(|r| r.status().ok())
                .map(|s| s.has_uncommitted_changes().into()),
            Measure::GitUncheckedFiles => repo
                .and_then(|r| r.status().ok())
                .map(|s| s.has_untracked_files().into()),
            Measure::GitUnpushedChanges => {
                repo.map(|r| (r.unpushed_commits().unwrap_or(0) > 0).into())
            }
            _ => host.value(measure),
        }
    }
}

impl MeasurementProvider for SystemProvider {
    type Handle = SystemMonitor;

    fn fetch_baseline(&mut self, request: &MeasureRequest) -> Result<ResultSet> {
        let wants_git = request.measures().any(|m| m.group() == MeasureGroup::Git);
        let repo = if wants_git {
            GitRepo::discover(&self.workdir)
        } else {
            None
        };
        if let Some(repo) = &repo {
            let diff = repo.diff_stats();
            self.hooks.report(
                LogLevel::Info,
                "gitstats",
                &format!(
                    "{} files changed, {} insertions, {} deletions",
                    diff.files_changed, diff.additions, diff.deletions
                ),
            );
        }

        let host = HostFacts::probe();
        let mut results = ResultSet::new();
        for measure in request.measures() {
            if measure.is_runtime() || MONITORED.contains(&measure) || SESSION_FILLED.contains(&measure) {
                continue;
            }
            match self.static_fact(measure, &host, repo.as_ref()) {
                Some(value) => results.set(measure, value),
                None if measure.group() == MeasureGroup::Git && repo.is_none() => {}
                None => {
                    tracing::warn!(measure = %measure, "Measure is not associated with a data provider");
                    self.hooks.report(
                        LogLevel::Warn,
                        COMPONENT,
                        &format!("{} is not supported on this platform", measure),
                    );
                }
            }
        }
        Ok(results)
    }

    fn start_monitoring(&mut self, request: &MeasureRequest, poll_interval_ms: i64) -> Result<SystemMonitor> {
        let interval = match poll_interval_ms {
            i if i < 0 => Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            0 => {
                return Err(TrackerError::InvalidArgument(
                    "poll interval must not be zero".to_string(),
                ))
            }
            i => Duration::from_millis(i as u64),
        };

        let sample_ram = request.contains(Measure::RamUsedProcessKb);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let hooks = self.hooks.clone();
        let started_at = Instant::now();
        let thread = std::thread::Builder::new()
            .name("tirex-monitor".to_string())
            .spawn(move || {
                let mut series = TimeSeries::new();
                let mut sampler = if sample_ram {
                    ProcessSampler::new()
                        .map_err(|e| {
                            hooks.report(LogLevel::Error, COMPONENT, &format!("cannot sample process memory: {}", e))
                        })
                        .ok()
                } else {
                    None
                };
                loop {
                    if let Some(sampler) = sampler.as_mut() {
                        match sampler.rss_kb() {
                            Ok(kb) => series.add(started_at.elapsed(), kb as f64),
                            Err(e) => hooks.report(
                                LogLevel::Error,
                                COMPONENT,
                                &format!("failed to sample process memory: {}", e),
                            ),
                        }
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                series
            })?;

        tracing::debug!(interval_ms = interval.as_millis() as u64, "System monitor started");
        Ok(SystemMonitor {
            stop_tx,
            thread: Some(thread),
            request: request.clone(),
            started_at,
            started_wall: Utc::now(),
            cpu_start: cpu_times(),
        })
    }

    fn stop_monitoring(&mut self, mut handle: SystemMonitor) -> Result<ResultSet> {
        let series = handle.join()?;
        let wall = handle.started_at.elapsed();
        let cpu = cpu_times().and_then(|now| now.since(&handle.cpu_start));
        let request = &handle.request;

        let mut results = ResultSet::new();
        let mut put = |measure: Measure, value: ResultValue| {
            if request.contains(measure) {
                results.set(measure, value);
            }
        };
        put(Measure::TimeStart, timestamp(handle.started_wall).into());
        put(Measure::TimeStop, timestamp(Utc::now()).into());
        put(Measure::TimeElapsedWallClockMs, ResultValue::Int(wall.as_millis() as i64));
        if let Some(cpu) = cpu {
            put(Measure::TimeElapsedUserMs, ResultValue::Int(cpu.user_ms as i64));
            put(Measure::TimeElapsedSystemMs, ResultValue::Int(cpu.system_ms as i64));
            let wall_ms = wall.as_millis().max(1) as f64;
            let percent = (cpu.user_ms + cpu.system_ms) as f64 / wall_ms * 100.0;
            put(Measure::CpuUsedProcessPercent, ResultValue::Float((percent * 100.0).round() / 100.0));
        }
        if let Some(kb) = series.aggregate(ram_aggregation(request)) {
            put(Measure::RamUsedProcessKb, ResultValue::Int(kb.round() as i64));
        }
        if request.contains(Measure::RamUsedSystemMb) {
            if let Some(mb) = used_system_mb() {
                put(Measure::RamUsedSystemMb, ResultValue::Int(mb));
            }
        }
        tracing::debug!(samples = series.len(), "System monitor stopped");
        Ok(results)
    }

    fn set_abort_threshold(&mut self, level: LogLevel) {
        self.hooks.set_threshold(level);
    }

    fn set_abort_callback(&mut self, callback: Option<AbortCallback>) {
        self.hooks.set_abort(callback);
    }

    fn set_log_callback(&mut self, callback: Option<LogCallback>) {
        self.hooks.set_log(callback);
    }
}

/// Monitoring state owned by the session between start and stop.
#[derive(Debug)]
pub struct SystemMonitor {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<TimeSeries>>,
    request: MeasureRequest,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    cpu_start: Option<CpuTimes>,
}

impl SystemMonitor {
    fn join(&mut self) -> Result<TimeSeries> {
        let _ = self.stop_tx.send(());
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| TrackerError::ProviderFailure("monitor thread panicked".to_string())),
            None => Ok(TimeSeries::new()),
        }
    }
}

impl Drop for SystemMonitor {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.join();
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Host facts read once for the baseline.
struct HostFacts {
    sys: System,
}

impl HostFacts {
    fn probe() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_all();
        sys.refresh_memory();
        Self { sys }
    }

    fn value(&self, measure: Measure) -> Option<ResultValue> {
        let cpu = self.sys.cpus().first();
        match measure {
            Measure::OsName => Some(
                System::long_os_version()
                    .unwrap_or_else(|| std::env::consts::OS.to_string())
                    .into(),
            ),
            Measure::OsKernel => System::kernel_version().map(Into::into),
            Measure::CpuModelName => cpu.and_then(|c| non_empty(c.brand())),
            Measure::CpuVendorId => cpu.and_then(|c| non_empty(c.vendor_id())),
            Measure::CpuFrequencyMhz => cpu
                .map(|c| c.frequency())
                .filter(|mhz| *mhz > 0)
                .map(|mhz| ResultValue::Int(mhz as i64)),
            Measure::CpuCoresPerSocket => System::physical_core_count().map(|n| ResultValue::Int(n as i64)),
            Measure::CpuThreadsPerCore => System::physical_core_count()
                .filter(|physical| *physical > 0)
                .map(|physical| ResultValue::Int((self.sys.cpus().len() / physical).max(1) as i64)),
            Measure::RamAvailableSystemMb => (self.sys.total_memory() > 0)
                .then(|| ResultValue::Int((self.sys.total_memory() / 1024 / 1024) as i64)),
            _ => None,
        }
    }
}

fn non_empty(text: &str) -> Option<ResultValue> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.into())
}

/// Samples this process's resident memory.
struct ProcessSampler {
    sys: System,
    pid: Pid,
}

impl ProcessSampler {
    fn new() -> std::result::Result<Self, String> {
        let pid = sysinfo::get_current_pid().map_err(str::to_string)?;
        Ok(Self {
            sys: System::new(),
            pid,
        })
    }

    fn rss_kb(&mut self) -> std::result::Result<u64, String> {
        self.sys.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        self.sys
            .process(self.pid)
            .map(|p| p.memory() / 1024)
            .ok_or_else(|| format!("process {} not visible", self.pid))
    }
}

fn used_system_mb() -> Option<i64> {
    let mut sys = System::new();
    sys.refresh_memory();
    (sys.total_memory() > 0).then(|| (sys.used_memory() / 1024 / 1024) as i64)
}

/// Reduction for process RAM samples; max unless the request names one.
fn ram_aggregation(request: &MeasureRequest) -> Aggregation {
    request.aggregation(Measure::RamUsedProcessKb).unwrap_or(Aggregation::Max)
}

/// User and system CPU time of this process and its reaped children.
#[derive(Debug, Clone, Copy)]
struct CpuTimes {
    user_ms: u64,
    system_ms: u64,
}

impl CpuTimes {
    fn since(self, start: &Option<CpuTimes>) -> Option<CpuTimes> {
        let start = (*start)?;
        Some(CpuTimes {
            user_ms: self.user_ms.saturating_sub(start.user_ms),
            system_ms: self.system_ms.saturating_sub(start.system_ms),
        })
    }
}

#[cfg(unix)]
fn cpu_times() -> Option<CpuTimes> {
    fn usage(who: libc::c_int) -> Option<(u64, u64)> {
        let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
        // SAFETY: getrusage only writes into the struct we pass.
        let rc = unsafe { libc::getrusage(who, usage.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        // SAFETY: initialized by the successful call above.
        let usage = unsafe { usage.assume_init() };
        let ms = |tv: libc::timeval| tv.tv_sec as u64 * 1000 + tv.tv_usec as u64 / 1000;
        Some((ms(usage.ru_utime), ms(usage.ru_stime)))
    }
    let (su, ss) = usage(libc::RUSAGE_SELF)?;
    let (cu, cs) = usage(libc::RUSAGE_CHILDREN).unwrap_or((0, 0));
    Some(CpuTimes {
        user_ms: su + cu,
        system_ms: ss + cs,
    })
}

#[cfg(not(unix))]
fn cpu_times() -> Option<CpuTimes> {
    None
}
