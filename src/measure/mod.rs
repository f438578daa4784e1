//! Measure identifiers, requests and results.
//!
//! A [`Measure`] names one fact a provider (or the runtime-facts adapter) can
//! report. The set is closed: identifiers outside of it are rejected when a
//! [`MeasureRequest`] is built.

mod info;
mod result;
mod timeseries;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, TrackerError};

pub use info::MeasureInfo;
pub use result::{ResultEntry, ResultSet, ResultType, ResultValue};
pub use timeseries::TimeSeries;

macro_rules! measures {
    ($( $variant:ident => $id:literal, $name:literal, $group:ident, $rtype:ident, $desc:literal, $example:literal; )*) => {
        /// Every fact that can be requested from a tracking session.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum Measure {
            $($variant,)*
        }

        impl Measure {
            /// All measures in declaration order.
            pub const ALL: &'static [Measure] = &[$(Measure::$variant,)*];

            /// Stable identifier (snake case)
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Measure::$variant => $id,)*
                }
            }

            /// Human readable name, as used by the simple formatter
            pub fn display_name(&self) -> &'static str {
                match self {
                    $(Measure::$variant => $name,)*
                }
            }

            pub fn group(&self) -> MeasureGroup {
                match self {
                    $(Measure::$variant => MeasureGroup::$group,)*
                }
            }

            pub fn info(&self) -> MeasureInfo {
                match self {
                    $(Measure::$variant => MeasureInfo {
                        description: $desc,
                        result_type: ResultType::$rtype,
                        example: $example,
                    },)*
                }
            }
        }
    };
}

measures! {
    OsName => "os_name", "os name", System, String,
        "Name and version of the operating system.", "Ubuntu 24.04 LTS";
    OsKernel => "os_kernel", "os kernel", System, String,
        "Kernel release the process runs on.", "6.8.0-45-generic";
    TimeStart => "time_start", "time start", System, String,
        "Timestamp at which monitoring started (RFC 3339).", "2024-01-01T00:00:00Z";
    TimeStop => "time_stop", "time stop", System, String,
        "Timestamp at which monitoring stopped (RFC 3339).", "2024-01-01T00:00:05Z";
    TimeElapsedWallClockMs => "time_elapsed_wall_clock_ms", "time elapsed wall clock ms", System, Integer,
        "Wall clock time between start and stop in milliseconds.", "5012";
    TimeElapsedUserMs => "time_elapsed_user_ms", "time elapsed user ms", System, Integer,
        "CPU time spent in user mode in milliseconds.", "4210";
    TimeElapsedSystemMs => "time_elapsed_system_ms", "time elapsed system ms", System, Integer,
        "CPU time spent in kernel mode in milliseconds.", "120";
    CpuUsedProcessPercent => "cpu_used_process_percent", "cpu used process percent", System, Floating,
        "CPU utilization of the tracked process.", "87.5";
    CpuUsedSystemPercent => "cpu_used_system_percent", "cpu used system percent", System, Floating,
        "CPU utilization of the whole system.", "43.0";
    CpuAvailableSystemCores => "cpu_available_system_cores", "cpu available system cores", System, Integer,
        "Number of logical cores available to the process.", "16";
    CpuEnergySystemJoules => "cpu_energy_system_joules", "cpu energy system joules", Energy, Floating,
        "Energy consumed by the CPU package in joules.", "311.2";
    CpuFeatures => "cpu_features", "cpu features", System, String,
        "Instruction set extensions reported by the CPU.", "sse4_2 avx2 fma";
    CpuFrequencyMhz => "cpu_frequency_mhz", "cpu frequency mhz", System, Integer,
        "Current CPU clock frequency.", "3600";
    CpuFrequencyMinMhz => "cpu_frequency_min_mhz", "cpu frequency min mhz", System, Integer,
        "Minimum CPU clock frequency.", "800";
    CpuFrequencyMaxMhz => "cpu_frequency_max_mhz", "cpu frequency max mhz", System, Integer,
        "Maximum CPU clock frequency.", "4900";
    CpuVendorId => "cpu_vendor_id", "cpu vendor id", System, String,
        "CPU vendor identification string.", "GenuineIntel";
    CpuByteOrder => "cpu_byte_order", "cpu byte order", System, String,
        "Endianness of the CPU.", "Little Endian";
    CpuArchitecture => "cpu_architecture", "cpu architecture", System, String,
        "Instruction set architecture.", "x86_64";
    CpuModelName => "cpu_model_name", "cpu model name", System, String,
        "Marketing name of the CPU model.", "Intel(R) Core(TM) i7-10700K";
    CpuCoresPerSocket => "cpu_cores_per_socket", "cpu cores per socket", System, Integer,
        "Physical cores per CPU socket.", "8";
    CpuThreadsPerCore => "cpu_threads_per_core", "cpu threads per core", System, Integer,
        "Hardware threads per physical core.", "2";
    CpuCaches => "cpu_caches", "cpu caches kb", System, String,
        "Cache sizes per level in kilobytes.", "l1: 512, l2: 2048, l3: 16384";
    CpuVirtualization => "cpu_virtualization", "cpu virtualization", System, String,
        "Hardware virtualization support.", "VT-x";
    RamUsedProcessKb => "ram_used_process_kb", "ram used process kb", System, Integer,
        "Resident memory of the tracked process in kilobytes.", "204800";
    RamUsedSystemMb => "ram_used_system_mb", "ram used system mb", System, Integer,
        "Memory in use system wide in megabytes.", "8123";
    RamAvailableSystemMb => "ram_available_system_mb", "ram available system mb", System, Integer,
        "Total memory of the system in megabytes.", "32000";
    RamEnergySystemJoules => "ram_energy_system_joules", "ram energy system joules", Energy, Floating,
        "Energy consumed by DRAM in joules.", "42.0";
    GpuSupported => "gpu_supported", "gpu supported", Gpu, Boolean,
        "Whether GPU measurements are supported.", "true";
    GpuModelName => "gpu_model_name", "gpu model name", Gpu, String,
        "Model name of the GPU.", "NVIDIA GeForce RTX 3090";
    GpuNumCores => "gpu_num_cores", "gpu num cores", Gpu, Integer,
        "Number of GPU cores.", "10496";
    GpuUsedProcessPercent => "gpu_used_process_percent", "gpu used process percent", Gpu, Floating,
        "GPU utilization of the tracked process.", "65.0";
    GpuUsedSystemPercent => "gpu_used_system_percent", "gpu used system percent", Gpu, Floating,
        "GPU utilization of the whole system.", "70.0";
    GpuVramUsedProcessMb => "gpu_vram_used_process_mb", "gpu vram used process mb", Gpu, Integer,
        "Video memory used by the tracked process.", "4096";
    GpuVramUsedSystemMb => "gpu_vram_used_system_mb", "gpu vram used system mb", Gpu, Integer,
        "Video memory in use system wide.", "6144";
    GpuVramAvailableSystemMb => "gpu_vram_available_system_mb", "gpu vram available system mb", Gpu, Integer,
        "Total video memory.", "24576";
    GpuEnergySystemJoules => "gpu_energy_system_joules", "gpu energy system joules", Energy, Floating,
        "Energy consumed by the GPU in joules.", "512.7";
    GitIsRepo => "git_is_repo", "git is repo", Git, Boolean,
        "Whether the working directory is inside a git working tree.", "true";
    GitHash => "git_hash", "git hash", Git, String,
        "Hash of the working tree state (HEAD tree object).", "4b825dc642cb6eb9a060e54bf8d69288fbee4904";
    GitLastCommitHash => "git_last_commit_hash", "git last commit hash", Git, String,
        "Hash of the most recent commit.", "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
    GitBranch => "git_branch", "git branch", Git, String,
        "Currently checked out branch.", "main";
    GitBranchUpstream => "git_branch_upstream", "git branch upstream", Git, String,
        "Upstream of the checked out branch.", "origin/main";
    GitTags => "git_tags", "git tags", Git, StringList,
        "Tags pointing at the most recent commit.", "[\"v0.2.0\"]";
    GitRemoteOrigin => "git_remote_origin", "git remote origin", Git, String,
        "URL of the origin remote.", "https://github.com/tira-io/tirex-tracker.git";
    GitUncommittedChanges => "git_uncommitted_changes", "git uncommitted changes", Git, Boolean,
        "Whether tracked files have uncommitted modifications.", "false";
    GitUnpushedChanges => "git_unpushed_changes", "git unpushed changes", Git, Boolean,
        "Whether commits exist that are not on the upstream branch.", "false";
    GitUncheckedFiles => "git_unchecked_files", "git unchecked files", Git, Boolean,
        "Whether untracked files exist in the working tree.", "true";
    GitRoot => "git_root", "git root", Git, String,
        "Root directory of the git working tree.", "/home/user/project";
    GitArchivePath => "git_archive_path", "git archive path", Git, String,
        "Path of the archive containing the tracked files.", "/home/user/project/.tirex-tracker/code-archive.zip";
    RuntimeVersion => "runtime_version", "runtime version", Runtime, String,
        "Version of the runtime hosting the tracked work.", "0.2.0";
    RuntimeExecutable => "runtime_executable", "runtime executable", Runtime, String,
        "Executable that runs the tracked work.", "/usr/local/bin/experiment";
    RuntimeArguments => "runtime_arguments", "runtime arguments", Runtime, StringList,
        "Arguments passed to the executable.", "[\"--dataset\", \"msmarco\"]";
    RuntimePackages => "runtime_packages", "runtime packages", Runtime, StringList,
        "Packages available to the runtime.", "[\"serde==1.0.210\"]";
    RuntimeIsInteractive => "runtime_is_interactive", "runtime is interactive", Runtime, Boolean,
        "Whether the work runs inside an interactive host.", "false";
    RuntimeScriptFilePath => "runtime_script_file_path", "runtime script file path", Runtime, String,
        "Path of the invoking script, relative to the git root when available.", "src/main.rs";
    RuntimeNotebookFilePath => "runtime_notebook_file_path", "runtime notebook file path", Runtime, String,
        "Path of the notebook that hosts the tracked work.", "analysis.ipynb";
    RuntimeCodeArchivePath => "runtime_code_archive_path", "runtime code archive path", Runtime, String,
        "Archive that contains a snapshot of the code.", "/path/to/code-archive.zip";
    RuntimeScriptFilePathInCodeArchive => "runtime_script_file_path_in_code_archive", "runtime script file path in code archive", Runtime, String,
        "The script that was executed, relative to the archive root.", "src/main.rs";
    RuntimeNotebookFilePathInCodeArchive => "runtime_notebook_file_path_in_code_archive", "runtime notebook file path in code archive", Runtime, String,
        "The notebook that was executed, relative to the archive root.", "notebook.ipynb";
}

impl Measure {
    /// Whether this measure is computed by the runtime-facts adapter instead of a provider.
    pub fn is_runtime(&self) -> bool {
        self.group() == MeasureGroup::Runtime
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Measure {
    type Err = TrackerError;

    /// Accepts `OS_NAME`, `os_name` and `os-name`.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        if normalized.is_empty() {
            return Err(TrackerError::InvalidArgument(
                "empty measure identifier".to_string(),
            ));
        }
        Measure::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| TrackerError::InvalidArgument(format!("unknown measure '{}'", s.trim())))
    }
}

impl Serialize for Measure {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Measure {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Named groups of measures, matching the data sources the CLI can poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureGroup {
    Git,
    System,
    Energy,
    Gpu,
    Runtime,
}

impl MeasureGroup {
    pub const ALL: &'static [MeasureGroup] = &[
        MeasureGroup::Git,
        MeasureGroup::System,
        MeasureGroup::Energy,
        MeasureGroup::Gpu,
        MeasureGroup::Runtime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MeasureGroup::Git => "git",
            MeasureGroup::System => "system",
            MeasureGroup::Energy => "energy",
            MeasureGroup::Gpu => "gpu",
            MeasureGroup::Runtime => "runtime",
        }
    }

    /// Measures belonging to this group
    pub fn measures(&self) -> impl Iterator<Item = Measure> + '_ {
        Measure::ALL.iter().copied().filter(move |m| m.group() == *self)
    }
}

impl FromStr for MeasureGroup {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "git" => Ok(MeasureGroup::Git),
            "system" => Ok(MeasureGroup::System),
            "energy" => Ok(MeasureGroup::Energy),
            "gpu" => Ok(MeasureGroup::Gpu),
            "runtime" => Ok(MeasureGroup::Runtime),
            other => Err(TrackerError::InvalidArgument(format!(
                "unknown measure group '{}'",
                other
            ))),
        }
    }
}

/// Reduction applied to a periodically sampled measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Report the last observed value
    #[default]
    No,
    Max,
    Min,
    Mean,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::No => "no",
            Aggregation::Max => "max",
            Aggregation::Min => "min",
            Aggregation::Mean => "mean",
        }
    }
}

impl FromStr for Aggregation {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no" | "none" => Ok(Aggregation::No),
            "max" => Ok(Aggregation::Max),
            "min" => Ok(Aggregation::Min),
            "mean" | "avg" => Ok(Aggregation::Mean),
            other => Err(TrackerError::InvalidArgument(format!(
                "unknown aggregation '{}'",
                other
            ))),
        }
    }
}

/// An ordered set of requested measures, each with its aggregation mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasureRequest {
    entries: Vec<(Measure, Aggregation)>,
}

impl MeasureRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request every known measure without aggregation
    pub fn all() -> Self {
        Self {
            entries: Measure::ALL
                .iter()
                .map(|m| (*m, Aggregation::No))
                .collect(),
        }
    }

    /// Add a measure. Requesting the same measure twice is an error.
    pub fn push(&mut self, measure: Measure, aggregation: Aggregation) -> Result<()> {
        if self.contains(measure) {
            return Err(TrackerError::InvalidArgument(format!(
                "measure '{}' was requested more than once",
                measure
            )));
        }
        self.entries.push((measure, aggregation));
        Ok(())
    }

    pub fn with(mut self, measure: Measure, aggregation: Aggregation) -> Result<Self> {
        self.push(measure, aggregation)?;
        Ok(self)
    }

    /// Build a request from textual identifiers, rejecting unknown ones.
    pub fn from_ids<I, S>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut request = Self::new();
        for id in ids {
            request.push(id.as_ref().parse()?, Aggregation::No)?;
        }
        Ok(request)
    }

    /// Build a request containing every measure of the named groups.
    pub fn from_groups<I, S>(groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut request = Self::new();
        for name in groups {
            let group: MeasureGroup = name.as_ref().parse()?;
            for measure in group.measures() {
                if !request.contains(measure) {
                    request.entries.push((measure, Aggregation::No));
                }
            }
        }
        Ok(request)
    }

    pub fn contains(&self, measure: Measure) -> bool {
        self.entries.iter().any(|(m, _)| *m == measure)
    }

    pub fn aggregation(&self, measure: Measure) -> Option<Aggregation> {
        self.entries
            .iter()
            .find(|(m, _)| *m == measure)
            .map(|(_, agg)| *agg)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Measure, Aggregation)> + '_ {
        self.entries.iter().copied()
    }

    pub fn measures(&self) -> impl Iterator<Item = Measure> + '_ {
        self.entries.iter().map(|(m, _)| *m)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split into (runtime-facts measures, provider measures).
    pub fn split_runtime(&self) -> (MeasureRequest, MeasureRequest) {
        let (runtime, provider): (Vec<_>, Vec<_>) =
            self.entries.iter().copied().partition(|(m, _)| m.is_runtime());
        (
            MeasureRequest { entries: runtime },
            MeasureRequest { entries: provider },
        )
    }
}
