//! Facts about the program hosting the tracked work.

use std::path::{Path, PathBuf};

use crate::archive::ArchiveResult;
use crate::git::GitRepo;
use crate::measure::{Measure, MeasureRequest, ResultSet, ResultValue};

/// Name used for the `implementation.<runtime>` export section
pub const DEFAULT_RUNTIME_NAME: &str = "rust";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFacts {
    pub runtime_name: String,
    pub version: String,
    pub executable: String,
    pub arguments: Vec<String>,
    pub packages: Vec<String>,
    pub interactive: bool,
    /// Invoking script, as given
    pub script: Option<PathBuf>,
    pub notebook: Option<PathBuf>,
}

impl RuntimeFacts {
    /// Facts for the current process.
    pub fn detect() -> Self {
        let mut args = std::env::args();
        let invoked = args.next();
        let executable = std::env::current_exe()
            .map(|p| p.display().to_string())
            .ok()
            .or(invoked)
            .unwrap_or_default();
        Self {
            runtime_name: DEFAULT_RUNTIME_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            script: std::env::current_exe().ok(),
            executable,
            arguments: args.collect(),
            packages: Vec::new(),
            interactive: false,
            notebook: None,
        }
    }

    pub fn with_runtime_name(mut self, name: impl Into<String>) -> Self {
        self.runtime_name = name.into();
        self
    }

    pub fn with_executable(mut self, executable: impl Into<String>, arguments: Vec<String>) -> Self {
        self.executable = executable.into();
        self.arguments = arguments;
        self
    }

    pub fn with_packages(mut self, packages: Vec<String>) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Facts for a command that runs no script file.
    pub fn without_script(mut self) -> Self {
        self.script = None;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn interactive(mut self, notebook: Option<PathBuf>) -> Self {
        self.interactive = true;
        self.notebook = notebook;
        self
    }

    /// Script path relative to its git root, or as absolute as we can make it.
    pub fn script_path(&self) -> Option<PathBuf> {
        let script = self.script.as_deref()?;
        Some(display_path(script))
    }

    /// Result entries for the requested runtime measures.
    pub fn to_results(&self, request: &MeasureRequest, archive: Option<&ArchiveResult>) -> ResultSet {
        let mut results = ResultSet::new();
        for measure in request.measures() {
            let value: Option<ResultValue> = match measure {
                Measure::RuntimeVersion => Some(self.version.clone().into()),
                Measure::RuntimeExecutable => Some(self.executable.clone().into()),
                Measure::RuntimeArguments => Some(ResultValue::string_list(self.arguments.clone())),
                Measure::RuntimePackages => Some(ResultValue::string_list(self.packages.clone())),
                Measure::RuntimeIsInteractive => Some(self.interactive.into()),
                Measure::RuntimeScriptFilePath if !self.interactive => {
                    self.script_path().map(|p| p.display().to_string().into())
                }
                Measure::RuntimeNotebookFilePath => {
                    self.notebook.as_ref().map(|p| p.display().to_string().into())
                }
                Measure::RuntimeCodeArchivePath => {
                    archive.map(|a| a.archive_path.display().to_string().into())
                }
                Measure::RuntimeScriptFilePathInCodeArchive => {
                    archive.map(|a| a.script_path_in_archive.display().to_string().into())
                }
                Measure::RuntimeNotebookFilePathInCodeArchive => archive
                    .and_then(|a| a.notebook_path_in_archive.as_ref())
                    .map(|p| p.display().to_string().into()),
                Measure::GitArchivePath => archive
                    .filter(|a| a.git_root.is_some())
                    .map(|a| a.archive_path.display().to_string().into()),
                _ => None,
            };
            if let Some(value) = value {
                results.set(measure, value);
            }
        }
        results
    }
}

fn display_path(script: &Path) -> PathBuf {
    let absolute = script.canonicalize().unwrap_or_else(|_| script.to_path_buf());
    match GitRepo::discover(&absolute).and_then(|repo| repo.relative(&absolute)) {
        Some(relative) => relative,
        None => absolute,
    }
}
