//! Command-line interface: track a command and print or export its results.

use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, ExitStatus};
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

use crate::abort;
use crate::config::Config;
use crate::error::{Result, TrackerError};
use crate::measure::{Aggregation, Measure, MeasureRequest, ResultSet};
use crate::provider::SystemProvider;
use crate::registry::{FileRegistry, MetadataPath, MetadataRegistry};
use crate::runtime::RuntimeFacts;
use crate::session::{TrackingConfig, TrackingSession};

const CHILD_POLL: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(
    name = "tirex-tracker",
    version,
    about = "Track resource usage and reproducibility metadata of a command",
    after_help = "\
EXAMPLES:
    tirex-tracker run -- python train.py                      Print measures after the run
    tirex-tracker run --export run.ir_metadata -- ./bench.sh  Write an ir_metadata document
    tirex-tracker measures                                    List every measure"
)]
pub struct Args {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Append logs to ~/.tirex-tracker/logs/tirex-tracker.log instead of stderr
    #[arg(long, global = true)]
    pub log_file: bool,

    /// Config file to use instead of ~/.tirex-tracker/config.toml
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command under a tracking session
    Run(RunArgs),
    /// List every measure with its group, type and description
    Measures,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Simple,
    Json,
}

#[derive(ClapArgs, Debug)]
pub struct RunArgs {
    /// Measure groups to track (git, system, energy, gpu, runtime)
    #[arg(short = 's', long = "source", value_name = "GROUP")]
    pub sources: Vec<String>,

    /// Individual measures to track, e.g. os_name or time-elapsed-wall-clock-ms
    #[arg(short = 'm', long = "measure", value_name = "MEASURE")]
    pub measures: Vec<String>,

    /// Poll interval in milliseconds (negative for the provider default)
    #[arg(long, value_name = "MS", allow_negative_numbers = true)]
    pub poll_interval: Option<i64>,

    /// Format of the printed results
    #[arg(short = 'f', long, value_enum, default_value = "simple")]
    pub format: OutputFormat,

    /// Write the results to a file instead of stdout
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Export an ir_metadata document to this path
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Method name recorded in the export
    #[arg(long)]
    pub name: Option<String>,

    /// Method description recorded in the export
    #[arg(long)]
    pub description: Option<String>,

    /// Extra metadata as key.path=value
    #[arg(long = "metadata", value_name = "KEY=VALUE", value_parser = parse_metadata)]
    pub metadata: Vec<(String, String)>,

    /// Copy ROOT/FILE next to the export, optionally into SUBDIR
    #[arg(long = "register-file", value_name = "ROOT:FILE[:SUBDIR]", value_parser = parse_file_spec)]
    pub register_files: Vec<FileSpec>,

    /// Do not build a code archive for the export
    #[arg(long)]
    pub no_archive: bool,

    /// Command to track
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSpec {
    pub root: PathBuf,
    pub file: PathBuf,
    pub subdir: Option<String>,
}

/// Parse `key.path=value`.
pub fn parse_metadata(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.trim().is_empty() {
        return Err(format!("empty metadata key in '{}'", raw));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

/// Parse `ROOT:FILE[:SUBDIR]`.
pub fn parse_file_spec(raw: &str) -> std::result::Result<FileSpec, String> {
    let mut parts = raw.splitn(3, ':');
    let root = parts.next().filter(|p| !p.is_empty());
    let file = parts.next().filter(|p| !p.is_empty());
    let (Some(root), Some(file)) = (root, file) else {
        return Err(format!("expected ROOT:FILE[:SUBDIR], got '{}'", raw));
    };
    Ok(FileSpec {
        root: PathBuf::from(root),
        file: PathBuf::from(file),
        subdir: parts.next().map(str::to_string),
    })
}

/// Load the config named on the command line, or the default one.
pub fn load_config(args: &Args) -> Result<Config> {
    match &args.config {
        Some(path) => Config::load_from(path),
        None => Ok(Config::load()),
    }
}

/// Execute the parsed command. Returns the process exit code.
pub fn execute(args: Args) -> anyhow::Result<i32> {
    let config = load_config(&args).context("Failed to load configuration")?;
    match args.command {
        Command::Measures => {
            print!("{}", list_measures());
            Ok(0)
        }
        Command::Run(run) => run_command(run, &config),
    }
}

/// Resolve `--source`/`--measure` into a request, falling back to the configured groups.
pub fn resolve_measures(sources: &[String], measures: &[String], config: &Config) -> Result<MeasureRequest> {
    if sources.is_empty() && measures.is_empty() {
        return config.default_measures();
    }
    let mut request = MeasureRequest::from_groups(sources)?;
    for id in measures {
        let measure: Measure = id.parse()?;
        if !request.contains(measure) {
            request.push(measure, Aggregation::No)?;
        }
    }
    Ok(request)
}

/// Runtime facts describing the tracked command rather than this binary.
///
/// Commands without a script file argument (`python -c ...`) get no script.
pub fn command_runtime(command: &[String]) -> Result<RuntimeFacts> {
    let Some((program, arguments)) = command.split_first() else {
        return Err(TrackerError::InvalidArgument("no command given".to_string()));
    };
    let executable = which::which(program).unwrap_or_else(|_| PathBuf::from(program));
    let runtime_name = executable
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.clone());
    let facts = RuntimeFacts::detect()
        .with_runtime_name(runtime_name)
        .with_executable(executable.display().to_string(), arguments.to_vec())
        .without_script();
    // Only a script file given as the first argument is archived.
    Ok(match arguments.first().map(PathBuf::from).filter(|p| p.is_file()) {
        Some(script) => facts.with_script(script),
        None => facts,
    })
}

fn register_inputs(run: &RunArgs, metadata: &MetadataRegistry, files: &FileRegistry) -> Result<()> {
    if !run.metadata.is_empty() {
        metadata.register(
            run.metadata
                .iter()
                .map(|(key, value)| (MetadataPath::dotted(key), value.clone())),
        )?;
    }
    for spec in &run.register_files {
        files.register(&spec.root, &spec.file, spec.subdir.as_deref())?;
    }
    Ok(())
}

fn run_command(run: RunArgs, config: &Config) -> anyhow::Result<i32> {
    let request = resolve_measures(&run.sources, &run.measures, config)?;
    let metadata = MetadataRegistry::global().clone();
    let files = FileRegistry::global().clone();
    register_inputs(&run, &metadata, &files)?;

    let mut tracking = config
        .apply(TrackingConfig::new(request))
        .with_metadata_registry(metadata)
        .with_file_registry(files)
        .with_runtime(command_runtime(&run.command)?);
    if let Some(interval) = run.poll_interval {
        tracking = tracking.with_poll_interval(interval);
    }
    if let Some(path) = &run.export {
        tracking = tracking.with_export(path);
    }
    if let Some(name) = &run.name {
        tracking = tracking.with_name(name);
    }
    if let Some(description) = &run.description {
        tracking = tracking.with_description(description);
    }
    if run.no_archive {
        tracking = tracking.without_archive();
    }

    let command = run.command.clone();
    let tracked = TrackingSession::run(SystemProvider::new(), tracking, move || spawn_and_wait(&command))?;

    let rendered = format_results(&tracked.results, run.format)?;
    match &run.output {
        Some(path) => write_output(path, &rendered)?,
        None => print!("{}", rendered),
    }
    Ok(tracked.value)
}

fn spawn_and_wait(command: &[String]) -> Result<i32> {
    let Some((program, arguments)) = command.split_first() else {
        return Err(TrackerError::InvalidArgument("no command given".to_string()));
    };
    let mut child = ProcessCommand::new(program).args(arguments).spawn()?;
    tracing::debug!(pid = child.id(), program = %program, "Spawned tracked command");
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(exit_code(status));
        }
        if let Err(e) = abort::sleep(CHILD_POLL) {
            tracing::warn!(pid = child.id(), "Killing tracked command after abort");
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

fn write_output(path: &Path, rendered: &str) -> Result<()> {
    if path.exists() {
        return Err(TrackerError::AlreadyExists(path.to_path_buf()));
    }
    std::fs::write(path, rendered)?;
    Ok(())
}

/// Render results for the terminal or a file.
pub fn format_results(results: &ResultSet, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let mut out = serde_json::to_string_pretty(results)?;
            out.push('\n');
            Ok(out)
        }
        OutputFormat::Simple => {
            let width = results
                .iter()
                .map(|e| e.source().display_name().len())
                .max()
                .unwrap_or(0);
            Ok(results
                .iter()
                .map(|entry| {
                    format!(
                        "{:<width$}  {}\n",
                        entry.source().display_name(),
                        entry.value(),
                        width = width
                    )
                })
                .collect())
        }
    }
}

/// One line per measure: id, group, type and description.
pub fn list_measures() -> String {
    let mut out = String::new();
    for measure in Measure::ALL {
        let info = measure.info();
        out.push_str(&format!(
            "{:<44} {:<8} {:<12} {}\n",
            measure.as_str(),
            measure.group().as_str(),
            info.result_type.as_str(),
            info.description
        ));
    }
    out
}
