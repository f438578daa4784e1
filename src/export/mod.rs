//! Export writer: one merged ir_metadata document per destination.
//!
//! The document is built in layers. Runtime facts form the bottom layer, the
//! provider's native sections are merged over them, and registered metadata is
//! merged last so user supplied values always win. Export refuses to touch a
//! destination that already exists.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::archive::{ArchiveResult, StagedArchive};
use crate::error::{Result, TrackerError};
use crate::measure::ResultSet;
use crate::provider::MeasurementProvider;
use crate::registry::{map_to_yaml, FileRegistration, MetadataValue};
use crate::runtime::RuntimeFacts;

pub const IR_METADATA_TAG: &str = "ir_metadata";

const ENVELOPED_SUFFIXES: &[&str] = &["ir_metadata", "ir-metadata", "irmetadata"];
const PLAIN_SUFFIXES: &[&str] = &[".yml", ".yaml"];
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    #[serde(rename = "ir_metadata", alias = "ir-metadata", alias = "irmetadata")]
    IrMetadata,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::IrMetadata => "ir_metadata",
        }
    }

    /// Guess the format from the destination's file name.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = file_name(path)?;
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        ENVELOPED_SUFFIXES
            .iter()
            .chain(PLAIN_SUFFIXES)
            .any(|suffix| name.ends_with(suffix))
            .then_some(ExportFormat::IrMetadata)
    }
}

impl FromStr for ExportFormat {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ir_metadata" | "ir-metadata" | "irmetadata" => Ok(ExportFormat::IrMetadata),
            other => Err(TrackerError::InvalidArgument(format!(
                "unknown export format '{}'",
                other
            ))),
        }
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// The envelope tag to wrap `path` with, if its name asks for one.
pub fn envelope_tag(path: &Path) -> Option<&'static str> {
    let name = file_name(path)?;
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    ENVELOPED_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
        .then_some(IR_METADATA_TAG)
}

/// Remove a `<tag>.start\n` prefix and a `<tag>.end\n` suffix when present.
pub fn strip_envelope<'a>(bytes: &'a [u8], tag: &str) -> &'a [u8] {
    let start = format!("{}.start\n", tag);
    let end = format!("{}.end\n", tag);
    let bytes = bytes.strip_prefix(start.as_bytes()).unwrap_or(bytes);
    bytes.strip_suffix(end.as_bytes()).unwrap_or(bytes)
}

/// Merge `overlay` into `base`: mappings merge key by key, anything else is replaced.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                let both_mappings =
                    value.is_mapping() && base.get(&key).is_some_and(Value::is_mapping);
                if both_mappings {
                    if let Some(existing) = base.get_mut(&key) {
                        deep_merge(existing, value);
                    }
                } else {
                    base.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Read a document, transparently un-gzipping and stripping the envelope.
pub fn read_document(path: &Path) -> Result<Value> {
    let raw = std::fs::read(path)?;
    let bytes = if raw.starts_with(&GZIP_MAGIC) {
        let mut decoded = Vec::new();
        GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
        decoded
    } else {
        raw
    };
    let body = strip_envelope(&bytes, IR_METADATA_TAG);
    let doc: Value = serde_yaml::from_slice(body)?;
    Ok(match doc {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

/// Write `doc` to `path`, gzip-compressed for `.gz` names and enveloped when
/// the name follows the ir_metadata convention.
pub fn write_document(path: &Path, doc: &Value) -> Result<()> {
    let mut text = serde_yaml::to_string(doc)?;
    if let Some(tag) = envelope_tag(path) {
        text = format!("{tag}.start\n{text}{tag}.end\n");
    }
    let compressed = path.extension().is_some_and(|ext| ext == "gz");
    if compressed {
        let mut encoder = GzEncoder::new(File::create(path)?, Compression::default());
        encoder.write_all(text.as_bytes())?;
        encoder.finish()?.flush()?;
    } else {
        std::fs::write(path, text)?;
    }
    Ok(())
}

/// `<parent>/<dir name>/<export file name>/`: private to one destination.
pub fn metadata_dir(destination: &Path, dir_name: &str) -> PathBuf {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    let name = destination
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("export"));
    parent.join(dir_name).join(name)
}

fn key(k: &str) -> Value {
    Value::String(k.to_string())
}

fn nested(root: &mut Mapping, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        let slot = current
            .entry(key(segment))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if !slot.is_mapping() {
            *slot = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(key(last), value);
}

fn string_seq(items: &[String]) -> Value {
    Value::Sequence(items.iter().cloned().map(Value::String).collect())
}

/// The runtime facts layer (plus optional method name and description).
pub fn runtime_branch(
    runtime: &RuntimeFacts,
    archive: Option<&ArchiveResult>,
    name: Option<&str>,
    description: Option<&str>,
) -> Value {
    let mut doc = Mapping::new();
    if let Some(name) = name {
        nested(&mut doc, &["method", "name"], key(name));
    }
    if let Some(description) = description {
        nested(&mut doc, &["method", "description"], key(description));
    }

    let rt = runtime.runtime_name.as_str();
    nested(&mut doc, &["implementation", "executable", "cmd"], key(&runtime.executable));
    nested(&mut doc, &["implementation", "executable", "args"], string_seq(&runtime.arguments));
    nested(&mut doc, &["implementation", "executable", "version"], key(&runtime.version));
    nested(&mut doc, &["implementation", rt, "packages"], string_seq(&runtime.packages));
    nested(&mut doc, &["implementation", rt, "interactive"], Value::Bool(runtime.interactive));
    if !runtime.interactive {
        if let Some(script) = runtime.script_path() {
            nested(&mut doc, &["implementation", "script", "path"], key(&script.display().to_string()));
        }
    }
    if let Some(notebook) = &runtime.notebook {
        nested(&mut doc, &["implementation", "notebook", "path"], key(&notebook.display().to_string()));
    }
    if let Some(archive) = archive {
        let base = ["implementation", "source", "archive"];
        nested(
            &mut doc,
            &[base[0], base[1], base[2], "path"],
            key(&archive.archive_path.display().to_string()),
        );
        nested(
            &mut doc,
            &[base[0], base[1], base[2], "script path"],
            key(&archive.script_path_in_archive.display().to_string()),
        );
        if let Some(notebook) = &archive.notebook_path_in_archive {
            nested(
                &mut doc,
                &[base[0], base[1], base[2], "notebook path"],
                key(&notebook.display().to_string()),
            );
        }
    }
    Value::Mapping(doc)
}

/// Copy registered files next to `destination`.
pub fn copy_registered_files(destination: &Path, files: &[FileRegistration]) -> Result<Vec<PathBuf>> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    let mut copied = Vec::with_capacity(files.len());
    for registration in files {
        let source = registration.source();
        if !source.is_file() {
            return Err(TrackerError::MissingFile(source));
        }
        let target = parent.join(registration.target());
        if let Some(dir) = target.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::copy(&source, &target)?;
        tracing::debug!(
            source = %source.display(),
            target = %target.display(),
            "Copied registered file"
        );
        copied.push(target);
    }
    Ok(copied)
}

/// Everything besides the results that goes into one export.
#[derive(Debug)]
pub struct ExportJob<'a> {
    pub destination: &'a Path,
    pub format: Option<ExportFormat>,
    pub name: Option<&'a str>,
    pub description: Option<&'a str>,
    pub metadata_dir_name: &'a str,
    pub runtime: &'a RuntimeFacts,
    pub archive: Option<StagedArchive>,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub files: Vec<FileRegistration>,
}

/// What an export produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub archive: Option<ArchiveResult>,
    pub copied_files: Vec<PathBuf>,
}

/// Run the export. Returns `Ok(None)` when no format applies to the destination.
pub fn export<P>(provider: &P, baseline: &ResultSet, results: &ResultSet, job: ExportJob<'_>) -> Result<Option<ExportOutcome>>
where
    P: MeasurementProvider + ?Sized,
{
    let destination = job.destination;
    let Some(format) = job.format.or_else(|| ExportFormat::detect(destination)) else {
        tracing::debug!(path = %destination.display(), "No export format matches, skipping export");
        return Ok(None);
    };
    if destination.exists() {
        return Err(TrackerError::AlreadyExists(destination.to_path_buf()));
    }
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let archive = match job.archive {
        Some(staged) => Some(staged.persist(&metadata_dir(destination, job.metadata_dir_name))?),
        None => None,
    };

    provider.export_native(baseline, results, destination)?;
    let native = read_document(destination)?;

    let mut doc = runtime_branch(job.runtime, archive.as_ref(), job.name, job.description);
    deep_merge(&mut doc, native);
    if !job.metadata.is_empty() {
        deep_merge(&mut doc, map_to_yaml(&job.metadata));
    }

    let copied_files = copy_registered_files(destination, &job.files)?;
    write_document(destination, &doc)?;

    tracing::info!(
        path = %destination.display(),
        format = format.as_str(),
        files = copied_files.len(),
        "Exported tracking metadata"
    );
    Ok(Some(ExportOutcome {
        path: destination.to_path_buf(),
        archive,
        copied_files,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::Measure;
    use crate::provider::{MockConfig, MockProvider};
    use crate::registry::{FileRegistry, MetadataRegistry};
    use tempfile::TempDir;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    fn job<'a>(destination: &'a Path, runtime: &'a RuntimeFacts) -> ExportJob<'a> {
        ExportJob {
            destination,
            format: None,
            name: None,
            description: None,
            metadata_dir_name: ".tirex-tracker",
            runtime,
            archive: None,
            metadata: BTreeMap::new(),
            files: Vec::new(),
        }
    }

    #[test]
    fn test_detect_suffix_aliases() {
        for name in [
            "run.ir_metadata",
            "run.ir-metadata",
            "runirmetadata",
            "m.yml",
            "m.yaml",
            "run.ir_metadata.gz",
            "m.yml.gz",
            "m.yaml.gz",
        ] {
            assert_eq!(ExportFormat::detect(Path::new(name)), Some(ExportFormat::IrMetadata), "{name}");
        }
        assert_eq!(ExportFormat::detect(Path::new("m.json")), None);
        assert_eq!(ExportFormat::detect(Path::new("m.gz")), None);
    }

    #[test]
    fn test_envelope_only_for_ir_metadata_names() {
        assert_eq!(envelope_tag(Path::new("x.ir_metadata.gz")), Some("ir_metadata"));
        assert_eq!(envelope_tag(Path::new("x.irmetadata")), Some("ir_metadata"));
        assert_eq!(envelope_tag(Path::new("x.yml")), None);
    }

    #[test]
    fn test_strip_envelope() {
        let body = b"ir_metadata.start\na: 1\nir_metadata.end\n";
        assert_eq!(strip_envelope(body, "ir_metadata"), b"a: 1\n");
        assert_eq!(strip_envelope(b"a: 1\n", "ir_metadata"), b"a: 1\n");
    }

    #[test]
    fn test_deep_merge_rules() {
        let mut base = yaml("a: {x: 1, y: 2}\nb: keep\nc: {z: 1}\n");
        deep_merge(&mut base, yaml("a: {y: 3, w: 4}\nc: flat\n"));
        assert_eq!(base, yaml("a: {x: 1, y: 3, w: 4}\nb: keep\nc: flat\n"));
    }

    #[test]
    fn test_envelope_round_trip_with_gzip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.ir_metadata.gz");
        let doc = yaml("method: {name: bm25}\nresources: {runtime: {wallclock: 5 ms}}\n");
        write_document(&path, &doc).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(raw.starts_with(&GZIP_MAGIC));
        let mut text = String::new();
        GzDecoder::new(raw.as_slice()).read_to_string(&mut text).unwrap();
        assert!(text.starts_with("ir_metadata.start\n"));
        assert!(text.ends_with("ir_metadata.end\n"));

        let loaded = read_document(&path).unwrap();
        assert_eq!(loaded, doc);
        let again = dir.path().join("again.ir_metadata.gz");
        write_document(&again, &loaded).unwrap();
        assert_eq!(read_document(&again).unwrap(), doc);
    }

    #[test]
    fn test_registered_metadata_wins_over_provider() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("metadata.yml");
        let mut baseline = ResultSet::new();
        baseline.set(Measure::OsKernel, "6.8.0");
        let provider = MockProvider::new(MockConfig::default());

        let registry = MetadataRegistry::new();
        registry
            .register([(["platform", "operating system", "kernel"], "custom")])
            .unwrap();
        let runtime = RuntimeFacts::detect();
        let mut job = job(&destination, &runtime);
        job.metadata = registry.snapshot();
        job.name = Some("bm25");

        export(&provider, &baseline, &ResultSet::new(), job).unwrap().unwrap();
        let doc = read_document(&destination).unwrap();
        assert_eq!(doc["platform"]["operating system"]["kernel"].as_str(), Some("custom"));
        assert_eq!(doc["method"]["name"].as_str(), Some("bm25"));
        assert_eq!(doc["implementation"]["rust"]["interactive"].as_bool(), Some(false));
        assert_eq!(doc["schema version"].as_str(), Some("0.2"));
    }

    #[test]
    fn test_native_output_wins_over_runtime_facts() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("metadata.yml");
        let provider = MockProvider::new(
            MockConfig::default().with_native_text("implementation:\n  executable:\n    version: native\n"),
        );
        let runtime = RuntimeFacts::detect().with_version("facts");
        export(&provider, &ResultSet::new(), &ResultSet::new(), job(&destination, &runtime))
            .unwrap()
            .unwrap();
        let doc = read_document(&destination).unwrap();
        assert_eq!(doc["implementation"]["executable"]["version"].as_str(), Some("native"));
        assert!(doc["implementation"]["executable"]["cmd"].is_string());
    }

    #[test]
    fn test_second_export_is_rejected_and_leaves_file_alone() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("metadata.yml");
        let provider = MockProvider::new(MockConfig::default());
        let runtime = RuntimeFacts::detect();

        export(&provider, &ResultSet::new(), &ResultSet::new(), job(&destination, &runtime)).unwrap();
        let before = std::fs::read(&destination).unwrap();

        let err = export(&provider, &ResultSet::new(), &ResultSet::new(), job(&destination, &runtime)).unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyExists(ref p) if p == &destination));
        assert_eq!(std::fs::read(&destination).unwrap(), before);
    }

    #[test]
    fn test_unknown_format_is_noop() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("metadata.json");
        let provider = MockProvider::new(MockConfig::default());
        let runtime = RuntimeFacts::detect();
        let outcome = export(&provider, &ResultSet::new(), &ResultSet::new(), job(&destination, &runtime)).unwrap();
        assert!(outcome.is_none());
        assert!(!destination.exists());
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_registered_file_lands_in_subdir() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("qrels.txt"), "1 0 d1 1\n").unwrap();
        let files = FileRegistry::new();
        files.register(src.path(), "qrels.txt", Some("subdir")).unwrap();

        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("metadata.yml");
        let provider = MockProvider::new(MockConfig::default());
        let runtime = RuntimeFacts::detect();
        let mut job = job(&destination, &runtime);
        job.files = files.registrations();

        let outcome = export(&provider, &ResultSet::new(), &ResultSet::new(), job).unwrap().unwrap();
        assert_eq!(outcome.copied_files, vec![dir.path().join("subdir/qrels.txt")]);
        let listed: Vec<_> = std::fs::read_dir(dir.path().join("subdir"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(listed, vec![std::ffi::OsString::from("qrels.txt")]);
    }

    #[test]
    fn test_vanished_registered_file_fails_export() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("gone.txt"), "x").unwrap();
        let files = FileRegistry::new();
        files.register(src.path(), "gone.txt", None).unwrap();
        std::fs::remove_file(src.path().join("gone.txt")).unwrap();

        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("metadata.yml");
        let provider = MockProvider::new(MockConfig::default());
        let runtime = RuntimeFacts::detect();
        let mut job = job(&destination, &runtime);
        job.files = files.registrations();
        let err = export(&provider, &ResultSet::new(), &ResultSet::new(), job).unwrap_err();
        assert!(matches!(err, TrackerError::MissingFile(_)));
    }

    #[test]
    fn test_metadata_dir_layout() {
        assert_eq!(
            metadata_dir(Path::new("/out/run.yml"), ".tirex-tracker"),
            PathBuf::from("/out/.tirex-tracker/run.yml")
        );
    }
}
