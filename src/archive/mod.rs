//! Code archives: a zip snapshot of the code that ran.
//!
//! Strategies, tried in order:
//! 1. an [`InteractiveHost`] materializes its session as a script and a notebook;
//! 2. the git working tree enclosing the script contributes every file tracked
//!    by HEAD plus the script itself, with paths relative to the tree root;
//! 3. otherwise the script alone is archived under its file name.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::write::FileOptions;

use crate::error::{Result, TrackerError};
use crate::git::GitRepo;

pub const ARCHIVE_FILE_NAME: &str = "code-archive.zip";

/// A notebook-like host that can materialize the code it executed.
pub trait InteractiveHost: Send + Sync {
    /// Executed cells as a script: `(file name, contents)`.
    fn script(&self) -> Result<(String, Vec<u8>)>;

    /// The session in notebook format: `(file name, contents)`.
    fn notebook(&self) -> Result<(String, Vec<u8>)>;

    /// Location of the notebook on disk, when the host knows it.
    fn notebook_path(&self) -> Option<PathBuf> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveStrategy {
    Interactive,
    Git,
    ScriptOnly,
}

impl ArchiveStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveStrategy::Interactive => "interactive",
            ArchiveStrategy::Git => "git",
            ArchiveStrategy::ScriptOnly => "script",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveResult {
    pub archive_path: PathBuf,
    pub script_path_in_archive: PathBuf,
    pub notebook_path_in_archive: Option<PathBuf>,
    pub strategy: ArchiveStrategy,
    /// Root of the working tree the archive was built from (git strategy only)
    pub git_root: Option<PathBuf>,
}

enum EntrySource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

struct Entry {
    name: PathBuf,
    source: EntrySource,
}

fn archive_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_zip(out_path: &Path, entries: &[Entry]) -> Result<()> {
    let zip_file = File::create(out_path)?;
    let mut zip = zip::ZipWriter::new(zip_file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in entries {
        zip.start_file(archive_name(&entry.name), options)?;
        match &entry.source {
            EntrySource::File(path) => {
                let mut src = File::open(path)?;
                io::copy(&mut src, &mut zip)?;
            }
            EntrySource::Bytes(bytes) => zip.write_all(bytes)?,
        }
    }

    let mut zip_file = zip.finish()?;
    zip_file.flush()?;
    Ok(())
}

fn file_name_of(path: &Path) -> Result<PathBuf> {
    path.file_name()
        .map(PathBuf::from)
        .ok_or_else(|| TrackerError::InvalidArgument(format!("script path has no file name: {}", path.display())))
}

/// Build the archive for `script` (or `host`) as `<dir>/code-archive.zip`.
pub fn build_archive(
    dir: &Path,
    script: Option<&Path>,
    host: Option<&dyn InteractiveHost>,
) -> Result<ArchiveResult> {
    std::fs::create_dir_all(dir)?;
    let archive_path = dir.join(ARCHIVE_FILE_NAME);

    if let Some(host) = host {
        let (script_name, script_bytes) = host.script()?;
        let (notebook_name, notebook_bytes) = host.notebook()?;
        let entries = [
            Entry {
                name: PathBuf::from(&script_name),
                source: EntrySource::Bytes(script_bytes),
            },
            Entry {
                name: PathBuf::from(&notebook_name),
                source: EntrySource::Bytes(notebook_bytes),
            },
        ];
        write_zip(&archive_path, &entries)?;
        tracing::debug!(path = %archive_path.display(), "Archived interactive session");
        return Ok(ArchiveResult {
            archive_path,
            script_path_in_archive: PathBuf::from(script_name),
            notebook_path_in_archive: Some(PathBuf::from(notebook_name)),
            strategy: ArchiveStrategy::Interactive,
            git_root: None,
        });
    }

    let Some(script) = script else {
        return Err(TrackerError::InvalidArgument(
            "no script or interactive host to archive".to_string(),
        ));
    };
    if !script.is_file() {
        return Err(TrackerError::MissingFile(script.to_path_buf()));
    }

    if let Some(repo) = GitRepo::discover(script) {
        if let Some(script_rel) = repo.relative(script) {
            let mut entries = Vec::new();
            for rel in repo.tracked_files()? {
                let path = repo.root().join(&rel);
                // Deleted in the working tree, or a submodule.
                if !path.is_file() {
                    tracing::debug!(path = %rel.display(), "Skipping tracked path that is not a file");
                    continue;
                }
                entries.push(Entry {
                    name: rel,
                    source: EntrySource::File(path),
                });
            }
            if !entries.iter().any(|e| e.name == script_rel) {
                entries.push(Entry {
                    name: script_rel.clone(),
                    source: EntrySource::File(script.to_path_buf()),
                });
            }
            write_zip(&archive_path, &entries)?;
            tracing::debug!(
                path = %archive_path.display(),
                files = entries.len(),
                root = %repo.root().display(),
                "Archived git working tree"
            );
            return Ok(ArchiveResult {
                archive_path,
                script_path_in_archive: script_rel,
                notebook_path_in_archive: None,
                strategy: ArchiveStrategy::Git,
                git_root: Some(repo.root().to_path_buf()),
            });
        }
    }

    let name = file_name_of(script)?;
    write_zip(
        &archive_path,
        &[Entry {
            name: name.clone(),
            source: EntrySource::File(script.to_path_buf()),
        }],
    )?;
    tracing::debug!(path = %archive_path.display(), "Archived script only");
    Ok(ArchiveResult {
        archive_path,
        script_path_in_archive: name,
        notebook_path_in_archive: None,
        strategy: ArchiveStrategy::ScriptOnly,
        git_root: None,
    })
}

/// An archive built ahead of time in a private temp directory.
///
/// Nothing is visible at the destination until [`StagedArchive::persist`].
#[derive(Debug)]
pub struct StagedArchive {
    _dir: TempDir,
    result: ArchiveResult,
}

impl StagedArchive {
    pub fn build(script: Option<&Path>, host: Option<&dyn InteractiveHost>) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let result = build_archive(dir.path(), script, host)?;
        Ok(Self { _dir: dir, result })
    }

    /// The staged result; `archive_path` points into the temp directory.
    pub fn staged(&self) -> &ArchiveResult {
        &self.result
    }

    /// Move the archive into `dir`, replacing an older archive of the same name.
    pub fn persist(self, dir: &Path) -> Result<ArchiveResult> {
        std::fs::create_dir_all(dir)?;
        let target = dir.join(ARCHIVE_FILE_NAME);
        if std::fs::rename(&self.result.archive_path, &target).is_err() {
            // Different file systems.
            std::fs::copy(&self.result.archive_path, &target)?;
        }
        Ok(ArchiveResult {
            archive_path: target,
            ..self.result.clone()
        })
    }
}

/// Names of the entries in an archive, in archive order.
pub fn archive_entries(path: &Path) -> Result<Vec<String>> {
    let archive = zip::ZipArchive::new(File::open(path)?)?;
    Ok(archive.file_names().map(str::to_string).collect())
}

/// Contents of a single archive entry.
pub fn read_archive_entry(path: &Path, name: &str) -> Result<Vec<u8>> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    let mut entry = archive.by_name(name)?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}
