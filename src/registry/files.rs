use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::{Result, TrackerError};

/// A file to copy next to the export: `root/file` lands at `<export dir>/[subdir/]file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRegistration {
    pub root: PathBuf,
    pub file: PathBuf,
    pub subdir: Option<PathBuf>,
}

impl FileRegistration {
    pub fn source(&self) -> PathBuf {
        self.root.join(&self.file)
    }

    /// Where the copy goes, relative to the export's parent directory.
    pub fn target(&self) -> PathBuf {
        match &self.subdir {
            Some(subdir) => subdir.join(&self.file),
            None => self.file.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    inner: Arc<Mutex<Vec<FileRegistration>>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static FileRegistry {
        static GLOBAL: OnceLock<FileRegistry> = OnceLock::new();
        GLOBAL.get_or_init(FileRegistry::new)
    }

    /// Register `root/file`. Both must exist now; a file that disappears later
    /// fails the export instead.
    pub fn register(
        &self,
        root: impl AsRef<Path>,
        file: impl AsRef<Path>,
        subdir: Option<&str>,
    ) -> Result<()> {
        let root = root.as_ref();
        let file = file.as_ref();
        if !root.is_dir() {
            return Err(TrackerError::InvalidArgument(format!(
                "resolve root should point to a directory, got {}",
                root.display()
            )));
        }
        if file.is_absolute() {
            return Err(TrackerError::InvalidArgument(format!(
                "registered file must be relative to its root, got {}",
                file.display()
            )));
        }
        if !root.join(file).is_file() {
            return Err(TrackerError::InvalidArgument(format!(
                "registered file should exist, got {}",
                root.join(file).display()
            )));
        }
        let subdir = subdir
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != ".")
            .map(PathBuf::from);

        tracing::debug!(
            root = %root.display(),
            file = %file.display(),
            "Registered file for export"
        );
        self.inner.lock().push(FileRegistration {
            root: root.to_path_buf(),
            file: file.to_path_buf(),
            subdir,
        });
        Ok(())
    }

    pub fn registrations(&self) -> Vec<FileRegistration> {
        self.inner.lock().clone()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

pub fn register_file(root: impl AsRef<Path>, file: impl AsRef<Path>, subdir: Option<&str>) -> Result<()> {
    FileRegistry::global().register(root, file, subdir)
}

pub fn clear_file_register() {
    FileRegistry::global().clear();
}
