//! Read-only access to the working tree enclosing a path

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, TrackerError};

use super::status::{GitDiffStats, WorkingTreeStatus};

/// A git working tree, identified by its top-level directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Find the working tree containing `start` (a file or a directory).
    ///
    /// Returns `None` when `start` is outside any working tree or git is not installed.
    pub fn discover(start: &Path) -> Option<Self> {
        let dir = if start.is_dir() {
            start.to_path_buf()
        } else {
            start.parent()?.to_path_buf()
        };
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir
        };

        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(&dir)
            .output()
            .ok()?;
        if !output.status.success() {
            tracing::debug!(path = %dir.display(), "Not inside a git working tree");
            return None;
        }
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root.is_empty() {
            return None;
        }
        let root = PathBuf::from(root);
        let root = root.canonicalize().unwrap_or(root);
        Some(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run git in the repository root and return trimmed stdout.
    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()?;
        if !output.status.success() {
            return Err(TrackerError::Git(format!(
                "git {}: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Like [`Self::git`] but maps failure and empty output to `None`.
    fn git_opt(&self, args: &[&str]) -> Option<String> {
        match self.git(args) {
            Ok(out) if !out.is_empty() => Some(out),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Git query returned nothing");
                None
            }
        }
    }

    /// Files tracked by the most recent commit, relative to the root.
    pub fn tracked_files(&self) -> Result<Vec<PathBuf>> {
        let out = self.git(&["ls-tree", "-r", "--name-only", "HEAD"])?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    pub fn head_commit(&self) -> Option<String> {
        self.git_opt(&["rev-parse", "HEAD"])
    }

    /// Hash of the tree object HEAD points at
    pub fn tree_hash(&self) -> Option<String> {
        self.git_opt(&["rev-parse", "HEAD^{tree}"])
    }

    pub fn branch(&self) -> Option<String> {
        self.git_opt(&["rev-parse", "--abbrev-ref", "HEAD"])
            .filter(|b| b != "HEAD")
    }

    pub fn upstream(&self) -> Option<String> {
        self.git_opt(&[
            "rev-parse",
            "--abbrev-ref",
            "--symbolic-full-name",
            "@{upstream}",
        ])
    }

    pub fn tags_at_head(&self) -> Vec<String> {
        self.git_opt(&["tag", "--points-at", "HEAD"])
            .map(|out| out.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn remote_url(&self, remote: &str) -> Option<String> {
        self.git_opt(&["remote", "get-url", remote])
    }

    /// Commits on HEAD that the upstream lacks. `None` without an upstream.
    pub fn unpushed_commits(&self) -> Option<usize> {
        self.upstream()?;
        self.git_opt(&["rev-list", "--count", "@{upstream}..HEAD"])
            .and_then(|n| n.parse().ok())
    }

    pub fn status(&self) -> Result<WorkingTreeStatus> {
        let out = self.git(&["status", "--porcelain"])?;
        Ok(WorkingTreeStatus::parse_porcelain(&out))
    }

    pub fn diff_stats(&self) -> GitDiffStats {
        match self.git(&["diff", "--shortstat", "HEAD"]) {
            Ok(out) => GitDiffStats::parse_shortstat(&out),
            Err(_) => self
                .git(&["diff", "--shortstat"])
                .map(|out| GitDiffStats::parse_shortstat(&out))
                .unwrap_or_default(),
        }
    }

    /// `path` relative to the repository root, if it lies inside it.
    pub fn relative(&self, path: &Path) -> Option<PathBuf> {
        let absolute = path.canonicalize().ok()?;
        absolute
            .strip_prefix(&self.root)
            .ok()
            .map(Path::to_path_buf)
    }
}
