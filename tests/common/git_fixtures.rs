//! Throwaway git repositories for git facts and code archive tests

use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// A scratch repository with one commit holding `README.md`.
///
/// The directory is removed when the fixture is dropped.
pub struct TestRepo {
    _dir: TempDir,
    /// Canonical repository root, so it compares equal to `git rev-parse` output
    pub path: PathBuf,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().canonicalize().expect("canonical temp dir");
        let repo = Self { _dir: dir, path };

        repo.run(&["init", "--quiet"]);
        repo.run(&["config", "user.email", "tracker@example.com"]);
        repo.run(&["config", "user.name", "Tracker Tests"]);
        // Global signing setups would otherwise break commits.
        repo.run(&["config", "commit.gpgsign", "false"]);
        repo.commit_file("README.md", "# scratch\n", "Initial commit");
        repo
    }

    /// Write `relative` (creating parent directories) and commit it.
    pub fn commit_file(&self, relative: &str, content: &str, message: &str) {
        self.create_file(relative, content);
        self.run(&["add", relative]);
        self.run(&["commit", "--quiet", "-m", message]);
    }

    /// Write `relative` into the working tree without staging it.
    pub fn create_file(&self, relative: &str, content: &str) -> PathBuf {
        let target = self.path.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&target, content).unwrap();
        target
    }

    /// Remove a committed file from the working tree only.
    pub fn delete_file(&self, relative: &str) {
        std::fs::remove_file(self.path.join(relative)).unwrap();
    }

    pub fn head_sha(&self) -> String {
        self.run(&["rev-parse", "HEAD"]).trim().to_string()
    }

    /// Run git in the repository and return stdout, panicking on failure.
    pub fn run(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .output()
            .unwrap_or_else(|e| panic!("failed to spawn git: {}", e));
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_repo_has_initial_commit() {
        let repo = TestRepo::new();
        assert!(repo.path.join(".git").is_dir());
        assert_eq!(repo.head_sha().len(), 40);
        assert_eq!(repo.run(&["ls-files"]).trim(), "README.md");
    }

    #[test]
    fn test_deleted_file_stays_tracked() {
        let repo = TestRepo::new();
        repo.commit_file("src/lib.py", "x = 1\n", "Add lib");
        repo.delete_file("src/lib.py");
        let tracked = repo.run(&["ls-tree", "-r", "--name-only", "HEAD"]);
        assert!(tracked.lines().any(|l| l == "src/lib.py"));
        assert!(!repo.path.join("src/lib.py").exists());
    }
}
