//! Parsers for `git status --porcelain` and `git diff --shortstat`

/// Counts derived from `git status --porcelain`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingTreeStatus {
    /// Tracked files with staged or unstaged modifications
    pub modified: usize,
    /// Files git does not track yet
    pub untracked: usize,
}

impl WorkingTreeStatus {
    pub fn has_uncommitted_changes(&self) -> bool {
        self.modified > 0
    }

    pub fn has_untracked_files(&self) -> bool {
        self.untracked > 0
    }

    pub(crate) fn parse_porcelain(output: &str) -> Self {
        let mut status = WorkingTreeStatus::default();
        for line in output.lines() {
            let Some(code) = line.get(..2) else {
                continue;
            };
            // Added files count as new, like untracked ones.
            if code == "??" || code.contains('A') {
                status.untracked += 1;
            } else if code.trim().is_empty() {
                continue;
            } else {
                status.modified += 1;
            }
        }
        status
    }
}

/// Line statistics of uncommitted changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitDiffStats {
    pub additions: usize,
    pub deletions: usize,
    pub files_changed: usize,
}

impl GitDiffStats {
    pub fn has_changes(&self) -> bool {
        self.additions > 0 || self.deletions > 0
    }

    /// Parse " 3 files changed, 44 insertions(+), 10 deletions(-)".
    pub(crate) fn parse_shortstat(output: &str) -> Self {
        let mut stats = GitDiffStats::default();
        for part in output.trim().split(',') {
            let mut words = part.split_whitespace();
            let (Some(count), Some(kind)) = (words.next(), words.next()) else {
                continue;
            };
            let Ok(count) = count.parse::<usize>() else {
                continue;
            };
            if kind.starts_with("insertion") {
                stats.additions = count;
            } else if kind.starts_with("deletion") {
                stats.deletions = count;
            } else if kind.starts_with("file") {
                stats.files_changed = count;
            }
        }
        stats
    }
}
