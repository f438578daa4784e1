//! Git queries used for source facts and code archives

mod repo;
mod status;

pub use repo::GitRepo;
pub use status::{GitDiffStats, WorkingTreeStatus};
