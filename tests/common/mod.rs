//! Shared test utilities for tirex-tracker
//!
//! - Git repository fixtures
//! - Isolation helpers for process-wide tracker state

pub mod git_fixtures;
pub mod isolation;
