//! Integration tests for tirex-tracker
//!
//! These tests verify that multiple components work together correctly.

#[path = "../common/mod.rs"]
pub mod common;

pub mod cli;
pub mod export_flow;
pub mod registry_flow;
pub mod session_flow;
