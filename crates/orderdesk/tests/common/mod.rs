//! Shared test utilities for orderdesk integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated tests against a file-backed database
//! - Builders for seeding orders, folders and files

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
