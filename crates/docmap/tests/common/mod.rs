//! Shared test utilities for docmap integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a pipeline to scripted service and target fakes
//! - Builders for service messages and configurations

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
