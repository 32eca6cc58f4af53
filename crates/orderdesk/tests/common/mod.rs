//! Shared test utilities for orderdesk integration tests.
//!
//! This module provides:
//! - `TestHarness` with an isolated archive, workspace and in-memory database
//! - `StubConverter`, a conversion service that writes numbered pages

pub mod converter;
pub mod harness;

pub use converter::StubConverter;
pub use harness::TestHarness;
