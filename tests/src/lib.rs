//! Shared fixtures, mocks and setup for integration tests.

pub mod containers;
pub mod fixtures;
pub mod mocks;
pub mod setup;
