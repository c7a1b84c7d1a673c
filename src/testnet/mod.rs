//! Shared fixtures for unit and integration tests: throwaway ledgers,
//! instant blocks and loopback node configuration.

pub mod test_utils;

pub use test_utils::*;
