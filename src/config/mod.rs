//! Configuration management
//!
//! Node settings come from an optional TOML file with environment variable
//! overrides. The resulting `Config` is owned by the node context; nothing
//! here is global.

pub mod settings;

pub use settings::{Config, DEFAULT_BOOTSTRAP_PEER, DEFAULT_LISTEN_PORT, MIN_KNOWN_PEERS};
