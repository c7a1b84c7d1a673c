use crate::error::{BlockchainError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_LISTEN_PORT: u16 = 2106;
/// Used only while fewer than `MIN_KNOWN_PEERS` peers are known.
pub const DEFAULT_BOOTSTRAP_PEER: &str = "127.0.0.1:2106";
pub const MIN_KNOWN_PEERS: usize = 3;

const DEFAULT_ADVERTISE_ADDRESS: &str = "127.0.0.1";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_DIFFICULTY: u32 = 16;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_MAX_HELD_BLOCKS: usize = 256;

const NODE_PORT_KEY: &str = "NODE_PORT";
const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const DATA_DIR_KEY: &str = "DATA_DIR";
const BOOTSTRAP_PEER_KEY: &str = "BOOTSTRAP_PEER";
const MINING_DIFFICULTY_KEY: &str = "MINING_DIFFICULTY";

/// Node settings. Every field has a default so a partial TOML file is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port the listener binds and advertises to peers.
    pub listen_port: u16,
    /// Address peers should use to reach this node.
    pub advertise_address: String,
    /// Directory holding the ledger store and the wallet file.
    pub data_dir: PathBuf,
    /// Fallback peer (`host:port`).
    pub bootstrap_peer: String,
    /// Additional peers known at startup (`host:port`).
    pub peers: Vec<String>,
    /// Difficulty declared by blocks this node mines.
    pub difficulty: u32,
    /// Start the miner together with the node.
    pub mine: bool,
    pub read_timeout_secs: u64,
    pub connect_timeout_ms: u64,
    /// Blocks held while their ancestor is requested.
    pub max_held_blocks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_port: DEFAULT_LISTEN_PORT,
            advertise_address: String::from(DEFAULT_ADVERTISE_ADDRESS),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            bootstrap_peer: String::from(DEFAULT_BOOTSTRAP_PEER),
            peers: vec![],
            difficulty: DEFAULT_DIFFICULTY,
            mine: false,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            max_held_blocks: DEFAULT_MAX_HELD_BLOCKS,
        }
    }
}

impl Config {
    /// Load settings from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Config> {
        Ok(toml::from_str(text)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = env::var(NODE_PORT_KEY) {
            self.listen_port = port
                .parse()
                .map_err(|e| BlockchainError::Config(format!("Invalid {NODE_PORT_KEY}: {e}")))?;
        }
        if let Ok(addr) = env::var(NODE_ADDRESS_KEY) {
            self.advertise_address = addr;
        }
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(peer) = env::var(BOOTSTRAP_PEER_KEY) {
            self.bootstrap_peer = peer;
        }
        if let Ok(difficulty) = env::var(MINING_DIFFICULTY_KEY) {
            self.difficulty = difficulty.parse().map_err(|e| {
                BlockchainError::Config(format!("Invalid {MINING_DIFFICULTY_KEY}: {e}"))
            })?;
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join("wallet.dat")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listen_port, 2106);
        assert_eq!(config.bootstrap_peer, DEFAULT_BOOTSTRAP_PEER);
        assert!(!config.mine);
        assert_eq!(config.wallet_path(), PathBuf::from("data").join("wallet.dat"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            listen_port = 3001
            peers = ["10.0.0.2:2106"]
            mine = true
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_port, 3001);
        assert_eq!(config.peers, vec!["10.0.0.2:2106".to_string()]);
        assert!(config.mine);
        assert_eq!(config.difficulty, DEFAULT_DIFFICULTY);
        assert_eq!(config.read_timeout_secs, DEFAULT_READ_TIMEOUT_SECS);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = Config::from_toml_str("listen_port = \"not a number\"");
        assert!(matches!(result, Err(BlockchainError::Config(_))));
    }
}
