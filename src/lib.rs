//! # powchain
//!
//! A proof-of-work blockchain node: a UTXO ledger persisted in sled, a
//! validation engine, a chain manager that reorganizes onto longer
//! branches, a background miner and a line-delimited JSON peer protocol.
//!
//! ## Layout
//! - `core/`: blocks, transactions, Merkle roots, proof-of-work, validation and the chain manager
//! - `storage/`: the sled ledger store, the memory pool and held orphan blocks
//! - `mining/`: the background miner
//! - `network/`: wire messages, peers, the listener, gossip handlers and chain sync
//! - `node/`: shared node context and lifecycle
//! - `wallet/`: the node's ECDSA P-256 identity
//! - `config/`: TOML and environment settings
//! - `utils/`: hashing, signing, clocks and bincode helpers
//! - `cli/`: command-line parsing
//! - `testnet/`: fixtures shared by unit and integration tests

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod mining;
pub mod network;
pub mod node;
pub mod storage;
pub mod testnet;
pub mod utils;
pub mod wallet;

pub use cli::{Command, Opt};
pub use config::Config;
pub use self::core::{
    validate_block, validate_transaction, AddBlockOutcome, Block, BlockValidation, Blockchain,
    LedgerView, ProofOfWork, SpendableOutput, Transaction, TxInput, TxOutput, TxValidation,
};
pub use error::{BlockchainError, Result};
pub use mining::{Miner, MinerState, MinerStatus};
pub use network::{Message, MessageType, Peer, Peers, Server};
pub use node::{CancellationToken, Node, NodeContext};
pub use storage::{ChainOp, ChainStore, HeldBlocks, MemoryPool};
pub use wallet::{hash_pub_key, Wallet, WalletStore};
