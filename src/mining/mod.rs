//! Block production
//!
//! A background miner with an idle/mining state, cooperative cancellation
//! and a status channel reporting hash rate and blocks found.

pub mod miner;

pub use miner::{Miner, MinerState, MinerStatus, HEAD_CHECK_INTERVAL};
