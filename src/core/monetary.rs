//! Monetary and block-size constants shared by the miner and the validator.

/// Amount a coinbase transaction must pay, exactly.
pub const BLOCK_REWARD: u64 = 50;

/// Upper bound on transactions per block, coinbase included.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 32;
