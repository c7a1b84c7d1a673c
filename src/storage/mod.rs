//! Data storage and persistence
//!
//! The sled-backed ledger store, the pool of pending transactions and the
//! buffer of blocks waiting for their parent.

pub mod chain_store;
pub mod memory_pool;

pub use chain_store::{ChainOp, ChainStore};
pub use memory_pool::{HeldBlocks, MemoryPool};
