//! Core blockchain functionality
//!
//! The ledger data model, Merkle commitments, proof-of-work, validation and
//! the chain manager that decides which branch is the main chain.

pub mod block;
pub mod branch;
pub mod blockchain;
pub mod merkle;
pub mod monetary;
pub mod proof_of_work;
pub mod transaction;
pub mod validation;

pub use block::{Block, BLOCK_VERSION, ZERO_HASH};
pub use branch::{Branch, BranchView};
pub use blockchain::{AddBlockOutcome, Blockchain, MainChainIter, MAX_REORG_DEPTH};
pub use merkle::MerkleTree;
pub use monetary::{BLOCK_REWARD, MAX_TRANSACTIONS_PER_BLOCK};
pub use proof_of_work::ProofOfWork;
pub use transaction::{SpendableOutput, Transaction, TxInput, TxOutput, TX_VERSION};
pub use validation::{
    validate_block, validate_transaction, BlockValidation, LedgerView, TxValidation,
};
