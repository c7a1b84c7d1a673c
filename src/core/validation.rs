//! Block and transaction validation
//!
//! Validation reads the ledger through [`LedgerView`] and never mutates it.
//! Outcomes are closed enums; an `Err` means the ledger itself could not be
//! read, not that the candidate is bad.

use crate::core::transaction::unlock_message;
use crate::core::{
    Block, ProofOfWork, Transaction, BLOCK_REWARD, MAX_TRANSACTIONS_PER_BLOCK, ZERO_HASH,
};
use crate::error::Result;
use crate::wallet::{hash_pub_key, Wallet};
use std::collections::HashSet;

/// Read access to committed ledger state.
pub trait LedgerView {
    /// Any stored block, main chain or side branch.
    fn get_block(&self, block_id: &str) -> Result<Option<Block>>;

    /// A transaction committed on the main chain.
    fn get_transaction(&self, tx_id: &str) -> Result<Option<Transaction>>;

    /// Whether a main-chain transaction already spends the output.
    fn is_output_spent(&self, tx_id: &str, index: i32) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockValidation {
    Valid,
    /// The block is already stored.
    Existing,
    Invalid(String),
    /// The previous block is not known locally yet.
    MissingPrevBlock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxValidation {
    Valid,
    Invalid(String),
}

impl TxValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, TxValidation::Valid)
    }
}

macro_rules! reject_block {
    ($($arg:tt)*) => {
        return Ok(BlockValidation::Invalid(format!($($arg)*)))
    };
}

macro_rules! reject_tx {
    ($($arg:tt)*) => {
        return Ok(TxValidation::Invalid(format!($($arg)*)))
    };
}

pub fn validate_block<L: LedgerView + ?Sized>(block: &Block, ledger: &L) -> Result<BlockValidation> {
    let number = block.get_block_number();

    if ledger.get_block(block.get_hash())?.is_some() {
        return Ok(BlockValidation::Existing);
    }
    if number == 0 {
        reject_block!("block number must start at 1");
    }

    if block.is_genesis() {
        if block.get_previous_hash() != ZERO_HASH {
            reject_block!("genesis block must have the zero previous hash");
        }
    } else {
        let previous = match ledger.get_block(block.get_previous_hash())? {
            Some(previous) => previous,
            None => return Ok(BlockValidation::MissingPrevBlock),
        };
        if previous.get_block_number() + 1 != number {
            reject_block!(
                "block number {number} does not follow previous block number {}",
                previous.get_block_number()
            );
        }
    }

    if block.compute_hash() != block.get_hash() {
        reject_block!("block hash does not match header");
    }
    if !ProofOfWork::validate(block) {
        reject_block!("hash does not meet difficulty {}", block.get_difficulty());
    }

    let transactions = block.get_transactions();
    if transactions.is_empty() {
        reject_block!("block has no transactions");
    }
    if transactions.len() > MAX_TRANSACTIONS_PER_BLOCK {
        reject_block!(
            "block has {} transactions, limit is {MAX_TRANSACTIONS_PER_BLOCK}",
            transactions.len()
        );
    }
    if block.compute_merkle_root()? != block.get_merkle_root() {
        reject_block!("merkle root does not match transactions");
    }

    let coinbase_count = transactions.iter().filter(|tx| tx.is_coinbase()).count();
    if coinbase_count != 1 {
        reject_block!("block must have exactly one coinbase, found {coinbase_count}");
    }

    let mut seen_ids = HashSet::new();
    let mut seen_outpoints = HashSet::new();
    for tx in transactions {
        if tx.get_block_number() != number {
            reject_block!(
                "transaction {} claims block {}, expected {number}",
                tx.get_id(),
                tx.get_block_number()
            );
        }
        if !seen_ids.insert(tx.get_id()) {
            reject_block!("duplicate transaction {}", tx.get_id());
        }
        if !tx.is_coinbase() {
            for input in tx.get_inputs() {
                let outpoint = (input.get_previous_tx_id(), input.get_previous_output_index());
                if !seen_outpoints.insert(outpoint) {
                    reject_block!(
                        "output {}:{} is spent twice in the block",
                        outpoint.0,
                        outpoint.1
                    );
                }
            }
        }
    }

    for tx in transactions {
        if let TxValidation::Invalid(reason) = validate_transaction(tx, ledger)? {
            reject_block!("transaction {}: {reason}", tx.get_id());
        }
    }

    Ok(BlockValidation::Valid)
}

pub fn validate_transaction<L: LedgerView + ?Sized>(
    tx: &Transaction,
    ledger: &L,
) -> Result<TxValidation> {
    if tx.compute_id() != tx.get_id() {
        reject_tx!("id does not match contents");
    }
    if tx.get_inputs().is_empty() || tx.get_outputs().is_empty() {
        reject_tx!("transaction needs inputs and outputs");
    }
    if tx.get_outputs().iter().any(|output| output.get_amount() == 0) {
        reject_tx!("output amounts must be positive");
    }

    if tx.is_coinbase() {
        return Ok(validate_coinbase(tx));
    }

    let mut input_sum = 0u64;
    let mut seen = HashSet::new();
    for input in tx.get_inputs() {
        if input.is_coinbase() {
            reject_tx!("coinbase input inside a regular transaction");
        }
        let prev_id = input.get_previous_tx_id();
        let index = input.get_previous_output_index();
        if !seen.insert((prev_id, index)) {
            reject_tx!("output {prev_id}:{index} is referenced twice");
        }

        let previous = match ledger.get_transaction(prev_id)? {
            Some(previous) => previous,
            None => reject_tx!("unknown previous transaction {prev_id}"),
        };
        let output = match usize::try_from(index)
            .ok()
            .and_then(|i| previous.get_outputs().get(i))
        {
            Some(output) => output,
            None => reject_tx!("output index {index} out of range for {prev_id}"),
        };

        if hash_pub_key(input.get_public_key()) != output.get_lock() {
            reject_tx!("public key does not own {prev_id}:{index}");
        }
        let message = unlock_message(previous.get_block_number(), input.get_public_key());
        if !Wallet::verify(input.get_public_key(), input.get_signature(), &message) {
            reject_tx!("bad signature for {prev_id}:{index}");
        }
        if ledger.is_output_spent(prev_id, index)? {
            reject_tx!("output {prev_id}:{index} is already spent");
        }

        input_sum = match input_sum.checked_add(output.get_amount()) {
            Some(sum) => sum,
            None => reject_tx!("input value overflow"),
        };
    }

    match tx.output_sum() {
        Some(output_sum) if output_sum == input_sum => Ok(TxValidation::Valid),
        Some(output_sum) => reject_tx!("inputs total {input_sum} but outputs total {output_sum}"),
        None => reject_tx!("output value overflow"),
    }
}

fn validate_coinbase(tx: &Transaction) -> TxValidation {
    let input = &tx.get_inputs()[0];
    if tx.get_outputs().len() != 1 {
        return TxValidation::Invalid("coinbase must have exactly one output".to_string());
    }
    let reward = tx.get_outputs()[0].get_amount();
    if reward != BLOCK_REWARD {
        return TxValidation::Invalid(format!(
            "coinbase pays {reward}, reward is {BLOCK_REWARD}"
        ));
    }
    if input.get_block_number() != tx.get_block_number() {
        return TxValidation::Invalid(format!(
            "coinbase is for block {} but sits in block {}",
            input.get_block_number(),
            tx.get_block_number()
        ));
    }
    let message = unlock_message(input.get_block_number(), input.get_public_key());
    if !Wallet::verify(input.get_public_key(), input.get_signature(), &message) {
        return TxValidation::Invalid("bad coinbase signature".to_string());
    }
    TxValidation::Valid
}
