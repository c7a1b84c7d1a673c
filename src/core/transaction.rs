// Transactions follow the UTXO model: inputs consume earlier outputs by
// (transaction id, output index) and outputs lock value to an address.
// The id is the hash of `canonical_bytes`, which leaves out the stored id,
// the containing block number and the signatures.

use crate::core::{ZERO_HASH, BLOCK_REWARD};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize, sha256_digest};
use crate::wallet::Wallet;
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

pub const TX_VERSION: u32 = 1;
pub const COINBASE_OUTPUT_INDEX: i32 = -1;

/// Message an input's signature covers: block number (u64 LE) followed by the public key.
pub fn unlock_message(block_number: u64, public_key: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(8 + public_key.len());
    message.extend(block_number.to_le_bytes());
    message.extend(public_key);
    message
}

pub fn is_valid_address(address: &str) -> bool {
    address.len() == 64
        && address
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TxInput {
    previous_tx_id: String,
    previous_output_index: i32,
    public_key: Vec<u8>,
    signature: Vec<u8>,
    // Only hashed for coinbase inputs; keeps coinbases of different blocks distinct.
    block_number: u64,
}

impl TxInput {
    pub fn get_previous_tx_id(&self) -> &str {
        self.previous_tx_id.as_str()
    }

    pub fn get_previous_output_index(&self) -> i32 {
        self.previous_output_index
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_block_number(&self) -> u64 {
        self.block_number
    }

    pub fn is_coinbase(&self) -> bool {
        self.previous_tx_id == ZERO_HASH && self.previous_output_index == COINBASE_OUTPUT_INDEX
    }

    fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend(self.previous_tx_id.as_bytes());
        bytes.extend(self.previous_output_index.to_le_bytes());
        bytes.extend(self.public_key.as_slice());
        if self.is_coinbase() {
            bytes.extend(self.block_number.to_le_bytes());
        } else {
            bytes.extend([0u8; 8]);
        }
        bytes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TxOutput {
    amount: u64,
    lock: String,
}

impl TxOutput {
    pub fn new(amount: u64, address: &str) -> Result<TxOutput> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Output amount must be positive".to_string(),
            ));
        }
        if !is_valid_address(address) {
            return Err(BlockchainError::Transaction(format!(
                "Invalid address: {address}"
            )));
        }
        Ok(TxOutput {
            amount,
            lock: address.to_string(),
        })
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }

    pub fn get_lock(&self) -> &str {
        self.lock.as_str()
    }

    pub fn is_locked_with(&self, address: &str) -> bool {
        self.lock == address
    }

    fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend(self.amount.to_le_bytes());
        bytes.extend(self.lock.as_bytes());
        bytes
    }
}

/// An unspent output owned by some address, with what is needed to sign a spend of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableOutput {
    pub tx_id: String,
    pub index: i32,
    pub amount: u64,
    /// Block number of the transaction that created the output.
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: String,
    version: u32,
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
    block_number: u64,
}

impl Transaction {
    /// Block reward paid to `wallet`, signed over (block number || public key).
    pub fn new_coinbase(wallet: &Wallet, block_number: u64) -> Result<Transaction> {
        let public_key = wallet.get_public_key().to_vec();
        let signature = wallet.sign(&unlock_message(block_number, &public_key))?;
        let input = TxInput {
            previous_tx_id: ZERO_HASH.to_string(),
            previous_output_index: COINBASE_OUTPUT_INDEX,
            public_key,
            signature,
            block_number,
        };
        let output = TxOutput::new(BLOCK_REWARD, &wallet.get_address())?;
        Ok(Self::assemble(vec![input], vec![output], block_number))
    }

    /// Spends `spends` (all owned by `wallet`) into `outputs`.
    pub fn new_transfer(
        wallet: &Wallet,
        spends: &[SpendableOutput],
        outputs: Vec<TxOutput>,
    ) -> Result<Transaction> {
        if spends.is_empty() {
            return Err(BlockchainError::Transaction(
                "A transfer needs at least one input".to_string(),
            ));
        }
        if outputs.is_empty() {
            return Err(BlockchainError::Transaction(
                "A transfer needs at least one output".to_string(),
            ));
        }

        let public_key = wallet.get_public_key().to_vec();
        let mut inputs = Vec::with_capacity(spends.len());
        for spend in spends {
            let signature = wallet.sign(&unlock_message(spend.block_number, &public_key))?;
            inputs.push(TxInput {
                previous_tx_id: spend.tx_id.clone(),
                previous_output_index: spend.index,
                public_key: public_key.clone(),
                signature,
                block_number: 0,
            });
        }
        Ok(Self::assemble(inputs, outputs, 0))
    }

    /// Pays `amount` to `to`, returning any change to the wallet's own address.
    pub fn new_payment(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        available: &[SpendableOutput],
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }

        let mut accumulated = 0u64;
        let mut spends = vec![];
        for output in available {
            if accumulated >= amount {
                break;
            }
            accumulated = accumulated.checked_add(output.amount).ok_or_else(|| {
                BlockchainError::Transaction("Input value overflow".to_string())
            })?;
            spends.push(output.clone());
        }
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut outputs = vec![TxOutput::new(amount, to)?];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TxOutput::new(change, &wallet.get_address())?);
        }
        Self::new_transfer(wallet, &spends, outputs)
    }

    fn assemble(inputs: Vec<TxInput>, outputs: Vec<TxOutput>, block_number: u64) -> Transaction {
        let mut tx = Transaction {
            id: String::new(),
            version: TX_VERSION,
            inputs,
            outputs,
            block_number,
        };
        tx.id = tx.compute_id();
        tx
    }

    /// The single source of truth for the bytes a transaction id is hashed from.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend(self.version.to_le_bytes());
        for input in &self.inputs {
            bytes.extend(input.canonical_bytes());
        }
        for output in &self.outputs {
            bytes.extend(output.canonical_bytes());
        }
        bytes
    }

    /// Raw SHA-256 of the canonical encoding; also the Merkle leaf.
    pub fn hash_bytes(&self) -> Vec<u8> {
        sha256_digest(&self.canonical_bytes())
    }

    pub fn compute_id(&self) -> String {
        HEXLOWER.encode(&self.hash_bytes())
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Sum of output amounts, `None` on overflow.
    pub fn output_sum(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |sum, output| sum.checked_add(output.amount))
    }

    pub fn get_id(&self) -> &str {
        self.id.as_str()
    }

    pub fn get_version(&self) -> u32 {
        self.version
    }

    pub fn get_inputs(&self) -> &[TxInput] {
        self.inputs.as_slice()
    }

    pub fn get_outputs(&self) -> &[TxOutput] {
        self.outputs.as_slice()
    }

    pub fn get_block_number(&self) -> u64 {
        self.block_number
    }

    /// Reassigned when a pooled transaction is placed in a candidate block.
    pub fn set_block_number(&mut self, block_number: u64) {
        self.block_number = block_number;
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}
