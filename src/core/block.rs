use crate::core::merkle::merkle_root;
use crate::core::{Transaction, MAX_TRANSACTIONS_PER_BLOCK};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_ticks, deserialize, serialize, sha256_digest};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

pub const BLOCK_VERSION: u32 = 1;

/// 64 zero characters: "no previous block" on genesis, "no successor" on tips.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    block_number: u64,
    previous_block_hash: String,
    // Forward link of the main chain. Storage bookkeeping, never hashed.
    next_block_hash: String,
    nonce: u64,
    timestamp: i64,
    difficulty: u32,
    merkle_root: String,
    version: u32,
    transactions: Vec<Transaction>,
    block_hash: String,
}

impl Block {
    /// Builds an unsolved candidate on top of `previous` (genesis when `None`).
    ///
    /// Every transaction is stamped with the new block's number. The nonce
    /// starts at zero; the proof-of-work search fills it in.
    pub fn new_candidate(
        previous: Option<&Block>,
        mut transactions: Vec<Transaction>,
        difficulty: u32,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }
        if transactions.len() > MAX_TRANSACTIONS_PER_BLOCK {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block cannot hold more than {MAX_TRANSACTIONS_PER_BLOCK} transactions"
            )));
        }

        let (block_number, previous_block_hash) = match previous {
            Some(previous) => (previous.block_number + 1, previous.block_hash.clone()),
            None => (1, ZERO_HASH.to_string()),
        };
        for tx in transactions.iter_mut() {
            tx.set_block_number(block_number);
        }

        let mut block = Block {
            block_number,
            previous_block_hash,
            next_block_hash: ZERO_HASH.to_string(),
            nonce: 0,
            timestamp: current_ticks()?,
            difficulty,
            merkle_root: merkle_root(&transactions)?,
            version: BLOCK_VERSION,
            transactions,
            block_hash: String::new(),
        };
        block.block_hash = block.compute_hash();
        Ok(block)
    }

    pub fn header_bytes(&self) -> Vec<u8> {
        self.header_bytes_with_nonce(self.nonce)
    }

    pub fn header_bytes_with_nonce(&self, nonce: u64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            self.previous_block_hash.len() + self.merkle_root.len() + 24,
        );
        bytes.extend(self.previous_block_hash.as_bytes());
        bytes.extend(nonce.to_le_bytes());
        bytes.extend(self.timestamp.to_le_bytes());
        bytes.extend(self.difficulty.to_le_bytes());
        bytes.extend(self.merkle_root.as_bytes());
        bytes.extend(self.version.to_le_bytes());
        bytes
    }

    pub fn compute_hash(&self) -> String {
        HEXLOWER.encode(&sha256_digest(&self.header_bytes()))
    }

    pub fn compute_merkle_root(&self) -> Result<String> {
        merkle_root(&self.transactions)
    }

    /// Records a solved nonce and the hash it produced.
    pub fn seal(&mut self, nonce: u64, hash: &[u8]) {
        self.nonce = nonce;
        self.block_hash = HEXLOWER.encode(hash);
    }

    /// Moves the timestamp forward, used when the nonce space is exhausted.
    pub fn refresh_timestamp(&mut self) -> Result<()> {
        self.timestamp = current_ticks()?;
        self.block_hash = self.compute_hash();
        Ok(())
    }

    pub fn is_genesis(&self) -> bool {
        self.block_number == 1
    }

    pub fn get_block_number(&self) -> u64 {
        self.block_number
    }

    pub fn get_hash(&self) -> &str {
        self.block_hash.as_str()
    }

    pub fn get_previous_hash(&self) -> &str {
        self.previous_block_hash.as_str()
    }

    pub fn get_next_hash(&self) -> &str {
        self.next_block_hash.as_str()
    }

    pub fn has_next(&self) -> bool {
        self.next_block_hash != ZERO_HASH
    }

    pub(crate) fn set_next_hash(&mut self, next_block_hash: &str) {
        self.next_block_hash = next_block_hash.to_string();
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_merkle_root(&self) -> &str {
        self.merkle_root.as_str()
    }

    pub fn get_version(&self) -> u32 {
        self.version
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ProofOfWork, SpendableOutput};
    use crate::wallet::Wallet;

    fn genesis(wallet: &Wallet) -> Block {
        let coinbase = Transaction::new_coinbase(wallet, 1).unwrap();
        Block::new_candidate(None, vec![coinbase], 0).unwrap()
    }

    /// A solved block holding a coinbase and `size - 1` payments.
    fn sealed_block(size: usize) -> Block {
        let miner = Wallet::new().unwrap();
        let payee = Wallet::new().unwrap();
        let mut txs = vec![Transaction::new_coinbase(&miner, 1).unwrap()];
        for i in 1..size {
            let spend = SpendableOutput {
                tx_id: format!("{i:064x}"),
                index: 0,
                amount: 40,
                block_number: 1,
            };
            let amount = 5 * i as u64;
            txs.push(Transaction::new_payment(&miner, &payee.get_address(), amount, &[spend]).unwrap());
        }
        let mut block = Block::new_candidate(None, txs, 4).unwrap();
        assert!(ProofOfWork::new(4).run(&mut block, |_| true).unwrap());
        block
    }

    #[test]
    fn test_genesis_candidate() {
        let wallet = Wallet::new().unwrap();
        let block = genesis(&wallet);

        assert!(block.is_genesis());
        assert_eq!(block.get_previous_hash(), ZERO_HASH);
        assert!(!block.has_next());
        assert_eq!(block.get_version(), BLOCK_VERSION);
        assert_eq!(block.get_hash(), block.compute_hash());
        assert_eq!(block.get_merkle_root(), block.compute_merkle_root().unwrap());
    }

    #[test]
    fn test_child_candidate_links_to_parent() {
        let wallet = Wallet::new().unwrap();
        let parent = genesis(&wallet);
        let coinbase = Transaction::new_coinbase(&wallet, 2).unwrap();
        let child = Block::new_candidate(Some(&parent), vec![coinbase], 0).unwrap();

        assert_eq!(child.get_block_number(), 2);
        assert_eq!(child.get_previous_hash(), parent.get_hash());
        assert!(child
            .get_transactions()
            .iter()
            .all(|tx| tx.get_block_number() == 2));
    }

    #[test]
    fn test_hash_excludes_forward_link() {
        let wallet = Wallet::new().unwrap();
        let mut block = genesis(&wallet);
        let hash = block.compute_hash();
        block.set_next_hash(&"f".repeat(64));
        assert_eq!(block.compute_hash(), hash);
    }

    #[test]
    fn test_header_layout() {
        let wallet = Wallet::new().unwrap();
        let block = genesis(&wallet);
        let header = block.header_bytes_with_nonce(7);

        assert_eq!(header.len(), 64 + 8 + 8 + 4 + 64 + 4);
        assert_eq!(&header[..64], ZERO_HASH.as_bytes());
        assert_eq!(&header[64..72], &7u64.to_le_bytes());
        assert_eq!(&header[header.len() - 4..], &BLOCK_VERSION.to_le_bytes());
    }

    #[test]
    fn test_storage_round_trip_keeps_hash() {
        let wallet = Wallet::new().unwrap();
        let block = genesis(&wallet);
        let restored = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(restored, block);
        assert_eq!(restored.compute_hash(), block.get_hash());
    }

    #[test]
    fn test_hash_and_root_survive_storage_and_wire_encoding() {
        for size in 1..=5 {
            let block = sealed_block(size);
            let stored = Block::deserialize(&block.serialize().unwrap()).unwrap();
            let wired: Block = serde_json::from_str(&serde_json::to_string(&block).unwrap()).unwrap();

            for restored in [stored, wired] {
                assert_eq!(restored, block);
                assert_eq!(restored.get_transactions().len(), size);
                assert_eq!(restored.compute_hash(), block.get_hash());
                assert_eq!(restored.compute_merkle_root().unwrap(), block.get_merkle_root());
                assert!(ProofOfWork::validate(&restored));
            }
        }
    }

    #[test]
    fn test_rejects_oversized_and_empty() {
        let wallet = Wallet::new().unwrap();
        assert!(Block::new_candidate(None, vec![], 0).is_err());

        let txs: Vec<Transaction> = (0..=MAX_TRANSACTIONS_PER_BLOCK as u64)
            .map(|n| Transaction::new_coinbase(&wallet, n).unwrap())
            .collect();
        assert!(Block::new_candidate(None, txs, 0).is_err());
    }
}
