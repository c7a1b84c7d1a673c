use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;

/// Merkle tree over a block's transactions.
///
/// Leaves are the raw transaction hashes ordered by transaction id, so the
/// root does not depend on the order transactions appear in the block. Each
/// level pairs adjacent hashes; an odd last hash is paired with itself.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Vec<u8>>>,
}

impl MerkleTree {
    pub fn new(transactions: &[Transaction]) -> Result<Self> {
        let mut ordered: Vec<&Transaction> = transactions.iter().collect();
        ordered.sort_by(|a, b| a.get_id().cmp(b.get_id()));
        let leaves: Vec<Vec<u8>> = ordered.iter().map(|tx| tx.hash_bytes()).collect();
        Self::from_hashes(&leaves)
    }

    pub fn from_hashes(hashes: &[Vec<u8>]) -> Result<Self> {
        if hashes.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Cannot create Merkle tree from empty transaction list".to_string(),
            ));
        }

        let mut levels = vec![hashes.to_vec()];
        while let Some(level) = levels.last() {
            if level.len() == 1 {
                break;
            }
            let next = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }
        Ok(MerkleTree { levels })
    }

    pub fn get_root_hash(&self) -> &[u8] {
        // from_hashes never builds an empty tree
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get_root_hex(&self) -> String {
        HEXLOWER.encode(self.get_root_hash())
    }
}

fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut combined = Vec::with_capacity(left.len() + right.len());
    combined.extend_from_slice(left);
    combined.extend_from_slice(right);
    sha256_digest(&combined)
}

/// Hex Merkle root of `transactions`.
pub fn merkle_root(transactions: &[Transaction]) -> Result<String> {
    Ok(MerkleTree::new(transactions)?.get_root_hex())
}
