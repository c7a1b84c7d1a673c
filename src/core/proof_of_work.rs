use crate::core::Block;
use crate::error::Result;
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;

/// Difficulty check by byte mask.
///
/// For difficulty `d` the mask is `ceil(d / 8)` bytes: all zero except the
/// last, which is `0xFF >> (d % 8)`. A hash passes when, scanning from the
/// most significant byte, the first byte that differs from the mask is
/// smaller than it (or no byte differs).
pub struct ProofOfWork {
    mask: Vec<u8>,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> ProofOfWork {
        ProofOfWork {
            mask: difficulty_mask(difficulty),
        }
    }

    pub fn is_satisfied_by(&self, hash: &[u8]) -> bool {
        meets_mask(hash, &self.mask)
    }

    /// Checks the block's stored hash against the difficulty it declares.
    pub fn validate(block: &Block) -> bool {
        match HEXLOWER.decode(block.get_hash().as_bytes()) {
            Ok(hash) => ProofOfWork::new(block.get_difficulty()).is_satisfied_by(&hash),
            Err(_) => false,
        }
    }

    /// Searches nonces from zero until one satisfies the mask.
    ///
    /// `keep_going` is called with the number of hashes tried so far before
    /// each attempt; returning `false` abandons the search. Returns whether
    /// the block was sealed.
    pub fn run<F>(&self, block: &mut Block, mut keep_going: F) -> Result<bool>
    where
        F: FnMut(u64) -> bool,
    {
        let mut attempts = 0u64;
        let mut nonce = 0u64;
        loop {
            if !keep_going(attempts) {
                return Ok(false);
            }
            let hash = sha256_digest(&block.header_bytes_with_nonce(nonce));
            attempts += 1;
            if self.is_satisfied_by(&hash) {
                block.seal(nonce, &hash);
                return Ok(true);
            }
            nonce = match nonce.checked_add(1) {
                Some(next) => next,
                None => {
                    block.refresh_timestamp()?;
                    0
                }
            };
        }
    }
}

pub fn difficulty_mask(difficulty: u32) -> Vec<u8> {
    let len = difficulty.div_ceil(8) as usize;
    let mut mask = vec![0u8; len];
    if let Some(last) = mask.last_mut() {
        *last = 0xFF >> (difficulty % 8);
    }
    mask
}

pub fn meets_mask(hash: &[u8], mask: &[u8]) -> bool {
    for (hash_byte, mask_byte) in hash.iter().zip(mask.iter()) {
        if hash_byte < mask_byte {
            return true;
        }
        if hash_byte > mask_byte {
            return false;
        }
    }
    // A hash shorter than the mask cannot have been produced by SHA-256.
    hash.len() >= mask.len()
}
