use crate::core::{Block, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Pending transactions, keyed by transaction id.
///
/// Ordered by id so the miner drains a deterministic batch.
pub struct MemoryPool {
    inner: RwLock<BTreeMap<String, Transaction>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns `false` when the transaction was already pending.
    pub fn add(&self, tx: Transaction) -> bool {
        match self.inner.write() {
            Ok(mut pool) => {
                if pool.contains_key(tx.get_id()) {
                    return false;
                }
                pool.insert(tx.get_id().to_string(), tx);
                true
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
                false
            }
        }
    }

    pub fn contains(&self, txid: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.contains_key(txid),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                false
            }
        }
    }

    /// Whether a pending transaction already consumes the output.
    pub fn spends_output(&self, txid: &str, index: i32) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.values().any(|tx| {
                tx.get_inputs().iter().any(|input| {
                    input.get_previous_tx_id() == txid && input.get_previous_output_index() == index
                })
            }),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                false
            }
        }
    }

    pub fn remove_all<'a>(&self, txids: impl IntoIterator<Item = &'a str>) {
        match self.inner.write() {
            Ok(mut pool) => {
                for txid in txids {
                    pool.remove(txid);
                }
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    /// Removes and returns up to `max` transactions in one step.
    pub fn take(&self, max: usize) -> Vec<Transaction> {
        match self.inner.write() {
            Ok(mut pool) => {
                let ids: Vec<String> = pool.keys().take(max).cloned().collect();
                ids.iter().filter_map(|id| pool.remove(id)).collect()
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
                Vec::new()
            }
        }
    }

    /// Puts transactions back, e.g. when a mining attempt is abandoned.
    pub fn requeue(&self, txs: impl IntoIterator<Item = Transaction>) -> usize {
        txs.into_iter().filter(|tx| self.add(tx.clone())).count()
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.is_empty(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                true // Conservative default
            }
        }
    }
}

/// Blocks that arrived before their parent, keyed by the missing parent hash.
pub struct HeldBlocks {
    inner: RwLock<HashMap<String, Vec<Block>>>,
    capacity: usize,
}

impl HeldBlocks {
    pub fn new(capacity: usize) -> HeldBlocks {
        HeldBlocks {
            inner: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Returns `false` if the block was already held or the buffer is full.
    pub fn hold(&self, block: Block) -> bool {
        match self.inner.write() {
            Ok(mut inner) => {
                let held: usize = inner.values().map(Vec::len).sum();
                if held >= self.capacity {
                    log::warn!(
                        "Held block buffer full ({held}), dropping {}",
                        block.get_hash()
                    );
                    return false;
                }
                let siblings = inner
                    .entry(block.get_previous_hash().to_string())
                    .or_default();
                if siblings.iter().any(|b| b.get_hash() == block.get_hash()) {
                    return false;
                }
                siblings.push(block);
                true
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on held blocks");
                false
            }
        }
    }

    /// Removes and returns every held block whose parent is `parent_hash`.
    pub fn take_children(&self, parent_hash: &str) -> Vec<Block> {
        match self.inner.write() {
            Ok(mut inner) => inner.remove(parent_hash).unwrap_or_default(),
            Err(_) => {
                log::error!("Failed to acquire write lock on held blocks");
                Vec::new()
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.values().map(Vec::len).sum(),
            Err(_) => {
                log::error!("Failed to acquire read lock on held blocks");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SpendableOutput;
    use crate::wallet::Wallet;

    fn coinbase(wallet: &Wallet, number: u64) -> Transaction {
        Transaction::new_coinbase(wallet, number).unwrap()
    }

    #[test]
    fn test_add_is_idempotent() {
        let pool = MemoryPool::new();
        let wallet = Wallet::new().unwrap();
        let tx = coinbase(&wallet, 1);

        assert!(pool.add(tx.clone()));
        assert!(!pool.add(tx.clone()));
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(tx.get_id()));
    }

    #[test]
    fn test_take_drains_at_most_max() {
        let pool = MemoryPool::new();
        let wallet = Wallet::new().unwrap();
        for n in 1..=5 {
            pool.add(coinbase(&wallet, n));
        }

        let taken = pool.take(3);
        assert_eq!(taken.len(), 3);
        assert_eq!(pool.len(), 2);
        assert!(taken.iter().all(|tx| !pool.contains(tx.get_id())));

        assert_eq!(pool.requeue(taken), 3);
        assert_eq!(pool.len(), 5);
    }

    #[test]
    fn test_spends_output() {
        let pool = MemoryPool::new();
        let alice = Wallet::new().unwrap();
        let reward = coinbase(&alice, 1);
        let spend = SpendableOutput {
            tx_id: reward.get_id().to_string(),
            index: 0,
            amount: 50,
            block_number: 1,
        };
        let payment =
            Transaction::new_payment(&alice, &alice.get_address(), 50, &[spend]).unwrap();

        pool.add(payment);
        assert!(pool.spends_output(reward.get_id(), 0));
        assert!(!pool.spends_output(reward.get_id(), 1));
    }

    #[test]
    fn test_held_blocks_by_parent() {
        let wallet = Wallet::new().unwrap();
        let parent = Block::new_candidate(None, vec![coinbase(&wallet, 1)], 0).unwrap();
        let child = Block::new_candidate(Some(&parent), vec![coinbase(&wallet, 2)], 0).unwrap();

        let held = HeldBlocks::new(4);
        assert!(held.hold(child.clone()));
        assert!(!held.hold(child.clone()));
        assert_eq!(held.len(), 1);

        assert!(held.take_children("unrelated").is_empty());
        assert_eq!(held.take_children(parent.get_hash()), vec![child]);
        assert!(held.is_empty());
    }

    #[test]
    fn test_held_blocks_capacity() {
        let wallet = Wallet::new().unwrap();
        let parent = Block::new_candidate(None, vec![coinbase(&wallet, 1)], 0).unwrap();
        let first = Block::new_candidate(Some(&parent), vec![coinbase(&wallet, 2)], 0).unwrap();
        let other = Wallet::new().unwrap();
        let second = Block::new_candidate(Some(&parent), vec![coinbase(&other, 2)], 0).unwrap();

        let held = HeldBlocks::new(1);
        assert!(held.hold(first));
        assert!(!held.hold(second));
    }
}
