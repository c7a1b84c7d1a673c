//! Persistent ledger store on sled
//!
//! Every mutation goes through [`ChainStore::apply`], which runs a batch of
//! [`ChainOp`]s as one multi-tree transaction: either the whole batch lands
//! or none of it does.

use crate::core::validation::LedgerView;
use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};
use std::path::Path;

const BLOCKS_TREE: &str = "blocks";
const TRANSACTIONS_TREE: &str = "transactions";
const SPENT_TREE: &str = "spent";
const BALANCES_TREE: &str = "balances";
const META_TREE: &str = "meta";

const HEAD_KEY: &str = "head";
const GENESIS_KEY: &str = "genesis";

/// One step of an atomic ledger update.
#[derive(Debug, Clone)]
pub enum ChainOp {
    PutBlock(Block),
    /// Rewrites a stored block's forward link.
    Relink {
        block_id: String,
        next_block_hash: String,
    },
    SetHead(String),
    SetGenesis(String),
    IndexTransaction(Transaction),
    UnindexTransaction(String),
    MarkSpent {
        tx_id: String,
        index: i32,
        spender: String,
    },
    UnmarkSpent {
        tx_id: String,
        index: i32,
    },
    Credit {
        address: String,
        amount: u64,
    },
    Debit {
        address: String,
        amount: u64,
    },
}

/// sled-backed store of blocks, the main-chain transaction index, spent
/// outputs, per-address balances and the head/genesis pointers.
pub struct ChainStore {
    db: Db,
    blocks: Tree,
    transactions: Tree,
    spent: Tree,
    balances: Tree,
    meta: Tree,
}

fn outpoint_key(tx_id: &str, index: i32) -> String {
    format!("{tx_id}:{index}")
}

fn decode_balance(bytes: Option<sled::IVec>) -> u64 {
    bytes
        .and_then(|b| <[u8; 8]>::try_from(b.as_ref()).ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

fn abort(err: BlockchainError) -> ConflictableTransactionError<BlockchainError> {
    ConflictableTransactionError::Abort(err)
}

impl ChainStore {
    pub fn open(path: impl AsRef<Path>) -> Result<ChainStore> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| {
            BlockchainError::Database(format!("Failed to open ledger at {}: {e}", path.display()))
        })?;
        Self::from_db(db)
    }

    /// A store that lives only as long as the process.
    pub fn temporary() -> Result<ChainStore> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<ChainStore> {
        Ok(ChainStore {
            blocks: db.open_tree(BLOCKS_TREE)?,
            transactions: db.open_tree(TRANSACTIONS_TREE)?,
            spent: db.open_tree(SPENT_TREE)?,
            balances: db.open_tree(BALANCES_TREE)?,
            meta: db.open_tree(META_TREE)?,
            db,
        })
    }

    pub fn get_block(&self, block_id: &str) -> Result<Option<Block>> {
        match self.blocks.get(block_id)? {
            Some(bytes) => Ok(Some(Block::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn contains_block(&self, block_id: &str) -> Result<bool> {
        Ok(self.blocks.contains_key(block_id)?)
    }

    pub fn get_transaction(&self, tx_id: &str) -> Result<Option<Transaction>> {
        match self.transactions.get(tx_id)? {
            Some(bytes) => Ok(Some(Transaction::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Every transaction indexed on the main chain.
    pub fn transactions(&self) -> impl Iterator<Item = Result<Transaction>> + '_ {
        self.transactions.iter().map(|item| {
            let (_, bytes) = item?;
            Transaction::deserialize(bytes.as_ref())
        })
    }

    /// Id of the main-chain transaction spending the output, if any.
    pub fn get_spender(&self, tx_id: &str, index: i32) -> Result<Option<String>> {
        Ok(self
            .spent
            .get(outpoint_key(tx_id, index))?
            .map(|bytes| String::from_utf8_lossy(bytes.as_ref()).into_owned()))
    }

    pub fn is_output_spent(&self, tx_id: &str, index: i32) -> Result<bool> {
        Ok(self.spent.contains_key(outpoint_key(tx_id, index))?)
    }

    pub fn get_balance(&self, address: &str) -> Result<u64> {
        Ok(decode_balance(self.balances.get(address)?))
    }

    pub fn get_head_id(&self) -> Result<Option<String>> {
        self.read_meta(HEAD_KEY)
    }

    pub fn get_genesis_id(&self) -> Result<Option<String>> {
        self.read_meta(GENESIS_KEY)
    }

    fn read_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .meta
            .get(key)?
            .map(|bytes| String::from_utf8_lossy(bytes.as_ref()).into_owned()))
    }

    /// Applies `ops` in order inside one transaction.
    ///
    /// Later operations see the writes of earlier ones, so a batch may put a
    /// block and relink it in the same call.
    pub fn apply(&self, ops: &[ChainOp]) -> Result<()> {
        let result: std::result::Result<(), TransactionError<BlockchainError>> = (
            &self.blocks,
            &self.transactions,
            &self.spent,
            &self.balances,
            &self.meta,
        )
            .transaction(|(blocks, transactions, spent, balances, meta)| {
                for op in ops {
                    apply_op(op, blocks, transactions, spent, balances, meta)?;
                }
                Ok::<(), ConflictableTransactionError<BlockchainError>>(())
            });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(err)) => return Err(err),
            Err(TransactionError::Storage(err)) => return Err(err.into()),
        }
        self.db.flush()?;
        Ok(())
    }
}

fn apply_op(
    op: &ChainOp,
    blocks: &TransactionalTree,
    transactions: &TransactionalTree,
    spent: &TransactionalTree,
    balances: &TransactionalTree,
    meta: &TransactionalTree,
) -> std::result::Result<(), ConflictableTransactionError<BlockchainError>> {
    match op {
        ChainOp::PutBlock(block) => {
            let bytes = block.serialize().map_err(abort)?;
            blocks.insert(block.get_hash(), bytes)?;
        }
        ChainOp::Relink {
            block_id,
            next_block_hash,
        } => {
            let bytes = blocks.get(block_id.as_str())?.ok_or_else(|| {
                abort(BlockchainError::Database(format!(
                    "Cannot relink unknown block {block_id}"
                )))
            })?;
            let mut block = Block::deserialize(bytes.as_ref()).map_err(abort)?;
            block.set_next_hash(next_block_hash);
            blocks.insert(block_id.as_str(), block.serialize().map_err(abort)?)?;
        }
        ChainOp::SetHead(block_id) => {
            meta.insert(HEAD_KEY, block_id.as_bytes())?;
        }
        ChainOp::SetGenesis(block_id) => {
            meta.insert(GENESIS_KEY, block_id.as_bytes())?;
        }
        ChainOp::IndexTransaction(tx) => {
            transactions.insert(tx.get_id(), tx.serialize().map_err(abort)?)?;
        }
        ChainOp::UnindexTransaction(tx_id) => {
            transactions.remove(tx_id.as_str())?;
        }
        ChainOp::MarkSpent {
            tx_id,
            index,
            spender,
        } => {
            spent.insert(outpoint_key(tx_id, *index).as_str(), spender.as_bytes())?;
        }
        ChainOp::UnmarkSpent { tx_id, index } => {
            spent.remove(outpoint_key(tx_id, *index).as_str())?;
        }
        ChainOp::Credit { address, amount } => {
            let current = decode_balance(balances.get(address.as_str())?);
            let updated = current.saturating_add(*amount);
            balances.insert(address.as_str(), updated.to_be_bytes().to_vec())?;
        }
        ChainOp::Debit { address, amount } => {
            let current = decode_balance(balances.get(address.as_str())?);
            let updated = current.saturating_sub(*amount);
            balances.insert(address.as_str(), updated.to_be_bytes().to_vec())?;
        }
    }
    Ok(())
}

impl LedgerView for ChainStore {
    fn get_block(&self, block_id: &str) -> Result<Option<Block>> {
        ChainStore::get_block(self, block_id)
    }

    fn get_transaction(&self, tx_id: &str) -> Result<Option<Transaction>> {
        ChainStore::get_transaction(self, tx_id)
    }

    fn is_output_spent(&self, tx_id: &str, index: i32) -> Result<bool> {
        ChainStore::is_output_spent(self, tx_id, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ZERO_HASH;
    use crate::wallet::Wallet;
    use tempfile::tempdir;

    fn genesis() -> Block {
        let wallet = Wallet::new().unwrap();
        let coinbase = Transaction::new_coinbase(&wallet, 1).unwrap();
        Block::new_candidate(None, vec![coinbase], 0).unwrap()
    }

    #[test]
    fn test_empty_store() {
        let store = ChainStore::temporary().unwrap();
        assert!(store.get_head_id().unwrap().is_none());
        assert!(store.get_genesis_id().unwrap().is_none());
        assert_eq!(store.get_balance("nobody").unwrap(), 0);
        assert!(store.get_block(&"0".repeat(64)).unwrap().is_none());
    }

    #[test]
    fn test_batch_sees_its_own_writes() {
        let store = ChainStore::temporary().unwrap();
        let block = genesis();
        let next = "a".repeat(64);

        store
            .apply(&[
                ChainOp::PutBlock(block.clone()),
                ChainOp::Relink {
                    block_id: block.get_hash().to_string(),
                    next_block_hash: next.clone(),
                },
                ChainOp::SetHead(block.get_hash().to_string()),
                ChainOp::Credit {
                    address: "alice".to_string(),
                    amount: 50,
                },
                ChainOp::Debit {
                    address: "alice".to_string(),
                    amount: 20,
                },
            ])
            .unwrap();

        let stored = store.get_block(block.get_hash()).unwrap().unwrap();
        assert_eq!(stored.get_next_hash(), next);
        assert_eq!(store.get_head_id().unwrap().as_deref(), Some(block.get_hash()));
        assert_eq!(store.get_balance("alice").unwrap(), 30);
    }

    #[test]
    fn test_failed_batch_leaves_no_trace() {
        let store = ChainStore::temporary().unwrap();
        let block = genesis();

        let result = store.apply(&[
            ChainOp::PutBlock(block.clone()),
            ChainOp::SetHead(block.get_hash().to_string()),
            ChainOp::Relink {
                block_id: "missing".to_string(),
                next_block_hash: ZERO_HASH.to_string(),
            },
        ]);

        assert!(matches!(result, Err(BlockchainError::Database(_))));
        assert!(!store.contains_block(block.get_hash()).unwrap());
        assert!(store.get_head_id().unwrap().is_none());
    }

    #[test]
    fn test_spent_index() {
        let store = ChainStore::temporary().unwrap();
        store
            .apply(&[ChainOp::MarkSpent {
                tx_id: "t1".to_string(),
                index: 0,
                spender: "t2".to_string(),
            }])
            .unwrap();
        assert!(store.is_output_spent("t1", 0).unwrap());
        assert!(!store.is_output_spent("t1", 1).unwrap());
        assert_eq!(store.get_spender("t1", 0).unwrap().as_deref(), Some("t2"));

        store
            .apply(&[ChainOp::UnmarkSpent {
                tx_id: "t1".to_string(),
                index: 0,
            }])
            .unwrap();
        assert!(!store.is_output_spent("t1", 0).unwrap());
    }

    #[test]
    fn test_reopen_keeps_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger");
        let block = genesis();
        {
            let store = ChainStore::open(&path).unwrap();
            store
                .apply(&[
                    ChainOp::PutBlock(block.clone()),
                    ChainOp::SetGenesis(block.get_hash().to_string()),
                    ChainOp::IndexTransaction(block.get_transactions()[0].clone()),
                ])
                .unwrap();
        }
        let store = ChainStore::open(&path).unwrap();
        assert_eq!(store.get_genesis_id().unwrap().as_deref(), Some(block.get_hash()));
        let coinbase_id = block.get_transactions()[0].get_id();
        assert!(store.get_transaction(coinbase_id).unwrap().is_some());
        assert_eq!(store.transactions().count(), 1);
    }
}
