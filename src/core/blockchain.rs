// The chain manager. Blocks form a tree through their previous-hash links;
// the main chain is the path from genesis to the head, threaded forward
// through each block's next-hash link. All commits go through one lock so the
// store only ever sees whole extensions or whole reorganizations.

use crate::core::branch::{Branch, BranchView};
use crate::core::validation::{validate_block, BlockValidation, LedgerView};
use crate::core::{Block, SpendableOutput, Transaction, ZERO_HASH};
use crate::error::{BlockchainError, Result};
use crate::storage::{ChainOp, ChainStore, MemoryPool};
use crate::wallet::hash_pub_key;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Deepest side branch a reorganization will walk back through.
pub const MAX_REORG_DEPTH: usize = 100;

/// What `add_block` did with a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddBlockOutcome {
    Genesis,
    Extended,
    Reorganized {
        displaced: Vec<String>,
        requeued: usize,
    },
    /// Kept on a side branch; the main chain is unchanged.
    Stored,
    AlreadyKnown,
}

impl AddBlockOutcome {
    pub fn is_new_head(&self) -> bool {
        matches!(
            self,
            AddBlockOutcome::Genesis | AddBlockOutcome::Extended | AddBlockOutcome::Reorganized { .. }
        )
    }
}

pub struct Blockchain {
    store: ChainStore,
    pool: Arc<MemoryPool>,
    commit_lock: Mutex<()>,
}

impl Blockchain {
    pub fn new(store: ChainStore, pool: Arc<MemoryPool>) -> Blockchain {
        Blockchain {
            store,
            pool,
            commit_lock: Mutex::new(()),
        }
    }

    pub fn open(path: impl AsRef<Path>, pool: Arc<MemoryPool>) -> Result<Blockchain> {
        Ok(Self::new(ChainStore::open(path)?, pool))
    }

    pub fn get_store(&self) -> &ChainStore {
        &self.store
    }

    pub fn get_pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    pub fn get_head(&self) -> Result<Option<Block>> {
        match self.store.get_head_id()? {
            Some(id) => self.store.get_block(&id),
            None => Ok(None),
        }
    }

    /// Block number of the head, 0 for an empty ledger.
    pub fn get_best_height(&self) -> Result<u64> {
        Ok(self.get_head()?.map(|b| b.get_block_number()).unwrap_or(0))
    }

    pub fn get_balance(&self, address: &str) -> Result<u64> {
        self.store.get_balance(address)
    }

    pub fn is_on_main_chain(&self, block: &Block) -> Result<bool> {
        if block.is_genesis() {
            return Ok(self.store.get_genesis_id()?.as_deref() == Some(block.get_hash()));
        }
        match self.store.get_block(block.get_previous_hash())? {
            Some(previous) => Ok(previous.get_next_hash() == block.get_hash()),
            None => Ok(false),
        }
    }

    /// Walks the main chain forward from genesis.
    pub fn iter(&self) -> MainChainIter<'_> {
        MainChainIter {
            store: &self.store,
            next_id: None,
            started: false,
            visited: HashSet::new(),
        }
    }

    /// Main-chain blocks after `block_id`, or the whole chain when `None`.
    pub fn main_chain_blocks_after(&self, block_id: Option<&str>) -> Result<Vec<Block>> {
        let mut iter = self.iter();
        if let Some(block_id) = block_id {
            let from = self.store.get_block(block_id)?.ok_or_else(|| {
                BlockchainError::Database(format!("Unknown block {block_id}"))
            })?;
            iter.started = true;
            iter.next_id = from.has_next().then(|| from.get_next_hash().to_string());
        }
        iter.collect()
    }

    /// Unspent outputs locked to `address`, skipping any a pending
    /// transaction already consumes, until `amount` is covered.
    pub fn find_spendable_outputs(
        &self,
        address: &str,
        amount: u64,
    ) -> Result<(u64, Vec<SpendableOutput>)> {
        let mut accumulated = 0u64;
        let mut outputs = vec![];
        for tx in self.store.transactions() {
            let tx = tx?;
            for (index, output) in tx.get_outputs().iter().enumerate() {
                if accumulated >= amount {
                    return Ok((accumulated, outputs));
                }
                let index = index as i32;
                if !output.is_locked_with(address)
                    || self.store.is_output_spent(tx.get_id(), index)?
                    || self.pool.spends_output(tx.get_id(), index)
                {
                    continue;
                }
                accumulated = accumulated.saturating_add(output.get_amount());
                outputs.push(SpendableOutput {
                    tx_id: tx.get_id().to_string(),
                    index,
                    amount: output.get_amount(),
                    block_number: tx.get_block_number(),
                });
            }
        }
        Ok((accumulated, outputs))
    }

    /// Stores a validated block and moves the head if it wins.
    ///
    /// The caller validates first; this only decides where the block goes:
    /// genesis, a direct extension of the head, a reorganization onto the
    /// branch the block extends, or storage on a side branch.
    pub fn add_block(&self, block: &Block) -> Result<AddBlockOutcome> {
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| BlockchainError::Database("Commit lock poisoned".to_string()))?;

        if self.store.contains_block(block.get_hash())? {
            return Ok(AddBlockOutcome::AlreadyKnown);
        }
        // A peer's forward link is its own bookkeeping, not ours.
        let mut block = block.clone();
        block.set_next_hash(ZERO_HASH);

        let head = self.get_head()?;
        let outcome = match head {
            None if block.is_genesis() => {
                let mut ops = vec![
                    ChainOp::PutBlock(block.clone()),
                    ChainOp::SetGenesis(block.get_hash().to_string()),
                    ChainOp::SetHead(block.get_hash().to_string()),
                ];
                ops.extend(ledger_effects(&block, Direction::Apply));
                self.store.apply(&ops)?;
                info!("Genesis block {} committed", block.get_hash());
                AddBlockOutcome::Genesis
            }
            Some(head)
                if block.get_block_number() == head.get_block_number() + 1
                    && block.get_previous_hash() == head.get_hash() =>
            {
                self.ensure_unspent(&block)?;
                let mut ops = vec![
                    ChainOp::PutBlock(block.clone()),
                    ChainOp::Relink {
                        block_id: head.get_hash().to_string(),
                        next_block_hash: block.get_hash().to_string(),
                    },
                    ChainOp::SetHead(block.get_hash().to_string()),
                ];
                ops.extend(ledger_effects(&block, Direction::Apply));
                self.store.apply(&ops)?;
                info!(
                    "Block {} extends the main chain to {}",
                    block.get_hash(),
                    block.get_block_number()
                );
                AddBlockOutcome::Extended
            }
            Some(head) if block.get_block_number() == head.get_block_number() + 1 => {
                match self.reorganize(&head, &block)? {
                    Some(outcome) => outcome,
                    None => self.store_side_block(&block)?,
                }
            }
            _ => self.store_side_block(&block)?,
        };

        if outcome.is_new_head() {
            self.pool
                .remove_all(block.get_transactions().iter().map(Transaction::get_id));
        }
        Ok(outcome)
    }

    fn store_side_block(&self, block: &Block) -> Result<AddBlockOutcome> {
        self.store.apply(&[ChainOp::PutBlock(block.clone())])?;
        debug!(
            "Stored block {} at {} off the main chain",
            block.get_hash(),
            block.get_block_number()
        );
        Ok(AddBlockOutcome::Stored)
    }

    fn ensure_unspent(&self, block: &Block) -> Result<()> {
        for tx in block.get_transactions().iter().filter(|tx| !tx.is_coinbase()) {
            for input in tx.get_inputs() {
                let (prev_id, index) = (input.get_previous_tx_id(), input.get_previous_output_index());
                if self.store.is_output_spent(prev_id, index)? {
                    return Err(BlockchainError::InvalidBlock(format!(
                        "Output {prev_id}:{index} was spent before block {} could commit",
                        block.get_hash()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Walks back from `tip_id` to the first main-chain block.
    ///
    /// `None` when the walk hits a missing block, a foreign genesis, or runs
    /// past `MAX_REORG_DEPTH` side-branch blocks.
    pub fn trace_branch(&self, tip_id: &str) -> Result<Option<Branch>> {
        let mut blocks = vec![];
        let mut cursor = tip_id.to_string();
        let fork_point = loop {
            let block = match self.store.get_block(&cursor)? {
                Some(block) => block,
                None => {
                    warn!("Branch of {tip_id} has a gap at {cursor}");
                    return Ok(None);
                }
            };
            if self.is_on_main_chain(&block)? {
                break block;
            }
            if block.is_genesis() || blocks.len() >= MAX_REORG_DEPTH {
                warn!(
                    "Branch of {tip_id} does not rejoin the main chain within {MAX_REORG_DEPTH} blocks"
                );
                return Ok(None);
            }
            cursor = block.get_previous_hash().to_string();
            blocks.push(block);
        };
        blocks.reverse();
        Ok(Some(Branch { fork_point, blocks }))
    }

    /// Validates `block` against the ledger state of the branch it extends.
    ///
    /// A block on the head, a genesis, or one with an unknown parent is
    /// checked against the main chain. Any other block sees its own branch:
    /// main-chain blocks past the fork point are ignored and the side-branch
    /// blocks up to its parent count as committed.
    pub fn validate_block(&self, block: &Block) -> Result<BlockValidation> {
        let parent = block.get_previous_hash();
        if block.is_genesis()
            || self.store.get_head_id()?.as_deref() == Some(parent)
            || !self.store.contains_block(parent)?
        {
            return validate_block(block, self);
        }
        match self.trace_branch(parent)? {
            Some(branch) => {
                let displaced = self.main_chain_blocks_after(Some(branch.fork_point.get_hash()))?;
                let view = BranchView::new(&self.store, &displaced, &branch.blocks);
                validate_block(block, &view)
            }
            None => validate_block(block, self),
        }
    }

    /// Switches the main chain to the branch ending in `incoming`.
    ///
    /// Returns `None` when the branch cannot be traced back to the main chain
    /// within `MAX_REORG_DEPTH`, in which case the block is only stored.
    fn reorganize(&self, head: &Block, incoming: &Block) -> Result<Option<AddBlockOutcome>> {
        let Branch {
            fork_point,
            blocks: branch,
        } = match self.trace_branch(incoming.get_previous_hash())? {
            Some(branch) => branch,
            None => return Ok(None),
        };
        if branch.is_empty() {
            // The parent is on the main chain but is not the head: not longer.
            return Ok(None);
        }

        let displaced = self.main_chain_blocks_after(Some(fork_point.get_hash()))?;
        let mut ops = vec![];
        for block in &displaced {
            ops.extend(ledger_effects(block, Direction::Revert));
            ops.push(ChainOp::Relink {
                block_id: block.get_hash().to_string(),
                next_block_hash: ZERO_HASH.to_string(),
            });
        }

        let mut previous_id = fork_point.get_hash().to_string();
        for block in &branch {
            ops.push(ChainOp::Relink {
                block_id: previous_id,
                next_block_hash: block.get_hash().to_string(),
            });
            ops.extend(ledger_effects(block, Direction::Apply));
            previous_id = block.get_hash().to_string();
        }
        ops.push(ChainOp::Relink {
            block_id: previous_id,
            next_block_hash: incoming.get_hash().to_string(),
        });
        ops.push(ChainOp::PutBlock(incoming.clone()));
        ops.extend(ledger_effects(incoming, Direction::Apply));
        ops.push(ChainOp::SetHead(incoming.get_hash().to_string()));

        self.store.apply(&ops)?;

        let adopted: HashSet<&str> = branch
            .iter()
            .chain(std::iter::once(incoming))
            .flat_map(|b| b.get_transactions().iter().map(Transaction::get_id))
            .collect();
        self.pool.remove_all(adopted.iter().copied());
        let orphaned = displaced
            .iter()
            .flat_map(|b| b.get_transactions().iter())
            .filter(|tx| !tx.is_coinbase() && !adopted.contains(tx.get_id()))
            .cloned();
        let requeued = self.pool.requeue(orphaned);

        let displaced: Vec<String> = displaced.iter().map(|b| b.get_hash().to_string()).collect();
        info!(
            "Reorganized from {} to {} at {} (fork at {}, {} displaced, {requeued} requeued)",
            head.get_hash(),
            incoming.get_hash(),
            incoming.get_block_number(),
            fork_point.get_block_number(),
            displaced.len()
        );
        Ok(Some(AddBlockOutcome::Reorganized {
            displaced,
            requeued,
        }))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Apply,
    Revert,
}

/// Index, spent-output and balance operations for one block.
///
/// Outputs credit their lock address. Each distinct signer of a regular
/// transaction is debited by the transaction's full output total. Revert
/// emits the inverse of Apply.
fn ledger_effects(block: &Block, direction: Direction) -> Vec<ChainOp> {
    let apply = direction == Direction::Apply;
    let mut ops = vec![];
    for tx in block.get_transactions() {
        ops.push(if apply {
            ChainOp::IndexTransaction(tx.clone())
        } else {
            ChainOp::UnindexTransaction(tx.get_id().to_string())
        });

        for output in tx.get_outputs() {
            let address = output.get_lock().to_string();
            let amount = output.get_amount();
            ops.push(if apply {
                ChainOp::Credit { address, amount }
            } else {
                ChainOp::Debit { address, amount }
            });
        }

        if tx.is_coinbase() {
            continue;
        }

        let total = tx.output_sum().unwrap_or(u64::MAX);
        let mut spenders = HashSet::new();
        for input in tx.get_inputs() {
            let tx_id = input.get_previous_tx_id().to_string();
            let index = input.get_previous_output_index();
            ops.push(if apply {
                ChainOp::MarkSpent {
                    tx_id,
                    index,
                    spender: tx.get_id().to_string(),
                }
            } else {
                ChainOp::UnmarkSpent { tx_id, index }
            });

            let address = hash_pub_key(input.get_public_key());
            if spenders.insert(address.clone()) {
                ops.push(if apply {
                    ChainOp::Debit {
                        address,
                        amount: total,
                    }
                } else {
                    ChainOp::Credit {
                        address,
                        amount: total,
                    }
                });
            }
        }
    }
    ops
}

impl LedgerView for Blockchain {
    fn get_block(&self, block_id: &str) -> Result<Option<Block>> {
        self.store.get_block(block_id)
    }

    fn get_transaction(&self, tx_id: &str) -> Result<Option<Transaction>> {
        self.store.get_transaction(tx_id)
    }

    fn is_output_spent(&self, tx_id: &str, index: i32) -> Result<bool> {
        self.store.is_output_spent(tx_id, index)
    }
}

pub struct MainChainIter<'a> {
    store: &'a ChainStore,
    next_id: Option<String>,
    started: bool,
    visited: HashSet<String>,
}

impl Iterator for MainChainIter<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            match self.store.get_genesis_id() {
                Ok(genesis) => self.next_id = genesis,
                Err(e) => return Some(Err(e)),
            }
        }

        let id = self.next_id.take()?;
        if !self.visited.insert(id.clone()) {
            return Some(Err(BlockchainError::Database(format!(
                "Main chain loops back to {id}"
            ))));
        }
        match self.store.get_block(&id) {
            Ok(Some(block)) => {
                self.next_id = block.has_next().then(|| block.get_next_hash().to_string());
                Some(Ok(block))
            }
            Ok(None) => Some(Err(BlockchainError::Database(format!(
                "Main chain links to missing block {id}"
            )))),
            Err(e) => Some(Err(e)),
        }
    }
}
