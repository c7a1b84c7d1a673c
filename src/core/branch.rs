//! Ledger state as seen from the tip of a side branch
//!
//! The store only indexes main-chain transactions and spends. A block that
//! extends a side branch has to be checked against its own history instead:
//! main-chain blocks after the fork point are invisible to it, and the
//! branch's own blocks are committed.

use crate::core::validation::LedgerView;
use crate::core::{Block, Transaction};
use crate::error::Result;
use crate::storage::ChainStore;
use std::collections::{HashMap, HashSet};

/// A side branch traced back to where it leaves the main chain.
#[derive(Debug, Clone)]
pub struct Branch {
    /// Last main-chain block shared with the branch.
    pub fork_point: Block,
    /// Side-branch blocks after the fork point, oldest first.
    pub blocks: Vec<Block>,
}

pub struct BranchView<'a> {
    store: &'a ChainStore,
    // Ids of main-chain transactions committed after the fork point.
    displaced: HashSet<String>,
    transactions: HashMap<String, Transaction>,
    spent: HashSet<(String, i32)>,
}

impl<'a> BranchView<'a> {
    /// `displaced` are the main-chain blocks after the fork point, `branch`
    /// the side-branch blocks the view should treat as committed.
    pub fn new(store: &'a ChainStore, displaced: &[Block], branch: &[Block]) -> BranchView<'a> {
        let displaced = displaced
            .iter()
            .flat_map(|block| block.get_transactions())
            .map(|tx| tx.get_id().to_string())
            .collect();

        let mut transactions = HashMap::new();
        let mut spent = HashSet::new();
        for tx in branch.iter().flat_map(|block| block.get_transactions()) {
            if !tx.is_coinbase() {
                for input in tx.get_inputs() {
                    spent.insert((
                        input.get_previous_tx_id().to_string(),
                        input.get_previous_output_index(),
                    ));
                }
            }
            transactions.insert(tx.get_id().to_string(), tx.clone());
        }

        BranchView {
            store,
            displaced,
            transactions,
            spent,
        }
    }
}

impl LedgerView for BranchView<'_> {
    fn get_block(&self, block_id: &str) -> Result<Option<Block>> {
        self.store.get_block(block_id)
    }

    fn get_transaction(&self, tx_id: &str) -> Result<Option<Transaction>> {
        if let Some(tx) = self.transactions.get(tx_id) {
            return Ok(Some(tx.clone()));
        }
        if self.displaced.contains(tx_id) {
            return Ok(None);
        }
        self.store.get_transaction(tx_id)
    }

    fn is_output_spent(&self, tx_id: &str, index: i32) -> Result<bool> {
        if self.spent.contains(&(tx_id.to_string(), index)) {
            return Ok(true);
        }
        // Spends made by displaced main-chain blocks never happened here.
        match self.store.get_spender(tx_id, index)? {
            Some(spender) => Ok(!self.displaced.contains(&spender)),
            None => Ok(false),
        }
    }
}
