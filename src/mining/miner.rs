// The miner runs on its own thread. Each round builds a candidate on the
// current head from a coinbase plus pooled transactions, searches nonces,
// and gives the drained transactions back to the pool whenever the round
// does not end with its block at the head of the main chain.

use crate::core::{
    validate_transaction, AddBlockOutcome, Block, BlockValidation, ProofOfWork, Transaction,
    TxValidation, MAX_TRANSACTIONS_PER_BLOCK,
};
use crate::error::{BlockchainError, Result};
use crate::network::client::broadcast;
use crate::network::Message;
use crate::node::{CancellationToken, NodeContext};
use crate::wallet::Wallet;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Nonces tried between checks for a new main-chain head.
pub const HEAD_CHECK_INTERVAL: u64 = 4096;

const HASH_RATE_INTERVAL: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerState {
    Idle,
    Mining,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinerStatus {
    pub state: MinerState,
    /// Hashes per second over the last window.
    pub hash_rate: f64,
    pub blocks_mined: u64,
}

pub struct Miner {
    context: Arc<NodeContext>,
    state: Arc<RwLock<MinerState>>,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
    status_tx: Sender<MinerStatus>,
    status_rx: Receiver<MinerStatus>,
}

impl Miner {
    pub fn new(context: Arc<NodeContext>) -> Miner {
        let (status_tx, status_rx) = unbounded();
        Miner {
            context,
            state: Arc::new(RwLock::new(MinerState::Idle)),
            stop: CancellationToken::new(),
            handle: None,
            status_tx,
            status_rx,
        }
    }

    pub fn state(&self) -> MinerState {
        self.state
            .read()
            .map(|state| *state)
            .unwrap_or(MinerState::Idle)
    }

    /// Status updates: one per hash-rate window, one per mined block, and
    /// one when the miner goes idle.
    pub fn status_receiver(&self) -> Receiver<MinerStatus> {
        self.status_rx.clone()
    }

    /// Starts mining. Fails if no wallet exists to receive rewards.
    pub fn start(&mut self) -> Result<()> {
        if self.state() == MinerState::Mining {
            return Ok(());
        }
        let wallet = self.context.wallets.require()?;

        self.stop = CancellationToken::new();
        set_state(&self.state, MinerState::Mining);
        info!("Miner started, rewards go to {}", wallet.get_address());

        let round = MiningRound {
            context: Arc::clone(&self.context),
            wallet,
            stop: self.stop.clone(),
            status_tx: self.status_tx.clone(),
        };
        let state = Arc::clone(&self.state);
        let handle = thread::Builder::new()
            .name("miner".to_string())
            .spawn(move || {
                round.run();
                set_state(&state, MinerState::Idle);
                let _ = round.status_tx.send(MinerStatus {
                    state: MinerState::Idle,
                    hash_rate: 0.0,
                    blocks_mined: 0,
                });
            })
            .map_err(|e| BlockchainError::Mining(format!("Failed to spawn miner: {e}")))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Stops mining and waits for the worker to exit.
    pub fn stop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Miner thread panicked");
            }
        }
        set_state(&self.state, MinerState::Idle);
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_state(state: &RwLock<MinerState>, value: MinerState) {
    match state.write() {
        Ok(mut state) => *state = value,
        Err(_) => error!("Failed to acquire write lock on miner state"),
    }
}

struct MiningRound {
    context: Arc<NodeContext>,
    wallet: Wallet,
    stop: CancellationToken,
    status_tx: Sender<MinerStatus>,
}

impl MiningRound {
    fn run(&self) {
        let mut blocks_mined = 0u64;
        while !self.stop.is_cancelled() && !self.context.shutdown.is_cancelled() {
            match self.mine_one(blocks_mined) {
                Ok(Some(block)) => {
                    blocks_mined += 1;
                    info!(
                        "Mined block {} at {} ({blocks_mined} so far)",
                        block.get_hash(),
                        block.get_block_number()
                    );
                    let _ = self.status_tx.send(MinerStatus {
                        state: MinerState::Mining,
                        hash_rate: 0.0,
                        blocks_mined,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Mining round failed: {e}");
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
    }

    /// One candidate from build to commit. `None` when abandoned or beaten.
    ///
    /// Whatever ends the round short of a new head, the still-valid
    /// selection goes back to the pool.
    fn mine_one(&self, blocks_mined: u64) -> Result<Option<Block>> {
        let drained = self.context.pool.take(MAX_TRANSACTIONS_PER_BLOCK - 1);
        let selected = match self.select_transactions(&drained) {
            Ok(selected) => selected,
            Err(e) => {
                self.return_to_pool(drained);
                return Err(e);
            }
        };

        let result = self.seal_and_commit(selected.clone(), blocks_mined);
        if !matches!(result, Ok(Some(_))) {
            self.return_to_pool(selected);
        }
        result
    }

    fn seal_and_commit(&self, selected: Vec<Transaction>, blocks_mined: u64) -> Result<Option<Block>> {
        let chain = &self.context.chain;
        let head = chain.get_head()?;
        let head_id = head.as_ref().map(|b| b.get_hash().to_string());
        let number = head.as_ref().map(|b| b.get_block_number() + 1).unwrap_or(1);

        let mut transactions = vec![Transaction::new_coinbase(&self.wallet, number)?];
        transactions.extend(selected);

        let mut block =
            Block::new_candidate(head.as_ref(), transactions, self.context.config.difficulty)?;
        let pow = ProofOfWork::new(block.get_difficulty());
        let mut window_start = Instant::now();
        let mut window_hashes = 0u64;
        let mut last_attempts = 0u64;

        let sealed = pow.run(&mut block, |attempts| {
            if self.stop.is_cancelled() || self.context.shutdown.is_cancelled() {
                return false;
            }
            window_hashes += attempts - last_attempts;
            last_attempts = attempts;
            let elapsed = window_start.elapsed();
            if elapsed >= HASH_RATE_INTERVAL {
                let _ = self.status_tx.send(MinerStatus {
                    state: MinerState::Mining,
                    hash_rate: window_hashes as f64 / elapsed.as_secs_f64(),
                    blocks_mined,
                });
                window_start = Instant::now();
                window_hashes = 0;
            }
            if attempts > 0 && attempts % HEAD_CHECK_INTERVAL == 0 {
                match chain.get_store().get_head_id() {
                    Ok(current) if current != head_id => {
                        debug!("Head moved during search, rebuilding candidate");
                        return false;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Failed to read head during search: {e}"),
                }
            }
            true
        })?;
        if !sealed {
            return Ok(None);
        }

        match chain.validate_block(&block)? {
            BlockValidation::Valid => {}
            other => {
                warn!("Discarding mined block {}: {other:?}", block.get_hash());
                return Ok(None);
            }
        }
        let outcome = chain.add_block(&block)?;
        if !outcome.is_new_head() {
            debug!("Mined block {} did not become head: {outcome:?}", block.get_hash());
            return Ok(None);
        }
        if let AddBlockOutcome::Reorganized { requeued, .. } = outcome {
            debug!("Mined block reorganized the chain, {requeued} transactions requeued");
        }

        let message = Message::block_share(self.context.listen_port(), block.clone());
        broadcast(&self.context, &message, None);
        Ok(Some(block))
    }

    /// Requeues transactions the main chain has not committed meanwhile.
    fn return_to_pool(&self, transactions: Vec<Transaction>) {
        let store = self.context.chain.get_store();
        let pending: Vec<Transaction> = transactions
            .into_iter()
            .filter(|tx| !matches!(store.get_transaction(tx.get_id()), Ok(Some(_))))
            .collect();
        let requeued = self.context.pool.requeue(pending);
        if requeued > 0 {
            debug!("Returned {requeued} transactions to the pool");
        }
    }

    /// Keeps drained transactions that are still valid against the ledger and
    /// do not spend an output an earlier pick already spends. The rest are
    /// dropped from the pool for good.
    fn select_transactions(&self, drained: &[Transaction]) -> Result<Vec<Transaction>> {
        let mut spent = HashSet::new();
        let mut selected = vec![];
        for tx in drained {
            if let TxValidation::Invalid(reason) = validate_transaction(tx, &self.context.chain)? {
                warn!("Dropping pending transaction {}: {reason}", tx.get_id());
                continue;
            }
            let outpoints: Vec<(&str, i32)> = tx
                .get_inputs()
                .iter()
                .map(|input| (input.get_previous_tx_id(), input.get_previous_output_index()))
                .collect();
            if outpoints.iter().any(|outpoint| spent.contains(outpoint)) {
                warn!("Dropping pending transaction {}: conflicts with another", tx.get_id());
                continue;
            }
            spent.extend(outpoints);
            selected.push(tx.clone());
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ChainStore;
    use crate::testnet::test_config;
    use tempfile::tempdir;

    fn context(dir: &std::path::Path) -> Arc<NodeContext> {
        NodeContext::with_store(test_config(dir, 1), ChainStore::temporary().unwrap())
    }

    #[test]
    fn test_start_without_wallet_fails() {
        let dir = tempdir().unwrap();
        let mut miner = Miner::new(context(dir.path()));
        assert!(matches!(miner.start(), Err(BlockchainError::Wallet(_))));
        assert_eq!(miner.state(), MinerState::Idle);
    }

    #[test]
    fn test_mines_genesis_and_successors() {
        let dir = tempdir().unwrap();
        let context = context(dir.path());
        let wallet = context.wallets.load_or_create().unwrap();
        let mut miner = Miner::new(Arc::clone(&context));
        let status = miner.status_receiver();

        miner.start().unwrap();
        assert_eq!(miner.state(), MinerState::Mining);
        let mut mined = 0;
        while mined < 3 {
            let update = status.recv_timeout(Duration::from_secs(30)).unwrap();
            mined = update.blocks_mined;
        }
        miner.stop();
        assert_eq!(miner.state(), MinerState::Idle);

        let height = context.chain.get_best_height().unwrap();
        assert!(height >= 3);
        let genesis = context.chain.iter().next().unwrap().unwrap();
        assert!(genesis.is_genesis());
        assert_eq!(
            context.chain.get_balance(&wallet.get_address()).unwrap(),
            height * crate::core::BLOCK_REWARD
        );
    }

    #[test]
    fn test_abandoned_round_requeues_only_valid_selection() {
        let dir = tempdir().unwrap();
        let context = context(dir.path());
        let alice = context.wallets.load_or_create().unwrap();
        let bob = Wallet::new().unwrap();
        let genesis = crate::testnet::mine_on(None, &alice).unwrap();
        context.chain.add_block(&genesis).unwrap();

        let (_, spendable) = context
            .chain
            .find_spendable_outputs(&alice.get_address(), 20)
            .unwrap();
        let payment = Transaction::new_payment(&alice, &bob.get_address(), 20, &spendable).unwrap();
        let unknown_output = crate::core::SpendableOutput {
            tx_id: "ab".repeat(32),
            index: 0,
            amount: 50,
            block_number: 1,
        };
        let bogus =
            Transaction::new_payment(&alice, &bob.get_address(), 10, &[unknown_output]).unwrap();
        context.pool.add(payment.clone());
        context.pool.add(bogus.clone());

        let stop = CancellationToken::new();
        stop.cancel();
        let (status_tx, _status_rx) = unbounded();
        let round = MiningRound {
            context: Arc::clone(&context),
            wallet: alice,
            stop,
            status_tx,
        };
        assert!(round.mine_one(0).unwrap().is_none());

        assert!(context.pool.contains(payment.get_id()));
        assert!(!context.pool.contains(bogus.get_id()));
        assert_eq!(context.chain.get_best_height().unwrap(), 1);
    }

    #[test]
    fn test_pending_transaction_is_mined() {
        let dir = tempdir().unwrap();
        let context = context(dir.path());
        let alice = context.wallets.load_or_create().unwrap();
        let bob = Wallet::new().unwrap();

        let genesis = crate::testnet::mine_on(None, &alice).unwrap();
        context.chain.add_block(&genesis).unwrap();
        let (_, spendable) = context
            .chain
            .find_spendable_outputs(&alice.get_address(), 20)
            .unwrap();
        let payment = Transaction::new_payment(&alice, &bob.get_address(), 20, &spendable).unwrap();
        context.pool.add(payment.clone());

        let mut miner = Miner::new(Arc::clone(&context));
        let status = miner.status_receiver();
        miner.start().unwrap();
        loop {
            let update = status.recv_timeout(Duration::from_secs(30)).unwrap();
            if update.blocks_mined >= 1 {
                break;
            }
        }
        miner.stop();

        assert!(context.pool.is_empty());
        assert!(context
            .chain
            .get_store()
            .get_transaction(payment.get_id())
            .unwrap()
            .is_some());
        assert_eq!(context.chain.get_balance(&bob.get_address()).unwrap(), 20);
    }
}
