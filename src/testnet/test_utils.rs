//! Test utilities for chain and node tests

use crate::config::Config;
use crate::core::{Block, Blockchain, Transaction};
use crate::error::Result;
use crate::storage::{ChainStore, MemoryPool};
use crate::wallet::Wallet;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;

/// Blockchain over a throwaway sled store with its own empty pool.
pub fn temp_chain() -> Result<Blockchain> {
    let store = ChainStore::temporary()?;
    Ok(Blockchain::new(store, Arc::new(MemoryPool::new())))
}

/// Difficulty-zero block on top of `previous` holding only a coinbase for `miner`.
pub fn mine_on(previous: Option<&Block>, miner: &Wallet) -> Result<Block> {
    block_with(previous, miner, vec![])
}

pub fn block_with(previous: Option<&Block>, miner: &Wallet, extra: Vec<Transaction>) -> Result<Block> {
    let number = previous.map(|b| b.get_block_number() + 1).unwrap_or(1);
    let mut txs = vec![Transaction::new_coinbase(miner, number)?];
    txs.extend(extra);
    Block::new_candidate(previous, txs, 0)
}

/// Pays `amount` from `payer` using its committed outputs, and mines the
/// payment on `previous` with `payer` as miner.
pub fn payment_block(
    chain: &Blockchain,
    previous: &Block,
    payer: &Wallet,
    to: &str,
    amount: u64,
) -> Result<(Block, Transaction)> {
    let (_, spendable) = chain.find_spendable_outputs(&payer.get_address(), amount)?;
    let payment = Transaction::new_payment(payer, to, amount, &spendable)?;
    let block = block_with(Some(previous), payer, vec![payment.clone()])?;
    Ok((block, payment))
}

pub fn create_test_wallets(count: usize) -> Result<Vec<Wallet>> {
    (0..count).map(|_| Wallet::new()).collect()
}

/// Node configuration rooted in `data_dir`, listening on `port`, with no peers.
pub fn test_config(data_dir: &Path, port: u16) -> Config {
    Config {
        listen_port: port,
        advertise_address: "127.0.0.1".to_string(),
        data_dir: data_dir.to_path_buf(),
        bootstrap_peer: String::new(),
        peers: vec![],
        difficulty: 0,
        mine: false,
        read_timeout_secs: 5,
        connect_timeout_ms: 1000,
        max_held_blocks: 16,
    }
}

/// Asks the OS for a free local port.
pub fn free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
