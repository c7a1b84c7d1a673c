use crate::config::Config;
use crate::core::Blockchain;
use crate::error::Result;
use crate::network::{Peer, Peers};
use crate::storage::{ChainStore, HeldBlocks, MemoryPool};
use crate::wallet::WalletStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop flag shared between a controller and its workers.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> CancellationToken {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Everything a node's threads share: settings, ledger, pool, peers, the
/// held-block buffer, the local identity and the shutdown flag.
pub struct NodeContext {
    pub config: Config,
    pub chain: Blockchain,
    pub pool: Arc<MemoryPool>,
    pub held_blocks: HeldBlocks,
    pub peers: Peers,
    pub wallets: WalletStore,
    pub local: Peer,
    pub shutdown: CancellationToken,
}

impl NodeContext {
    /// Opens the ledger under the configured data directory.
    pub fn open(config: Config) -> Result<Arc<NodeContext>> {
        let store = ChainStore::open(config.store_path())?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: ChainStore) -> Arc<NodeContext> {
        let pool = Arc::new(MemoryPool::new());
        let local = Peer::new(config.advertise_address.clone(), config.listen_port);
        Arc::new(NodeContext {
            chain: Blockchain::new(store, Arc::clone(&pool)),
            pool,
            held_blocks: HeldBlocks::new(config.max_held_blocks),
            peers: Peers::new(),
            wallets: WalletStore::new(config.wallet_path()),
            local,
            shutdown: CancellationToken::new(),
            config,
        })
    }

    pub fn listen_port(&self) -> u16 {
        self.local.port
    }
}
