//! Node lifecycle
//!
//! Wires the listener, peer bootstrap and the optional miner around one
//! shared [`NodeContext`].

pub mod context;

pub use context::{CancellationToken, NodeContext};

use crate::config::MIN_KNOWN_PEERS;
use crate::error::{BlockchainError, Result};
use crate::mining::Miner;
use crate::network::client::send_message;
use crate::network::sync::request_sync;
use crate::network::{Message, Peer, Server};
use log::{error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct Node {
    context: Arc<NodeContext>,
    listener: Option<JoinHandle<()>>,
    miner: Option<Miner>,
}

impl Node {
    /// Binds the listener, contacts known peers, and starts the miner when
    /// the configuration asks for it.
    pub fn start(context: Arc<NodeContext>) -> Result<Node> {
        let server = Server::bind(Arc::clone(&context))?;
        let listener = thread::Builder::new()
            .name("listener".to_string())
            .spawn(move || server.run())
            .map_err(|e| BlockchainError::Network(format!("Failed to spawn listener: {e}")))?;

        let mut node = Node {
            context,
            listener: Some(listener),
            miner: None,
        };
        node.bootstrap();

        if node.context.config.mine {
            let mut miner = Miner::new(Arc::clone(&node.context));
            miner.start()?;
            node.miner = Some(miner);
        }
        Ok(node)
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.context
    }

    pub fn miner(&self) -> Option<&Miner> {
        self.miner.as_ref()
    }

    fn bootstrap(&self) {
        let context = &self.context;
        for addr in &context.config.peers {
            match Peer::parse(addr) {
                Ok(peer) if peer != context.local => {
                    context.peers.add(peer);
                }
                Ok(_) => {}
                Err(e) => warn!("Ignoring configured peer {addr}: {e}"),
            }
        }
        let bootstrap = context.config.bootstrap_peer.as_str();
        if context.peers.len() < MIN_KNOWN_PEERS && !bootstrap.is_empty() {
            match Peer::parse(bootstrap) {
                Ok(peer) if peer != context.local => {
                    context.peers.add(peer);
                }
                Ok(_) => {}
                Err(e) => warn!("Ignoring bootstrap peer {bootstrap}: {e}"),
            }
        }

        let request = Message::client_request(context.listen_port());
        for peer in context.peers.sample(MIN_KNOWN_PEERS) {
            if let Err(e) = send_message(&peer, &context.config, &request) {
                warn!("Peer {} unreachable: {e}", peer.get_addr());
                continue;
            }
            if let Err(e) = request_sync(context, &peer) {
                warn!("Sync request to {} failed: {e}", peer.get_addr());
            }
        }
        info!(
            "Node on port {} started with {} known peers",
            context.listen_port(),
            context.peers.len()
        );
    }

    /// Stops the miner and the listener.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Blocks until the listener exits.
    pub fn wait(mut self) {
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                error!("Listener thread panicked");
            }
        }
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(mut miner) = self.miner.take() {
            miner.stop();
        }
        self.context.shutdown.cancel();
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                error!("Listener thread panicked");
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}
