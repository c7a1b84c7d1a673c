use crate::error::{BlockchainError, Result};
use crate::utils::current_timestamp;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::RwLock;

/// A remote node. Two peers are the same peer when address and port match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub address: String,
    pub port: u16,
    /// Milliseconds since the Unix epoch; 0 when never heard from.
    #[serde(default)]
    pub last_seen: i64,
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl Eq for Peer {}

impl Peer {
    pub fn new(address: impl Into<String>, port: u16) -> Peer {
        Peer {
            address: address.into(),
            port,
            last_seen: 0,
        }
    }

    /// Parses `host:port`.
    pub fn parse(addr: &str) -> Result<Peer> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| BlockchainError::Network(format!("Missing port in {addr}")))?;
        let port = port
            .parse()
            .map_err(|e| BlockchainError::Network(format!("Invalid port in {addr}: {e}")))?;
        if host.is_empty() {
            return Err(BlockchainError::Network(format!("Missing host in {addr}")));
        }
        Ok(Peer::new(host, port))
    }

    pub fn get_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.get_addr()
            .to_socket_addrs()
            .map_err(|e| BlockchainError::Network(format!("Cannot resolve {}: {e}", self.get_addr())))?
            .next()
            .ok_or_else(|| BlockchainError::Network(format!("No address for {}", self.get_addr())))
    }

    pub fn touch(&mut self) {
        self.last_seen = current_timestamp().unwrap_or(self.last_seen);
    }
}

/// Known peers.
pub struct Peers {
    inner: RwLock<Vec<Peer>>,
}

impl Default for Peers {
    fn default() -> Self {
        Self::new()
    }
}

impl Peers {
    pub fn new() -> Peers {
        Peers {
            inner: RwLock::new(vec![]),
        }
    }

    /// Adds the peer or refreshes its last-seen time. Returns `true` if new.
    pub fn add(&self, mut peer: Peer) -> bool {
        peer.touch();
        match self.inner.write() {
            Ok(mut inner) => match inner.iter_mut().find(|known| **known == peer) {
                Some(known) => {
                    known.last_seen = peer.last_seen;
                    false
                }
                None => {
                    inner.push(peer);
                    true
                }
            },
            Err(_) => {
                log::error!("Failed to acquire write lock on peers");
                false
            }
        }
    }

    /// Adds every peer in `peers` except `local`. Returns how many were new.
    pub fn merge(&self, peers: impl IntoIterator<Item = Peer>, local: &Peer) -> usize {
        peers
            .into_iter()
            .filter(|peer| peer != local)
            .filter(|peer| self.add(peer.clone()))
            .count()
    }

    pub fn all(&self) -> Vec<Peer> {
        match self.inner.read() {
            Ok(inner) => inner.clone(),
            Err(_) => {
                log::error!("Failed to acquire read lock on peers");
                vec![]
            }
        }
    }

    /// Up to `count` peers in random order.
    pub fn sample(&self, count: usize) -> Vec<Peer> {
        let mut peers = self.all();
        peers.shuffle(&mut rand::thread_rng());
        peers.truncate(count);
        peers
    }

    pub fn contains(&self, peer: &Peer) -> bool {
        match self.inner.read() {
            Ok(inner) => inner.contains(peer),
            Err(_) => {
                log::error!("Failed to acquire read lock on peers");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on peers");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
