//! Peer-to-peer networking
//!
//! Newline-delimited JSON messages over plain TCP: peer discovery, block
//! and transaction gossip, orphan recovery and chain synchronization.

pub mod client;
pub mod handlers;
pub mod message;
pub mod peers;
pub mod server;
pub mod sync;

pub use message::{Message, MessageType};
pub use peers::{Peer, Peers};
pub use server::Server;
