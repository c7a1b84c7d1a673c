use crate::config::Config;
use crate::error::{BlockchainError, Result};
use crate::network::{Message, Peer};
use crate::node::NodeContext;
use log::{debug, warn};
use std::io::{BufRead, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Opens a connection to `peer` with the configured connect and read timeouts.
pub fn connect(peer: &Peer, config: &Config) -> Result<TcpStream> {
    let addr = peer.socket_addr()?;
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    let stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| BlockchainError::Network(format!("Failed to connect to {addr}: {e}")))?;
    stream
        .set_read_timeout(Some(Duration::from_secs(config.read_timeout_secs)))
        .map_err(|e| BlockchainError::Network(format!("Failed to set read timeout: {e}")))?;
    stream
        .set_write_timeout(Some(timeout))
        .map_err(|e| BlockchainError::Network(format!("Failed to set write timeout: {e}")))?;
    Ok(stream)
}

pub fn write_message(stream: &TcpStream, message: &Message) -> Result<()> {
    let mut writer = stream;
    writer.write_all(&message.to_line()?)?;
    writer.flush()?;
    Ok(())
}

/// Reads one line. `Ok(None)` at end of stream; a malformed line is a
/// `Serialization` error the caller may skip.
pub fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<Message>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Message::from_line(&line).map(Some)
}

/// Delivers one message on its own connection.
pub fn send_message(peer: &Peer, config: &Config, message: &Message) -> Result<()> {
    debug!("Sending {:?} to {}", message.message_type, peer.get_addr());
    let stream = connect(peer, config)?;
    write_message(&stream, message)?;
    let _ = stream.shutdown(Shutdown::Write);
    Ok(())
}

/// Sends to every known peer except `except`. Failures are logged, not returned.
pub fn broadcast(context: &NodeContext, message: &Message, except: Option<&Peer>) {
    for peer in context.peers.all() {
        if Some(&peer) == except || peer == context.local {
            continue;
        }
        if let Err(e) = send_message(&peer, &context.config, message) {
            warn!("Failed to reach {}: {e}", peer.get_addr());
        }
    }
}

/// Hands a transaction to a running node, as the `send` command does.
pub fn send_transaction(
    node: &Peer,
    config: &Config,
    transaction: crate::core::Transaction,
) -> Result<()> {
    let message = Message::transaction_share(0, transaction);
    send_message(node, config, &message)
}
