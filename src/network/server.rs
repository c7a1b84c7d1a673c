use crate::error::{BlockchainError, Result};
use crate::network::client::read_message;
use crate::network::handlers::{
    handle_block_request, handle_client_request, handle_client_share, process_block,
    process_transaction,
};
use crate::network::sync::{receive_sync, serve_sync};
use crate::network::{Message, MessageType, Peer};
use crate::node::NodeContext;
use log::{debug, error, info, warn};
use std::io::{BufReader, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Accepts peer connections and serves each on its own thread until the
/// node's shutdown token is cancelled.
pub struct Server {
    context: Arc<NodeContext>,
    listener: TcpListener,
}

impl Server {
    pub fn bind(context: Arc<NodeContext>) -> Result<Server> {
        let addr = format!("0.0.0.0:{}", context.config.listen_port);
        let listener = TcpListener::bind(&addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| BlockchainError::Network(format!("Failed to configure listener: {e}")))?;
        info!("Server listening on {addr}");
        Ok(Server { context, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn run(self) {
        while !self.context.shutdown.is_cancelled() {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let context = Arc::clone(&self.context);
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(&context, stream, peer_addr) {
                            error!("Error handling connection from {peer_addr}: {e}");
                        }
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
        info!("Server on port {} stopped", self.context.listen_port());
    }
}

fn handle_connection(context: &NodeContext, stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(context.config.read_timeout_secs)))?;

    let mut reader = BufReader::new(&stream);
    loop {
        let message = match read_message(&mut reader) {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(BlockchainError::Serialization(e)) => {
                warn!("Ignoring malformed message from {peer_addr}: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };
        debug!("Received {:?} from {peer_addr}", message.message_type);

        // Replies go to the sender's listener, not this connection.
        let sender = (message.listen_port != 0)
            .then(|| Peer::new(peer_addr.ip().to_string(), message.listen_port));

        if message.message_type == MessageType::SyncResponse {
            receive_sync(
                context,
                &mut reader,
                &stream,
                message.highest_block_number,
                sender.as_ref(),
            )?;
            break;
        }
        if let Err(e) = dispatch(context, message, sender.as_ref()) {
            error!("Error processing message from {peer_addr}: {e}");
        }
    }

    let _ = stream.shutdown(Shutdown::Both);
    Ok(())
}

fn dispatch(context: &NodeContext, message: Message, sender: Option<&Peer>) -> Result<()> {
    match message.message_type {
        MessageType::Sync => match sender {
            Some(sender) => serve_sync(
                context,
                sender,
                message.highest_block_number,
                &message.block_id,
            ),
            None => Ok(()),
        },
        MessageType::BlockRequest => match sender {
            Some(sender) => handle_block_request(context, &message.block_id, sender),
            None => Ok(()),
        },
        MessageType::ClientRequest => match sender {
            Some(sender) => handle_client_request(context, sender),
            None => Ok(()),
        },
        MessageType::ClientShare => {
            handle_client_share(context, message.peers);
            Ok(())
        }
        MessageType::BlockShare => match message.block {
            Some(block) => process_block(context, block, sender, true).map(|_| ()),
            None => Ok(()),
        },
        MessageType::TransactionShare => match message.transaction {
            Some(tx) => process_transaction(context, tx, sender).map(|_| ()),
            None => Ok(()),
        },
        // Only meaningful as the first line of a sync stream.
        MessageType::SyncResponse => Ok(()),
    }
}
