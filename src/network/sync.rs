//! Chain synchronization
//!
//! The requester sends `Sync` with its head. The responder opens a fresh
//! connection back, sends `SyncResponse` with the number of the last block
//! it will stream, then streams each main-chain block after the requester's
//! head as a `BlockShare` line, waiting for a one-byte ack after each.

use crate::error::{BlockchainError, Result};
use crate::network::client::{connect, read_message, send_message, write_message};
use crate::network::handlers::process_block;
use crate::network::{Message, Peer};
use crate::node::NodeContext;
use log::{debug, info, warn};
use std::io::{BufRead, Read, Write};
use std::net::TcpStream;

pub const SYNC_ACK: u8 = 0x06;

/// Asks `peer` for every main-chain block after our head.
pub fn request_sync(context: &NodeContext, peer: &Peer) -> Result<()> {
    let head = context.chain.get_head()?;
    let (height, head_id) = match &head {
        Some(block) => (block.get_block_number(), block.get_hash()),
        None => (0, ""),
    };
    let message = Message::sync(context.listen_port(), height, head_id);
    send_message(peer, &context.config, &message)
}

/// Streams our main chain past `requester_head` to `requester`.
///
/// An unknown or side-branch head streams from genesis. Nothing is sent
/// when the requester is at least as high as we are; if it is strictly
/// higher we ask it for its blocks instead.
pub fn serve_sync(
    context: &NodeContext,
    requester: &Peer,
    requester_height: u64,
    requester_head: &str,
) -> Result<()> {
    let local_height = context.chain.get_best_height()?;
    if requester_height >= local_height {
        if requester_height > local_height {
            request_sync(context, requester)?;
        }
        debug!("{} is not behind us, nothing to stream", requester.get_addr());
        return Ok(());
    }

    let from = match context.chain.get_store().get_block(requester_head)? {
        Some(block) if context.chain.is_on_main_chain(&block)? => Some(block),
        _ => None,
    };
    let blocks = context
        .chain
        .main_chain_blocks_after(from.as_ref().map(|b| b.get_hash()))?;
    let target = match blocks.last() {
        Some(last) => last.get_block_number(),
        None => return Ok(()),
    };

    info!(
        "Streaming {} blocks up to {target} to {}",
        blocks.len(),
        requester.get_addr()
    );
    let stream = connect(requester, &context.config)?;
    write_message(&stream, &Message::sync_response(context.listen_port(), target))?;
    for block in blocks {
        write_message(&stream, &Message::block_share(context.listen_port(), block))?;
        await_ack(&stream)?;
    }
    Ok(())
}

fn await_ack(stream: &TcpStream) -> Result<()> {
    let mut ack = [0u8; 1];
    let mut reader = stream;
    reader.read_exact(&mut ack)?;
    if ack[0] != SYNC_ACK {
        return Err(BlockchainError::Network(format!(
            "Unexpected sync ack byte {:#04x}",
            ack[0]
        )));
    }
    Ok(())
}

/// Consumes a sync stream whose `SyncResponse` announced `target`.
///
/// Reads until a block numbered at least `target` has been handled or the
/// stream ends, acknowledging every line. When we already stand at `target`
/// the blocks are acknowledged without being applied.
pub fn receive_sync<R: BufRead>(
    context: &NodeContext,
    reader: &mut R,
    stream: &TcpStream,
    target: u64,
    sender: Option<&Peer>,
) -> Result<()> {
    // Still drained and acked so the responder's stream completes.
    let caught_up = context.chain.get_best_height()? >= target;
    if caught_up {
        debug!("Already at or past sync target {target}, draining stream");
    }

    let mut writer = stream;
    let mut received = 0usize;
    loop {
        let message = match read_message(reader) {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(BlockchainError::Serialization(e)) => {
                warn!("Skipping malformed sync line: {e}");
                writer.write_all(&[SYNC_ACK])?;
                continue;
            }
            Err(e) => return Err(e),
        };

        let mut reached = false;
        if let Some(block) = message.block {
            reached = block.get_block_number() >= target;
            if !caught_up {
                process_block(context, block, sender, false)?;
                received += 1;
            }
        }
        writer.write_all(&[SYNC_ACK])?;
        writer.flush()?;
        if reached {
            break;
        }
    }
    info!(
        "Sync finished after {received} blocks, height {}",
        context.chain.get_best_height()?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ChainStore;
    use crate::testnet::{mine_on, test_config};
    use crate::wallet::Wallet;
    use std::io::BufReader;
    use std::net::TcpListener;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_receive_sync_applies_and_acks() {
        let dir = tempdir().unwrap();
        let context =
            NodeContext::with_store(test_config(dir.path(), 1), ChainStore::temporary().unwrap());
        let miner = Wallet::new().unwrap();
        let genesis = mine_on(None, &miner).unwrap();
        let b2 = mine_on(Some(&genesis), &miner).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let blocks = vec![genesis, b2.clone()];
        let sender = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            write_message(&stream, &Message::sync_response(7, 2)).unwrap();
            for block in blocks {
                write_message(&stream, &Message::block_share(7, block)).unwrap();
                await_ack(&stream).unwrap();
            }
        });

        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(&stream);
        let first = read_message(&mut reader).unwrap().unwrap();
        receive_sync(&context, &mut reader, &stream, first.highest_block_number, None).unwrap();
        sender.join().unwrap();

        assert_eq!(
            context.chain.get_head().unwrap().unwrap().get_hash(),
            b2.get_hash()
        );
    }

    #[test]
    fn test_receive_sync_acks_when_already_at_target() {
        let dir = tempdir().unwrap();
        let context =
            NodeContext::with_store(test_config(dir.path(), 1), ChainStore::temporary().unwrap());
        let miner = Wallet::new().unwrap();
        let genesis = mine_on(None, &miner).unwrap();
        let b2 = mine_on(Some(&genesis), &miner).unwrap();
        context.chain.add_block(&genesis).unwrap();
        context.chain.add_block(&b2).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let blocks = vec![genesis, b2.clone()];
        let sender = thread::spawn(move || -> Result<()> {
            let stream = TcpStream::connect(addr)?;
            write_message(&stream, &Message::sync_response(7, 2))?;
            for block in blocks {
                write_message(&stream, &Message::block_share(7, block))?;
                await_ack(&stream)?;
            }
            Ok(())
        });

        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(&stream);
        let first = read_message(&mut reader).unwrap().unwrap();
        receive_sync(&context, &mut reader, &stream, first.highest_block_number, None).unwrap();

        // Every block was acked, so the responder finished cleanly.
        assert!(sender.join().unwrap().is_ok());
        assert_eq!(context.chain.get_best_height().unwrap(), 2);
        assert_eq!(
            context.chain.get_head().unwrap().unwrap().get_hash(),
            b2.get_hash()
        );
    }
}
