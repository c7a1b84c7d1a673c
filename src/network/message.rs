use crate::core::{Block, Transaction};
use crate::error::Result;
use crate::network::Peer;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// "My head is `block_id` at `highest_block_number`; send what follows."
    Sync,
    /// Opens a sync stream; `highest_block_number` is the last block that will be sent.
    SyncResponse,
    BlockRequest,
    ClientRequest,
    ClientShare,
    BlockShare,
    TransactionShare,
}

/// One wire message, sent as a single line of JSON.
///
/// Every field but the type may be absent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Port the sender listens on, so the receiver can reach it back.
    #[serde(default)]
    pub listen_port: u16,
    pub message_type: MessageType,
    #[serde(default)]
    pub highest_block_number: u64,
    #[serde(default)]
    pub block_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<Peer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
}

impl Message {
    fn new(listen_port: u16, message_type: MessageType) -> Message {
        Message {
            listen_port,
            message_type,
            highest_block_number: 0,
            block_id: String::new(),
            peers: vec![],
            block: None,
            transaction: None,
        }
    }

    pub fn sync(listen_port: u16, highest_block_number: u64, head_id: &str) -> Message {
        Message {
            highest_block_number,
            block_id: head_id.to_string(),
            ..Self::new(listen_port, MessageType::Sync)
        }
    }

    pub fn sync_response(listen_port: u16, highest_block_number: u64) -> Message {
        Message {
            highest_block_number,
            ..Self::new(listen_port, MessageType::SyncResponse)
        }
    }

    pub fn block_request(listen_port: u16, block_id: &str) -> Message {
        Message {
            block_id: block_id.to_string(),
            ..Self::new(listen_port, MessageType::BlockRequest)
        }
    }

    pub fn client_request(listen_port: u16) -> Message {
        Self::new(listen_port, MessageType::ClientRequest)
    }

    pub fn client_share(listen_port: u16, peers: Vec<Peer>) -> Message {
        Message {
            peers,
            ..Self::new(listen_port, MessageType::ClientShare)
        }
    }

    pub fn block_share(listen_port: u16, block: Block) -> Message {
        Message {
            highest_block_number: block.get_block_number(),
            block_id: block.get_hash().to_string(),
            block: Some(block),
            ..Self::new(listen_port, MessageType::BlockShare)
        }
    }

    pub fn transaction_share(listen_port: u16, transaction: Transaction) -> Message {
        Message {
            transaction: Some(transaction),
            ..Self::new(listen_port, MessageType::TransactionShare)
        }
    }

    /// JSON encoding terminated by a newline.
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Message> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}
