// Handlers for block, transaction and peer messages. Sync streams live in
// `sync.rs`; the listener and dispatch live in `server.rs`.

use crate::core::{validate_transaction, Block, BlockValidation, Transaction, TxValidation};
use crate::error::Result;
use crate::network::client::{broadcast, send_message};
use crate::network::{Message, Peer};
use crate::node::NodeContext;
use log::{debug, info, warn};

/// Validates and commits a block received from the network.
///
/// Accepted blocks are relayed to every peer but the sender when `relay` is
/// set. A block whose parent is unknown is held and its parent requested;
/// once a block is accepted any held children are retried.
pub fn process_block(
    context: &NodeContext,
    block: Block,
    sender: Option<&Peer>,
    relay: bool,
) -> Result<BlockValidation> {
    let validation = context.chain.validate_block(&block)?;
    match &validation {
        BlockValidation::Valid => {
            let outcome = context.chain.add_block(&block)?;
            info!(
                "Accepted block {} at {}: {outcome:?}",
                block.get_hash(),
                block.get_block_number()
            );
            if relay {
                let message = Message::block_share(context.listen_port(), block.clone());
                broadcast(context, &message, sender);
            }
            adopt_held_children(context, block.get_hash())?;
        }
        BlockValidation::Existing => {
            debug!("Block {} already known", block.get_hash());
        }
        BlockValidation::MissingPrevBlock => {
            let parent = block.get_previous_hash().to_string();
            info!(
                "Holding block {} until parent {parent} arrives",
                block.get_hash()
            );
            if context.held_blocks.hold(block) {
                let request = Message::block_request(context.listen_port(), &parent);
                broadcast(context, &request, None);
            }
        }
        BlockValidation::Invalid(reason) => {
            warn!("Rejected block {}: {reason}", block.get_hash());
        }
    }
    Ok(validation)
}

fn adopt_held_children(context: &NodeContext, parent_hash: &str) -> Result<()> {
    let mut parents = vec![parent_hash.to_string()];
    while let Some(parent) = parents.pop() {
        for child in context.held_blocks.take_children(&parent) {
            match context.chain.validate_block(&child)? {
                BlockValidation::Valid => {
                    let outcome = context.chain.add_block(&child)?;
                    info!("Adopted held block {}: {outcome:?}", child.get_hash());
                    parents.push(child.get_hash().to_string());
                }
                BlockValidation::MissingPrevBlock => {
                    context.held_blocks.hold(child);
                }
                BlockValidation::Existing => {}
                BlockValidation::Invalid(reason) => {
                    warn!("Dropped held block {}: {reason}", child.get_hash());
                }
            }
        }
    }
    Ok(())
}

/// Validates a shared transaction and pools and relays it if new.
pub fn process_transaction(
    context: &NodeContext,
    transaction: Transaction,
    sender: Option<&Peer>,
) -> Result<TxValidation> {
    let tx_id = transaction.get_id().to_string();
    if transaction.is_coinbase() {
        warn!("Rejected transaction {tx_id}: coinbase outside a block");
        return Ok(TxValidation::Invalid(
            "coinbase transactions are only valid inside blocks".to_string(),
        ));
    }
    if context.pool.contains(&tx_id) || context.chain.get_store().get_transaction(&tx_id)?.is_some() {
        debug!("Transaction {tx_id} already known");
        return Ok(TxValidation::Valid);
    }

    let validation = validate_transaction(&transaction, &context.chain)?;
    if let TxValidation::Invalid(reason) = &validation {
        warn!("Rejected transaction {tx_id}: {reason}");
        return Ok(validation);
    }
    let conflict = transaction.get_inputs().iter().any(|input| {
        context
            .pool
            .spends_output(input.get_previous_tx_id(), input.get_previous_output_index())
    });
    if conflict {
        warn!("Rejected transaction {tx_id}: conflicts with a pending transaction");
        return Ok(TxValidation::Invalid(
            "conflicts with a pending transaction".to_string(),
        ));
    }

    if context.pool.add(transaction.clone()) {
        info!("Pooled transaction {tx_id}");
        let message = Message::transaction_share(context.listen_port(), transaction);
        broadcast(context, &message, sender);
    }
    Ok(validation)
}

pub fn handle_block_request(context: &NodeContext, block_id: &str, sender: &Peer) -> Result<()> {
    match context.chain.get_store().get_block(block_id)? {
        Some(block) => {
            let message = Message::block_share(context.listen_port(), block);
            send_message(sender, &context.config, &message)
        }
        None => {
            debug!("{} asked for unknown block {block_id}", sender.get_addr());
            Ok(())
        }
    }
}

pub fn handle_client_request(context: &NodeContext, sender: &Peer) -> Result<()> {
    context.peers.add(sender.clone());
    let known: Vec<Peer> = context
        .peers
        .all()
        .into_iter()
        .filter(|peer| peer != sender)
        .collect();
    let message = Message::client_share(context.listen_port(), known);
    send_message(sender, &context.config, &message)
}

pub fn handle_client_share(context: &NodeContext, peers: Vec<Peer>) {
    let added = context.peers.merge(peers, &context.local);
    if added > 0 {
        info!("Learned {added} new peers, {} known", context.peers.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeContext;
    use crate::storage::ChainStore;
    use crate::testnet::{block_with, mine_on, payment_block, test_config};
    use crate::wallet::Wallet;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn context() -> (Arc<NodeContext>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let context = NodeContext::with_store(test_config(dir.path(), 1), ChainStore::temporary().unwrap());
        (context, dir)
    }

    #[test]
    fn test_orphan_is_held_until_parent_arrives() {
        let (context, _dir) = context();
        let miner = Wallet::new().unwrap();
        let genesis = mine_on(None, &miner).unwrap();
        let b2 = mine_on(Some(&genesis), &miner).unwrap();
        let b3 = mine_on(Some(&b2), &miner).unwrap();

        assert_eq!(
            process_block(&context, b3.clone(), None, false).unwrap(),
            BlockValidation::MissingPrevBlock
        );
        assert_eq!(
            process_block(&context, b2.clone(), None, false).unwrap(),
            BlockValidation::MissingPrevBlock
        );
        assert_eq!(context.held_blocks.len(), 2);

        assert_eq!(
            process_block(&context, genesis, None, false).unwrap(),
            BlockValidation::Valid
        );
        assert!(context.held_blocks.is_empty());
        let head = context.chain.get_head().unwrap().unwrap();
        assert_eq!(head.get_hash(), b3.get_hash());
    }

    #[test]
    fn test_competing_branch_with_shared_payment_takes_over() {
        let (context, _dir) = context();
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let genesis = mine_on(None, &alice).unwrap();
        process_block(&context, genesis.clone(), None, false).unwrap();
        let (b2a, payment) =
            payment_block(&context.chain, &genesis, &alice, &bob.get_address(), 15).unwrap();
        process_block(&context, b2a, None, false).unwrap();

        let b2b = block_with(Some(&genesis), &bob, vec![payment.clone()]).unwrap();
        let b3 = mine_on(Some(&b2b), &bob).unwrap();
        assert_eq!(
            process_block(&context, b2b, None, false).unwrap(),
            BlockValidation::Valid
        );
        assert_eq!(
            process_block(&context, b3.clone(), None, false).unwrap(),
            BlockValidation::Valid
        );

        let head = context.chain.get_head().unwrap().unwrap();
        assert_eq!(head.get_hash(), b3.get_hash());
        assert!(context
            .chain
            .get_store()
            .get_transaction(payment.get_id())
            .unwrap()
            .is_some());
        assert!(context.pool.is_empty());
    }

    #[test]
    fn test_invalid_block_is_not_stored() {
        let (context, _dir) = context();
        let miner = Wallet::new().unwrap();
        let mut genesis = mine_on(None, &miner).unwrap();
        genesis.seal(99, &[0x11; 32]);

        let outcome = process_block(&context, genesis.clone(), None, false).unwrap();
        assert!(matches!(outcome, BlockValidation::Invalid(_)));
        assert!(!context.chain.get_store().contains_block(genesis.get_hash()).unwrap());
    }

    #[test]
    fn test_transaction_is_pooled_once() {
        let (context, _dir) = context();
        let alice = Wallet::new().unwrap();
        let genesis = mine_on(None, &alice).unwrap();
        process_block(&context, genesis.clone(), None, false).unwrap();

        let (_, payment) =
            payment_block(&context.chain, &genesis, &alice, &Wallet::new().unwrap().get_address(), 5).unwrap();
        assert!(process_transaction(&context, payment.clone(), None).unwrap().is_valid());
        assert!(process_transaction(&context, payment.clone(), None).unwrap().is_valid());
        assert_eq!(context.pool.len(), 1);
    }

    #[test]
    fn test_conflicting_and_coinbase_transactions_rejected() {
        let (context, _dir) = context();
        let alice = Wallet::new().unwrap();
        let genesis = mine_on(None, &alice).unwrap();
        process_block(&context, genesis.clone(), None, false).unwrap();

        let (_, first) =
            payment_block(&context.chain, &genesis, &alice, &Wallet::new().unwrap().get_address(), 5).unwrap();
        let (_, second) =
            payment_block(&context.chain, &genesis, &alice, &Wallet::new().unwrap().get_address(), 6).unwrap();
        assert!(process_transaction(&context, first, None).unwrap().is_valid());
        assert!(!process_transaction(&context, second, None).unwrap().is_valid());

        let coinbase = Transaction::new_coinbase(&alice, 2).unwrap();
        assert!(!process_transaction(&context, coinbase, None).unwrap().is_valid());
        assert_eq!(context.pool.len(), 1);
    }

    #[test]
    fn test_client_share_skips_self() {
        let (context, _dir) = context();
        handle_client_share(
            &context,
            vec![context.local.clone(), Peer::new("127.0.0.1", 9)],
        );
        assert_eq!(context.peers.len(), 1);
    }
}
