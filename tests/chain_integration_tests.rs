//! Ledger integration tests
//!
//! Drives the chain manager through the public API: validation before
//! commit, double spends, deep reorganizations and persistence.

use powchain::core::{
    AddBlockOutcome, Block, BlockValidation, Blockchain, Transaction, TxValidation, BLOCK_REWARD,
};
use powchain::storage::MemoryPool;
use powchain::testnet::{block_with, create_test_wallets, mine_on, temp_chain};
use powchain::validate_transaction;
use powchain::wallet::Wallet;
use std::sync::Arc;
use tempfile::tempdir;

fn commit(chain: &Blockchain, block: &Block) -> AddBlockOutcome {
    assert_eq!(chain.validate_block(block).unwrap(), BlockValidation::Valid);
    chain.add_block(block).unwrap()
}

fn pay(chain: &Blockchain, payer: &Wallet, to: &Wallet, amount: u64) -> Transaction {
    let (_, spendable) = chain
        .find_spendable_outputs(&payer.get_address(), amount)
        .unwrap();
    Transaction::new_payment(payer, &to.get_address(), amount, &spendable).unwrap()
}

#[test]
fn test_payment_moves_balance() {
    let chain = temp_chain().unwrap();
    let wallets = create_test_wallets(2).unwrap();
    let (alice, bob) = (&wallets[0], &wallets[1]);

    let genesis = mine_on(None, alice).unwrap();
    assert_eq!(commit(&chain, &genesis), AddBlockOutcome::Genesis);

    let payment = pay(&chain, alice, bob, 35);
    assert!(validate_transaction(&payment, &chain).unwrap().is_valid());
    let b2 = block_with(Some(&genesis), bob, vec![payment]).unwrap();
    assert_eq!(commit(&chain, &b2), AddBlockOutcome::Extended);

    assert_eq!(chain.get_balance(&alice.get_address()).unwrap(), 15);
    assert_eq!(chain.get_balance(&bob.get_address()).unwrap(), 35 + BLOCK_REWARD);
    assert_eq!(chain.get_best_height().unwrap(), 2);
}

#[test]
fn test_double_spend_is_rejected() {
    let chain = temp_chain().unwrap();
    let wallets = create_test_wallets(3).unwrap();
    let (alice, bob, carol) = (&wallets[0], &wallets[1], &wallets[2]);

    let genesis = mine_on(None, alice).unwrap();
    commit(&chain, &genesis);
    let to_bob = pay(&chain, alice, bob, 10);
    let to_carol = pay(&chain, alice, carol, 10);

    // Both spend the genesis reward in one block.
    let greedy = block_with(Some(&genesis), bob, vec![to_bob.clone(), to_carol.clone()]).unwrap();
    assert!(matches!(
        chain.validate_block(&greedy).unwrap(),
        BlockValidation::Invalid(_)
    ));

    let b2 = block_with(Some(&genesis), bob, vec![to_bob]).unwrap();
    commit(&chain, &b2);
    assert!(matches!(
        validate_transaction(&to_carol, &chain).unwrap(),
        TxValidation::Invalid(_)
    ));
    let late = block_with(Some(&b2), carol, vec![to_carol]).unwrap();
    assert!(matches!(
        chain.validate_block(&late).unwrap(),
        BlockValidation::Invalid(_)
    ));
}

#[test]
fn test_deep_reorganization() {
    let chain = temp_chain().unwrap();
    let wallets = create_test_wallets(2).unwrap();
    let (alice, bob) = (&wallets[0], &wallets[1]);

    let genesis = mine_on(None, alice).unwrap();
    commit(&chain, &genesis);
    let a2 = mine_on(Some(&genesis), alice).unwrap();
    commit(&chain, &a2);
    let a3 = mine_on(Some(&a2), alice).unwrap();
    commit(&chain, &a3);

    let b2 = mine_on(Some(&genesis), bob).unwrap();
    assert_eq!(commit(&chain, &b2), AddBlockOutcome::Stored);
    let b3 = mine_on(Some(&b2), bob).unwrap();
    assert_eq!(commit(&chain, &b3), AddBlockOutcome::Stored);
    assert_eq!(chain.get_head().unwrap().unwrap().get_hash(), a3.get_hash());

    let b4 = mine_on(Some(&b3), bob).unwrap();
    match commit(&chain, &b4) {
        AddBlockOutcome::Reorganized { displaced, requeued } => {
            assert_eq!(displaced, vec![a2.get_hash().to_string(), a3.get_hash().to_string()]);
            assert_eq!(requeued, 0);
        }
        other => panic!("expected a reorganization, got {other:?}"),
    }

    let main: Vec<String> = chain
        .iter()
        .map(|b| b.unwrap().get_hash().to_string())
        .collect();
    assert_eq!(
        main,
        vec![genesis.get_hash(), b2.get_hash(), b3.get_hash(), b4.get_hash()]
    );
    assert_eq!(chain.get_balance(&alice.get_address()).unwrap(), BLOCK_REWARD);
    assert_eq!(chain.get_balance(&bob.get_address()).unwrap(), 3 * BLOCK_REWARD);
    assert!(!chain.is_on_main_chain(&a3).unwrap());
}

#[test]
fn test_branch_spending_its_own_outputs_takes_over() {
    let chain = temp_chain().unwrap();
    let wallets = create_test_wallets(3).unwrap();
    let (alice, bob, carol) = (&wallets[0], &wallets[1], &wallets[2]);

    let genesis = mine_on(None, alice).unwrap();
    commit(&chain, &genesis);
    let a2 = mine_on(Some(&genesis), alice).unwrap();
    commit(&chain, &a2);

    let b2 = mine_on(Some(&genesis), bob).unwrap();
    assert_eq!(commit(&chain, &b2), AddBlockOutcome::Stored);
    let bob_reward = &b2.get_transactions()[0];
    let spend = powchain::SpendableOutput {
        tx_id: bob_reward.get_id().to_string(),
        index: 0,
        amount: BLOCK_REWARD,
        block_number: bob_reward.get_block_number(),
    };
    let to_carol = Transaction::new_payment(bob, &carol.get_address(), 25, &[spend]).unwrap();
    let b3 = block_with(Some(&b2), bob, vec![to_carol]).unwrap();
    assert!(commit(&chain, &b3).is_new_head());

    assert_eq!(chain.get_balance(&carol.get_address()).unwrap(), 25);
    assert_eq!(chain.get_balance(&alice.get_address()).unwrap(), BLOCK_REWARD);
}

#[test]
fn test_ledger_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger");
    let miner = Wallet::new().unwrap();

    let (head, balance) = {
        let chain = Blockchain::open(&path, Arc::new(MemoryPool::new())).unwrap();
        let genesis = mine_on(None, &miner).unwrap();
        commit(&chain, &genesis);
        let b2 = mine_on(Some(&genesis), &miner).unwrap();
        commit(&chain, &b2);
        (
            b2.get_hash().to_string(),
            chain.get_balance(&miner.get_address()).unwrap(),
        )
    };

    let chain = Blockchain::open(&path, Arc::new(MemoryPool::new())).unwrap();
    assert_eq!(chain.get_head().unwrap().unwrap().get_hash(), head);
    assert_eq!(chain.get_balance(&miner.get_address()).unwrap(), balance);
    assert_eq!(chain.iter().count(), 2);
}
