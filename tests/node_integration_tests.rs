//! End-to-end node scenarios: chain creation, spending, rejection paths,
//! the linear-extension tip rule, and a two-node sync over real sockets.

use minichain::core::{Block, Blockchain, ProofOfWork, Transaction};
use minichain::network::Server;
use minichain::wallet::{hash_pub_key, Wallet, Wallets};
use minichain::BlockchainError;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn balance(chain: &Blockchain, wallet: &Wallet) -> u64 {
    let pub_key_hash = hash_pub_key(wallet.get_public_key());
    chain
        .find_utxo(&pub_key_hash)
        .iter()
        .map(|out| out.get_value())
        .sum()
}

// Wallet collection plus one funded chain whose genesis reward went to the
// first wallet.
fn funded_chain(dir: &Path) -> (Blockchain, Wallets, String) {
    let mut wallets = Wallets::from_file(dir.join("wallets.dat")).unwrap();
    let address = wallets.create_wallet().unwrap();
    let chain = Blockchain::create_with_path(&address, &dir.join("chain")).unwrap();
    (chain, wallets, address)
}

#[test]
fn test_genesis_creation() {
    let dir = tempdir().unwrap();
    let (chain, wallets, address) = funded_chain(dir.path());

    assert_eq!(chain.best_height(), 1);

    // The tip references a stored, proof-of-work-valid block.
    let tip_bytes = chain.get_block(&chain.get_tip_hash()).unwrap();
    let tip_block = Block::deserialize(&tip_bytes).unwrap();
    assert!(ProofOfWork::validate(&tip_block));
    assert!(tip_block.verify_merkle_root());

    let wallet = wallets.get_wallet(&address).unwrap();
    assert_eq!(balance(&chain, wallet), 10);
}

#[test]
fn test_spend_pays_recipient_and_returns_change() {
    let dir = tempdir().unwrap();
    let (chain, mut wallets, from) = funded_chain(dir.path());
    let to = wallets.create_wallet().unwrap();

    let tx = Transaction::new_utxo_transaction(&from, &to, 3, &chain, &wallets).unwrap();
    let coinbase = Transaction::new_coinbase_tx(&from, "").unwrap();
    chain.mine_block(&[coinbase, tx]).unwrap();

    assert_eq!(chain.best_height(), 2);

    // Sender: 10 (genesis) - 3 (spent) + 7 (change is part of the 10)
    // + 10 (coinbase back to sender) = 17, held as outputs {7, 10}.
    let from_wallet = wallets.get_wallet(&from).unwrap();
    let to_wallet = wallets.get_wallet(&to).unwrap();
    assert_eq!(balance(&chain, from_wallet), 17);
    assert_eq!(balance(&chain, to_wallet), 3);
}

#[test]
fn test_insufficient_funds_leaves_chain_unchanged() {
    let dir = tempdir().unwrap();
    let (chain, mut wallets, from) = funded_chain(dir.path());
    let to = wallets.create_wallet().unwrap();

    let result = Transaction::new_utxo_transaction(&from, &to, 100, &chain, &wallets);
    match result {
        Err(BlockchainError::InsufficientFunds {
            required,
            available,
        }) => {
            assert_eq!(required, 100);
            assert_eq!(available, 10);
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }

    assert_eq!(chain.best_height(), 1);
    let from_wallet = wallets.get_wallet(&from).unwrap();
    assert_eq!(balance(&chain, from_wallet), 10);
}

#[test]
fn test_unknown_sender_wallet_is_rejected() {
    let dir = tempdir().unwrap();
    let (chain, wallets, _) = funded_chain(dir.path());

    // A valid address whose key lives in someone else's wallet file.
    let stranger = Wallet::new().unwrap().get_address();
    let recipient = Wallet::new().unwrap().get_address();

    let result = Transaction::new_utxo_transaction(&stranger, &recipient, 1, &chain, &wallets);
    assert!(matches!(result, Err(BlockchainError::WalletNotFound(_))));
}

#[test]
fn test_forged_signature_fails_verification() {
    let dir = tempdir().unwrap();
    let (chain, mut wallets, from) = funded_chain(dir.path());
    let to = wallets.create_wallet().unwrap();

    // A well-formed spend of the sender's output...
    let mut tx = Transaction::new_utxo_transaction(&from, &to, 3, &chain, &wallets).unwrap();
    assert!(chain.verify_transaction(&tx).unwrap());

    // ...re-signed with an unrelated key while still claiming the sender's
    // public key in its inputs.
    let forger = Wallet::new().unwrap();
    chain.sign_transaction(&mut tx, &forger).unwrap();
    assert!(!chain.verify_transaction(&tx).unwrap());

    // Mining refuses the block outright.
    let coinbase = Transaction::new_coinbase_tx(&from, "").unwrap();
    let mined = chain.mine_block(&[coinbase, tx]);
    assert!(matches!(mined, Err(BlockchainError::InvalidTransaction(_))));
    assert_eq!(chain.best_height(), 1);
}

#[test]
fn test_put_block_only_extends_linearly() {
    let dir = tempdir().unwrap();
    let (chain, _wallets, address) = funded_chain(dir.path());
    let genesis_hash = chain.get_tip_hash();

    let coinbase = Transaction::new_coinbase_tx(&address, "").unwrap();
    let second = chain.mine_block(&[coinbase]).unwrap();
    assert_eq!(chain.get_tip_hash(), second.get_hash());

    // A competing block that also builds on genesis: stored, but the tip
    // stays where it was.
    let competing_coinbase = Transaction::new_coinbase_tx(&address, "competing").unwrap();
    let competing = Block::new_block(&[competing_coinbase], &genesis_hash).unwrap();
    chain.put_block(&competing.serialize().unwrap()).unwrap();

    assert!(chain.has_block(competing.get_hash()).unwrap());
    assert_eq!(chain.get_tip_hash(), second.get_hash());
    assert_eq!(chain.best_height(), 2);

    // Re-delivering a known block is a no-op.
    chain.put_block(&competing.serialize().unwrap()).unwrap();
    assert_eq!(chain.get_tip_hash(), second.get_hash());

    // A block that does extend the tip moves it.
    let extending_coinbase = Transaction::new_coinbase_tx(&address, "extending").unwrap();
    let extending = Block::new_block(&[extending_coinbase], &chain.get_tip_hash()).unwrap();
    chain.put_block(&extending.serialize().unwrap()).unwrap();
    assert_eq!(chain.get_tip_hash(), extending.get_hash());
    assert_eq!(chain.best_height(), 3);
}

#[test]
fn test_two_nodes_converge_over_gossip() {
    let bootstrap_dir = tempdir().unwrap();
    let joiner_dir = tempdir().unwrap();

    // Bootstrap node: a chain of height 2.
    let (bootstrap_chain, _wallets, address) = funded_chain(bootstrap_dir.path());
    let coinbase = Transaction::new_coinbase_tx(&address, "").unwrap();
    bootstrap_chain.mine_block(&[coinbase]).unwrap();
    assert_eq!(bootstrap_chain.best_height(), 2);

    let bootstrap_server = Server::new(
        bootstrap_chain.clone(),
        "localhost:3000".to_string(),
        None,
    );
    thread::spawn(move || bootstrap_server.run());

    // Give the bootstrap a moment to bind before the joiner announces.
    thread::sleep(Duration::from_millis(300));

    // Joining node: empty chain, announces itself on startup.
    let joiner_chain = Blockchain::init_with_path(&joiner_dir.path().join("chain")).unwrap();
    assert_eq!(joiner_chain.best_height(), 0);
    let joiner_server = Server::new(joiner_chain.clone(), "localhost:3001".to_string(), None);
    thread::spawn(move || joiner_server.run());

    // Wait for protocol quiescence.
    let deadline = Instant::now() + Duration::from_secs(30);
    while joiner_chain.best_height() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(200));
    }

    assert_eq!(joiner_chain.best_height(), 2);
    assert_eq!(joiner_chain.get_tip_hash(), bootstrap_chain.get_tip_hash());
    assert_eq!(
        joiner_chain.get_block_hashes(),
        bootstrap_chain.get_block_hashes()
    );
}
