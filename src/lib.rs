//! # minichain
//!
//! A minimal UTXO-model blockchain node. Blocks of ECDSA-signed
//! transactions are mined with a fixed proof-of-work target, persisted to a
//! sled database, and replicated to a static set of peers over a small
//! TCP gossip protocol.
//!
//! ## Layout
//! - `core/`: blocks, transactions, the chain store, mining, UTXO queries
//! - `wallet/`: key management, addresses, transaction signing
//! - `network/`: gossip sync and the node's RPC surface
//! - `cli/`: command definitions for the `minichain` binary
//! - `config/`: NODE_ID environment handling
//! - `utils/`: hashing, base58, ECDSA, the shared binary codec
//!
//! One process owns a node's database at a time; while a node is running,
//! the CLI reaches the chain through the RPC surface instead.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod utils;
pub mod wallet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, BlockchainIterator, MerkleTree, ProofOfWork, TXInput, TXOutput, Transaction,
};
pub use error::{BlockchainError, Result};
pub use network::{NodeContext, Server, BOOTSTRAP_NODE, KNOWN_NODES};
pub use wallet::{
    convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, Signer, Wallet,
    Wallets, ADDRESS_CHECK_SUM_LEN,
};
