//! Key management and Bitcoin-style addressing
//!
//! ECDSA P-256 key pairs, Base58Check addresses with a version byte of
//! `0x00`, and the on-disk wallet collection.

pub mod wallet;
pub mod wallets;

pub use wallet::{
    convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, Signer, Wallet,
    ADDRESS_CHECK_SUM_LEN, PUB_KEY_HASH_LEN,
};
pub use wallets::{Wallets, WALLET_FILE};
