//! Error handling for the node
//!
//! One crate-wide error enum; library code returns `Result` and only the
//! CLI decides whether to exit.

use std::fmt;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

/// Error kinds surfaced at component boundaries
#[derive(Debug, Clone)]
pub enum BlockchainError {
    /// Address fails Base58Check or length check
    InvalidAddress(String),
    /// Requested amount exceeds the sum of spendable outputs
    InsufficientFunds { required: u64, available: u64 },
    /// Sender key absent from the wallet file
    WalletNotFound(String),
    /// Signature verification failed or a referenced prev-output is missing
    InvalidTransaction(String),
    /// Chain database already exists
    AlreadyExists(String),
    /// Chain database, block, or transaction not found
    NotFound(String),
    /// Could not acquire the store write lock within the timeout
    Locked(String),
    /// Deserialization failure (on-disk or on-wire record)
    Corrupt(String),
    /// Dial/read/write/timeout on the peer protocol
    Transport(String),
    /// Underlying key-value store errors
    Database(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// File I/O errors
    Io(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::WalletNotFound(addr) => write!(f, "Wallet not found: {addr}"),
            BlockchainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            BlockchainError::AlreadyExists(msg) => write!(f, "Already exists: {msg}"),
            BlockchainError::NotFound(msg) => write!(f, "Not found: {msg}"),
            BlockchainError::Locked(msg) => write!(f, "Database locked: {msg}"),
            BlockchainError::Corrupt(msg) => write!(f, "Corrupt data: {msg}"),
            BlockchainError::Transport(msg) => write!(f, "Transport error: {msg}"),
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Corrupt(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Corrupt(err.to_string())
    }
}
