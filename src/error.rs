//! Error types for PoQChain

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ChainError {
    InvalidBlockLinkage,
    InvalidProofOfWork,
    InvalidMerkleRoot,
    InvalidTransaction(String),
    InvalidBlock(String),
    /// Mining refused: quality threshold unmet and not every transaction approved.
    ConsensusGate(String),
    /// Every validator queue is full.
    CapacityExhausted(String),
    /// A vote or action from a validator that is not assigned to the transaction.
    Unauthorized(String),
    ChainReplacement(String),
    /// A peer's validator pool snapshot failed its range checks.
    InvalidSnapshot(String),
    /// The chain tip moved while a block was being mined.
    StaleBlock,
    MiningCancelled,
    InsufficientFunds(String),
    TransactionNotFound(String),
    ValidatorNotFound(String),
    CryptoError(String),
    SerializationError(String),
    StorageError(String),
    NetworkError(String),
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainError::InvalidBlockLinkage => write!(f, "Invalid block linkage"),
            ChainError::InvalidProofOfWork => write!(f, "Invalid proof of work"),
            ChainError::InvalidMerkleRoot => write!(f, "Invalid Merkle root"),
            ChainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {}", msg),
            ChainError::InvalidBlock(msg) => write!(f, "Invalid block: {}", msg),
            ChainError::InvalidSnapshot(msg) => write!(f, "Invalid snapshot: {}", msg),
            ChainError::ConsensusGate(msg) => write!(f, "Consensus gate refused block: {}", msg),
            ChainError::CapacityExhausted(msg) => write!(f, "Validator capacity exhausted: {}", msg),
            ChainError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ChainError::ChainReplacement(msg) => write!(f, "Chain replacement rejected: {}", msg),
            ChainError::StaleBlock => write!(f, "Block was mined on a stale tip"),
            ChainError::MiningCancelled => write!(f, "Mining cancelled"),
            ChainError::InsufficientFunds(msg) => write!(f, "Insufficient funds: {}", msg),
            ChainError::TransactionNotFound(id) => write!(f, "Transaction not found: {}", id),
            ChainError::ValidatorNotFound(id) => write!(f, "Validator not found: {}", id),
            ChainError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            ChainError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            ChainError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            ChainError::NetworkError(msg) => write!(f, "Network error: {}", msg),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
