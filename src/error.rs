//! Error types for PeerChain

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChainError {
    /// A candidate block does not extend the current chain tip.
    #[error("Invalid block linkage: {0}")]
    InvalidBlockLinkage(String),
    /// A claimed hash misses the difficulty target or does not match the block contents.
    #[error("Invalid proof of work: {0}")]
    InvalidProofOfWork(String),
    #[error("Chain validation failed for peer {0}")]
    ChainValidationFailure(String),
    #[error("Peer not found: {0}")]
    UnknownPeer(String),
    #[error("Peer already registered: {0}")]
    DuplicatePeer(String),
    #[error("No peers configured")]
    NoPeers,
    /// Carries the configured wait in milliseconds.
    #[error("No peer announced a block within {0} ms")]
    AnnouncementTimeout(u64),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::DatabaseError(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
