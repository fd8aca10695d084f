use crate::transaction::{write_str, Transaction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Author recorded on every genesis block.
pub const GENESIS_AUTHOR: &str = "Satoshi";

/// Previous-hash sentinel of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub transactions: Vec<Transaction>,
    pub author: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub previous_hash: String,
    pub nonce: u64,
    /// Set only once proof-of-work has succeeded and the block was appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Block {
    /// Build an unmined candidate block stamped with the current time.
    pub fn new(
        index: u64,
        transactions: Vec<Transaction>,
        author: impl Into<String>,
        previous_hash: impl Into<String>,
    ) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis() as u64;
        Block {
            index,
            transactions,
            author: author.into(),
            timestamp,
            previous_hash: previous_hash.into(),
            nonce: 0,
            hash: None,
        }
    }

    /// The unmined genesis candidate. Every peer derives the same one, so with equal
    /// difficulty all peers start from an identical genesis hash.
    pub fn genesis() -> Self {
        Block {
            index: 0,
            transactions: Vec::new(),
            author: GENESIS_AUTHOR.to_string(),
            timestamp: 0,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            nonce: 0,
            hash: None,
        }
    }

    /// SHA-256 over the canonical encoding of every field except the stored hash,
    /// returned as 64 lowercase hex characters.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_le_bytes());
        hasher.update((self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            tx.write_canonical(&mut hasher);
        }
        write_str(&mut hasher, &self.author);
        hasher.update(self.timestamp.to_le_bytes());
        write_str(&mut hasher, &self.previous_hash);
        hasher.update(self.nonce.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        Block {
            index: 4,
            transactions: vec![
                Transaction::new("Alice", "Bob", 10.0).with_data("Hello Bob!"),
                Transaction::new("Bob", "Alice", 5.0).with_data("Hello Alice!"),
            ],
            author: "Satoshi".to_string(),
            timestamp: 0,
            previous_hash: "000e69bd96b65c00653b4c59a5ece2f187578928460675c8317e8f91c74f8243".to_string(),
            nonce: 0,
            hash: None,
        }
    }

    #[test]
    fn test_compute_hash_is_stable() {
        let block = sample_block();
        let first = block.compute_hash();
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(first, block.compute_hash());
        assert_eq!(first, block.clone().compute_hash());
    }

    #[test]
    fn test_compute_hash_matches_known_digest() {
        assert_eq!(
            sample_block().compute_hash(),
            "47e889f9837211100e78e4fb818120563b7634ebe4c171e5edd40c7925a098ad"
        );
    }

    #[test]
    fn test_stored_hash_is_not_hashed() {
        let mut block = sample_block();
        let before = block.compute_hash();
        block.hash = Some("ffff".to_string());
        assert_eq!(before, block.compute_hash());
    }

    #[test]
    fn test_every_field_changes_hash() {
        let base = sample_block().compute_hash();

        let mut b = sample_block();
        b.index += 1;
        assert_ne!(base, b.compute_hash());

        let mut b = sample_block();
        b.transactions.swap(0, 1);
        assert_ne!(base, b.compute_hash());

        let mut b = sample_block();
        b.author = "Satoshi3".to_string();
        assert_ne!(base, b.compute_hash());

        let mut b = sample_block();
        b.timestamp = 1;
        assert_ne!(base, b.compute_hash());

        let mut b = sample_block();
        b.previous_hash = "0".to_string();
        assert_ne!(base, b.compute_hash());

        let mut b = sample_block();
        b.nonce = 1;
        assert_ne!(base, b.compute_hash());
    }

    #[test]
    fn test_genesis_shape() {
        let genesis = Block::genesis();
        assert!(genesis.is_genesis());
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.author, GENESIS_AUTHOR);
        assert_eq!(genesis.timestamp, 0);
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(genesis.hash(), None);
    }

    #[test]
    fn test_serde_round_trip_keeps_hash() {
        let mut block = sample_block();
        block.hash = Some(block.compute_hash());
        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(block, back);
    }
}
