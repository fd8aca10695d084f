//! Database persistence layer for PeerChain
//!
//! Stores the canonical chain as published by the coordinator's query interface.
//! The core never calls into this module; drivers save after adopted rounds and
//! restore on start.

use crate::blockchain::Block;
use crate::consensus::ChainSnapshot;
use crate::error::ChainError;
use crate::transaction::Transaction;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Abstraction for persistence backends. Saving replaces the previous snapshot atomically.
pub trait Persistence: Send + Sync {
    fn save_chain(&self, snapshot: &ChainSnapshot) -> Result<(), ChainError>;
    /// The last saved snapshot, or `None` when nothing was saved yet.
    fn load_chain(&self) -> Result<Option<ChainSnapshot>, ChainError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

fn poisoned() -> ChainError {
    ChainError::DatabaseError("Mutex poisoned".to_string())
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                idx INTEGER PRIMARY KEY,
                hash TEXT NOT NULL,
                previous_hash TEXT NOT NULL,
                author TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                nonce INTEGER NOT NULL,
                transactions TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create blocks table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create metadata table: {}", e))
        })?;

        Ok(Database { conn: Mutex::new(conn) })
    }

    /// Replace the stored chain and metadata in a single transaction.
    pub fn save_chain(&self, snapshot: &ChainSnapshot) -> Result<(), ChainError> {
        let conn_guard = self.conn.lock().map_err(|_| poisoned())?;
        let tx = conn_guard.unchecked_transaction().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to start transaction: {}", e))
        })?;

        tx.execute("DELETE FROM blocks", [])
            .map_err(|e| ChainError::DatabaseError(format!("Failed to clear blocks: {}", e)))?;

        for block in &snapshot.chain {
            let hash = block.hash().ok_or_else(|| {
                ChainError::DatabaseError(format!("Block {} has no hash", block.index))
            })?;
            let transactions_json = serde_json::to_string(&block.transactions)?;

            tx.execute(
                "INSERT INTO blocks (idx, hash, previous_hash, author, timestamp, nonce, transactions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    block.index as i64,
                    hash,
                    block.previous_hash,
                    block.author,
                    block.timestamp as i64,
                    block.nonce as i64,
                    transactions_json,
                ],
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to save block: {}", e)))?;
        }

        let peers_json = serde_json::to_string(&snapshot.peers)?;
        let metadata = [
            ("difficulty", snapshot.difficulty.to_string()),
            ("canonical_peer", snapshot.current_mainnet_peer_name.clone()),
            ("peers", peers_json),
        ];
        for (key, value) in metadata {
            tx.execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to save {}: {}", key, e)))?;
        }

        tx.commit().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;

        info!(length = snapshot.length, peer = %snapshot.current_mainnet_peer_name, "Saved chain");
        Ok(())
    }

    pub fn load_chain(&self) -> Result<Option<ChainSnapshot>, ChainError> {
        let conn_guard = self.conn.lock().map_err(|_| poisoned())?;
        let mut stmt = conn_guard
            .prepare(
                "SELECT idx, hash, previous_hash, author, timestamp, nonce, transactions
                 FROM blocks ORDER BY idx ASC",
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let index: i64 = row.get(0)?;
                let hash: String = row.get(1)?;
                let previous_hash: String = row.get(2)?;
                let author: String = row.get(3)?;
                let timestamp: i64 = row.get(4)?;
                let nonce: i64 = row.get(5)?;
                let transactions_json: String = row.get(6)?;
                Ok((index, hash, previous_hash, author, timestamp, nonce, transactions_json))
            })
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query blocks: {}", e)))?;

        let mut chain = Vec::new();
        for row in rows {
            let (index, hash, previous_hash, author, timestamp, nonce, transactions_json) =
                row.map_err(|e| ChainError::DatabaseError(format!("Failed to load block: {}", e)))?;
            let transactions: Vec<Transaction> = serde_json::from_str(&transactions_json)?;

            chain.push(Block {
                index: index as u64,
                transactions,
                author,
                timestamp: timestamp as u64,
                previous_hash,
                nonce: nonce as u64,
                hash: Some(hash),
            });
        }

        if chain.is_empty() {
            return Ok(None);
        }

        let metadata = |key: &str| -> Result<Option<String>, ChainError> {
            conn_guard
                .query_row("SELECT value FROM metadata WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(|e| ChainError::DatabaseError(format!("Failed to read {}: {}", key, e)))
        };

        let difficulty = metadata("difficulty")?
            .ok_or_else(|| ChainError::DatabaseError("Missing difficulty metadata".to_string()))?
            .parse::<u32>()
            .map_err(|e| ChainError::DatabaseError(format!("Invalid difficulty metadata: {}", e)))?;
        let current_mainnet_peer_name = metadata("canonical_peer")?.unwrap_or_default();
        let peers: Vec<String> = match metadata("peers")? {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };

        Ok(Some(ChainSnapshot {
            length: chain.len(),
            chain,
            current_mainnet_peer_name,
            peers,
            difficulty,
        }))
    }
}

impl Persistence for Database {
    fn save_chain(&self, snapshot: &ChainSnapshot) -> Result<(), ChainError> {
        Database::save_chain(self, snapshot)
    }

    fn load_chain(&self) -> Result<Option<ChainSnapshot>, ChainError> {
        Database::load_chain(self)
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    pub snapshot: Arc<Mutex<Option<ChainSnapshot>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_chain(&self, snapshot: &ChainSnapshot) -> Result<(), ChainError> {
        let mut stored = self.snapshot.lock().map_err(|_| poisoned())?;
        *stored = Some(snapshot.clone());
        Ok(())
    }

    fn load_chain(&self) -> Result<Option<ChainSnapshot>, ChainError> {
        let stored = self.snapshot.lock().map_err(|_| poisoned())?;
        Ok(stored.clone())
    }
}
