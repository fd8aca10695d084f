//! PeerChain - A proof-of-work blockchain where co-located peers race to mine
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Blocks, chains and chain validation
//! - [`transaction`] - Transaction value type
//! - [`mempool`] - Per-peer pending transaction pool
//!
//! ## Mining & Consensus
//! - [`miner`] - Proof-of-work search and difficulty predicate
//! - [`peer`] - A mining peer with its private chain
//! - [`announce`] - First-writer-wins announcement channel
//! - [`consensus`] - Round coordinator and query interface
//!
//! ## State Management
//! - [`persistence`] - Chain snapshot store (SQLite)
//!
//! ## Integration
//! - `api` - HTTP query API (feature `api`)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod blockchain;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Mining & Consensus
// ============================================================================
pub mod announce;
pub mod consensus;
pub mod miner;
pub mod peer;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Integration
// ============================================================================
#[cfg(feature = "api")]
pub mod api;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
