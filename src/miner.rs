//! Proof-of-work mining for PeerChain
//!
//! The search is a plain sequential nonce scan: start at zero, hash, bump the nonce,
//! repeat until the hex digest starts with `difficulty` zero characters. Expected
//! attempts are about `16^difficulty`; there is no upper bound.

use crate::blockchain::Block;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Leading zero hex characters required by default.
pub const DEFAULT_DIFFICULTY: u32 = 3;

/// A SHA-256 hex digest has 64 characters.
pub const MAX_DIFFICULTY: u32 = 64;

/// Difficulties at or above this take impractically long to search.
pub const SLOW_DIFFICULTY: u32 = 8;

/// Shared flag checked once per attempt by [`proof_of_work_with_cancel`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// True iff `hash` begins with `difficulty` `'0'` characters.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let required = difficulty as usize;
    hash.len() >= required && hash.bytes().take(required).all(|b| b == b'0')
}

/// Reset the nonce and search until the block hash meets `difficulty`.
///
/// Leaves the winning nonce in `block` and returns the winning hash. Blocks the
/// calling thread for as long as the search takes.
pub fn proof_of_work(block: &mut Block, difficulty: u32) -> String {
    warn_if_slow(difficulty);
    block.nonce = 0;
    let mut computed_hash = block.compute_hash();
    while !meets_difficulty(&computed_hash, difficulty) {
        block.nonce = block.nonce.wrapping_add(1);
        computed_hash = block.compute_hash();
    }
    debug!(index = block.index, nonce = block.nonce, hash = %computed_hash, "proof of work found");
    computed_hash
}

/// Same search as [`proof_of_work`], abandoned with `None` once `cancel` fires.
pub fn proof_of_work_with_cancel(block: &mut Block, difficulty: u32, cancel: &CancelToken) -> Option<String> {
    warn_if_slow(difficulty);
    block.nonce = 0;
    loop {
        if cancel.is_cancelled() {
            debug!(index = block.index, attempts = block.nonce, "proof of work cancelled");
            return None;
        }
        let computed_hash = block.compute_hash();
        if meets_difficulty(&computed_hash, difficulty) {
            debug!(index = block.index, nonce = block.nonce, hash = %computed_hash, "proof of work found");
            return Some(computed_hash);
        }
        block.nonce = block.nonce.wrapping_add(1);
    }
}

fn warn_if_slow(difficulty: u32) {
    if difficulty >= SLOW_DIFFICULTY {
        warn!(
            target: "mining",
            difficulty = difficulty,
            "Difficulty may be unsolvable in reasonable time"
        );
    }
}
