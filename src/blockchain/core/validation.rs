use super::block::{Block, GENESIS_PREVIOUS_HASH};
use crate::miner::meets_difficulty;
use tracing::error;

/// `hash` meets the difficulty target AND is the block's own freshly computed hash.
pub fn is_valid_proof(block: &Block, hash: &str, difficulty: u32) -> bool {
    meets_difficulty(hash, difficulty) && hash == block.compute_hash()
}

/// Replay a whole chain from the genesis sentinel.
///
/// Each block must carry a stored hash that is a valid proof of its contents, link
/// to the previous block's hash and sit at the next index. The chain is only
/// borrowed, so the caller's blocks are never touched. Stops at the first failure.
pub fn check_chain_validity(chain: &[Block], difficulty: u32) -> bool {
    let mut previous_hash = GENESIS_PREVIOUS_HASH;

    for (position, block) in chain.iter().enumerate() {
        let Some(block_hash) = block.hash() else {
            error!(index = block.index, "Block has no stored hash");
            return false;
        };

        if !is_valid_proof(block, block_hash, difficulty) {
            error!(
                index = block.index,
                hash = %block_hash,
                valid_proof = %block.compute_hash(),
                "Invalid proof"
            );
            return false;
        }

        if block.previous_hash != previous_hash {
            error!(
                index = block.index,
                previous_hash = %block.previous_hash,
                expected = %previous_hash,
                "Invalid previous hash"
            );
            return false;
        }

        if block.index != position as u64 {
            error!(index = block.index, expected = position, "Invalid block index");
            return false;
        }

        previous_hash = block_hash;
    }

    true
}
