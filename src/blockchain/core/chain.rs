use super::block::Block;
use super::validation::{check_chain_validity, is_valid_proof};
use crate::error::ChainError;
use crate::miner::{proof_of_work, MAX_DIFFICULTY};
use tracing::{error, info};

/// An ordered, owned sequence of blocks starting at genesis.
///
/// Cloning is a full structural copy: two chains never share block storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Blockchain {
    blocks: Vec<Block>,
    difficulty: u32,
}

impl Blockchain {
    /// Create a chain holding only a freshly mined genesis block.
    pub fn new(difficulty: u32) -> Result<Self, ChainError> {
        check_difficulty(difficulty)?;
        let mut genesis = Block::genesis();
        let proof = proof_of_work(&mut genesis, difficulty);
        genesis.hash = Some(proof);
        info!(hash = ?genesis.hash, difficulty, "Created genesis block");

        Ok(Blockchain {
            blocks: vec![genesis],
            difficulty,
        })
    }

    /// Rebuild a chain from stored blocks, e.g. a persisted snapshot.
    pub fn from_blocks(blocks: Vec<Block>, difficulty: u32) -> Result<Self, ChainError> {
        check_difficulty(difficulty)?;
        if blocks.is_empty() {
            return Err(ChainError::ChainValidationFailure(
                "cannot restore an empty chain".to_string(),
            ));
        }
        if !check_chain_validity(&blocks, difficulty) {
            return Err(ChainError::ChainValidationFailure(
                "restored chain failed validation".to_string(),
            ));
        }
        Ok(Blockchain { blocks, difficulty })
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        check_chain_validity(&self.blocks, self.difficulty)
    }

    /// Append `block` with its claimed `proof`. The only way a chain grows.
    ///
    /// Rejects without mutating when the block does not extend the current tip or
    /// when `proof` is not a valid proof of the block.
    pub fn add_block(&mut self, mut block: Block, proof: String) -> Result<(), ChainError> {
        let last_block = self.blocks.last().ok_or_else(|| {
            ChainError::InvalidBlockLinkage("the chain has no genesis block".to_string())
        })?;
        let previous_hash = last_block.hash().ok_or_else(|| {
            ChainError::InvalidBlockLinkage(format!("tip block {} has no hash", last_block.index))
        })?;

        if previous_hash != block.previous_hash {
            error!(expected = %previous_hash, found = %block.previous_hash, "Previous hash mismatch");
            return Err(ChainError::InvalidBlockLinkage(format!(
                "expected previous hash {}, but got {}",
                previous_hash, block.previous_hash
            )));
        }

        if block.index != last_block.index + 1 {
            error!(expected = last_block.index + 1, found = block.index, "Block index mismatch");
            return Err(ChainError::InvalidBlockLinkage(format!(
                "expected index {}, but got {}",
                last_block.index + 1,
                block.index
            )));
        }

        if !is_valid_proof(&block, &proof, self.difficulty) {
            error!(proof = %proof, "Invalid proof");
            return Err(ChainError::InvalidProofOfWork(format!(
                "{} is not a valid proof for block {}",
                proof, block.index
            )));
        }

        block.hash = Some(proof);
        info!(index = block.index, author = %block.author, hash = ?block.hash, "Added block");
        self.blocks.push(block);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn blocks_mut(&mut self) -> &mut Vec<Block> {
        &mut self.blocks
    }
}

fn check_difficulty(difficulty: u32) -> Result<(), ChainError> {
    if difficulty > MAX_DIFFICULTY {
        return Err(ChainError::ConfigError(format!(
            "difficulty {} exceeds the maximum of {}",
            difficulty, MAX_DIFFICULTY
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::GENESIS_PREVIOUS_HASH;
    use crate::transaction::Transaction;

    fn next_block(chain: &Blockchain) -> Block {
        let last = chain.last_block().unwrap();
        Block::new(
            last.index + 1,
            vec![Transaction::new("Alice", "Bob", 10.0)],
            "tester",
            last.hash().unwrap(),
        )
    }

    #[test]
    fn test_new_chain_has_mined_genesis() {
        let chain = Blockchain::new(2).unwrap();
        assert_eq!(chain.len(), 1);
        let genesis = chain.last_block().unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert!(genesis.hash().unwrap().starts_with("00"));
        assert!(chain.is_valid());
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let a = Blockchain::new(2).unwrap();
        let b = Blockchain::new(2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_difficulty_above_max_rejected() {
        assert!(matches!(Blockchain::new(65), Err(ChainError::ConfigError(_))));
    }

    #[test]
    fn test_add_block_appends() {
        let mut chain = Blockchain::new(2).unwrap();
        let mut block = next_block(&chain);
        let proof = proof_of_work(&mut block, 2);
        chain.add_block(block, proof.clone()).unwrap();

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.last_block().unwrap().hash(), Some(proof.as_str()));
        assert!(chain.is_valid());
    }

    #[test]
    fn test_add_block_rejects_wrong_previous_hash() {
        let mut chain = Blockchain::new(2).unwrap();
        let mut block = next_block(&chain);
        block.previous_hash = "bogus".to_string();
        let proof = proof_of_work(&mut block, 2);

        let result = chain.add_block(block, proof);
        assert!(matches!(result, Err(ChainError::InvalidBlockLinkage(_))));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_add_block_rejects_wrong_index() {
        let mut chain = Blockchain::new(2).unwrap();
        let mut block = next_block(&chain);
        block.index = 7;
        let proof = proof_of_work(&mut block, 2);

        let result = chain.add_block(block, proof);
        assert!(matches!(result, Err(ChainError::InvalidBlockLinkage(_))));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_add_block_rejects_bad_proof() {
        let mut chain = Blockchain::new(2).unwrap();
        let mut block = next_block(&chain);
        let proof = proof_of_work(&mut block, 2);
        block.nonce += 1;

        let result = chain.add_block(block, proof);
        assert!(matches!(result, Err(ChainError::InvalidProofOfWork(_))));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_from_blocks_validates() {
        let mut chain = Blockchain::new(1).unwrap();
        let mut block = next_block(&chain);
        let proof = proof_of_work(&mut block, 1);
        chain.add_block(block, proof).unwrap();

        let restored = Blockchain::from_blocks(chain.blocks().to_vec(), 1).unwrap();
        assert_eq!(restored, chain);

        let mut tampered = chain.blocks().to_vec();
        tampered[1].author = "Mallory".to_string();
        assert!(Blockchain::from_blocks(tampered, 1).is_err());
        assert!(Blockchain::from_blocks(Vec::new(), 1).is_err());
    }

    #[test]
    fn test_clone_is_detached() {
        let chain = Blockchain::new(1).unwrap();
        let mut copy = chain.clone();
        let mut block = next_block(&copy);
        let proof = proof_of_work(&mut block, 1);
        copy.add_block(block, proof).unwrap();

        assert_eq!(chain.len(), 1);
        assert_eq!(copy.len(), 2);
    }
}
