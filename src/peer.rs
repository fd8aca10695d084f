//! A single mining peer: one private chain, one mempool, one name.

use crate::announce::Announce;
use crate::blockchain::{Block, Blockchain};
use crate::error::ChainError;
use crate::mempool::Mempool;
use crate::miner::{proof_of_work_with_cancel, CancelToken};
use crate::transaction::Transaction;
use tracing::info;

/// Result of one mine-once attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum MineOutcome {
    /// The mempool was empty; nothing was mined.
    Idle,
    /// A block was appended to this peer's chain and announced.
    Mined(Block),
    /// The search was abandoned through the cancellation hook.
    Cancelled,
}

/// Misbehaviour injected into a peer's mining task by unit tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum MiningFault {
    /// Panic as soon as mining starts.
    Panic,
    /// Never find a proof; only the cancel token ends the task.
    Stall,
}

#[derive(Debug, Clone)]
pub struct Peer {
    name: String,
    chain: Blockchain,
    mempool: Mempool,
    #[cfg(test)]
    fault: Option<MiningFault>,
}

impl Peer {
    /// A peer starting from its own freshly mined genesis block.
    pub fn new(name: impl Into<String>, difficulty: u32) -> Result<Self, ChainError> {
        let name = name.into();
        info!(peer = %name, "Initializing blockchain");
        Ok(Self::with_chain(name, Blockchain::new(difficulty)?))
    }

    pub fn with_chain(name: impl Into<String>, chain: Blockchain) -> Self {
        Self {
            name: name.into(),
            chain,
            mempool: Mempool::new(),
            #[cfg(test)]
            fault: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn difficulty(&self) -> u32 {
        self.chain.difficulty()
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.chain.last_block()
    }

    pub fn add_transaction(&mut self, tx: Transaction) {
        info!(peer = %self.name, transaction = %tx, "Added transaction");
        self.mempool.add_transaction(tx);
    }

    /// Verify and append a block to this peer's chain.
    pub fn add_block(&mut self, block: Block, proof: String) -> Result<(), ChainError> {
        info!(peer = %self.name, index = block.index, "Adding block");
        self.chain.add_block(block, proof)
    }

    /// Overwrite the local chain wholesale, as done during synchronization.
    pub fn replace_chain(&mut self, chain: Blockchain) {
        self.chain = chain;
    }

    /// Mine the mempool into one block, running the search to completion.
    pub fn mine(&mut self, announcer: &dyn Announce) -> Result<MineOutcome, ChainError> {
        self.mine_with_cancel(announcer, &CancelToken::new())
    }

    /// Mine the mempool into one block on top of the local tip.
    ///
    /// An empty mempool is a successful no-op. The mempool is cleared and the peer
    /// announced only after the block has been appended.
    pub fn mine_with_cancel(
        &mut self,
        announcer: &dyn Announce,
        cancel: &CancelToken,
    ) -> Result<MineOutcome, ChainError> {
        info!(peer = %self.name, "Start mining");

        if self.mempool.is_empty() {
            info!(peer = %self.name, "No transactions to mine");
            return Ok(MineOutcome::Idle);
        }

        #[cfg(test)]
        match self.fault {
            Some(MiningFault::Panic) => panic!("mining fault injected for {}", self.name),
            Some(MiningFault::Stall) => {
                while !cancel.is_cancelled() {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                return Ok(MineOutcome::Cancelled);
            }
            None => {}
        }

        let last_block = self.chain.last_block().ok_or_else(|| {
            ChainError::InvalidBlockLinkage("the chain has no genesis block".to_string())
        })?;
        let previous_hash = last_block.hash().ok_or_else(|| {
            ChainError::InvalidBlockLinkage(format!("tip block {} has no hash", last_block.index))
        })?;

        let mut block = Block::new(
            last_block.index + 1,
            self.mempool.snapshot(),
            self.name.clone(),
            previous_hash,
        );

        let Some(proof) = proof_of_work_with_cancel(&mut block, self.chain.difficulty(), cancel) else {
            info!(peer = %self.name, index = block.index, "Mining cancelled");
            return Ok(MineOutcome::Cancelled);
        };

        self.add_block(block, proof)?;
        self.mempool.clear();
        announcer.announce(&self.name);

        let mined = self
            .chain
            .last_block()
            .cloned()
            .ok_or_else(|| ChainError::InvalidBlockLinkage("appended block vanished".to_string()))?;
        Ok(MineOutcome::Mined(mined))
    }

    #[cfg(test)]
    pub(crate) fn chain_mut(&mut self) -> &mut Blockchain {
        &mut self.chain
    }

    #[cfg(test)]
    pub(crate) fn inject_fault(&mut self, fault: MiningFault) {
        self.fault = Some(fault);
    }
}
