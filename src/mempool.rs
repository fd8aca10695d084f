//! Per-peer pool of pending transactions
//!
//! Insertion order is preserved; that order becomes the transaction order of the
//! next mined block.

use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mempool {
    transactions: Vec<Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transaction(&mut self, tx: Transaction) {
        self.transactions.push(tx);
    }

    /// Copy of the pending transactions, in arrival order.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.clone()
    }

    pub fn get_all_transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// JSON descriptions, one per pending transaction.
    pub fn descriptions(&self) -> Vec<String> {
        self.transactions.iter().map(Transaction::to_json).collect()
    }

    pub fn clear(&mut self) {
        self.transactions.clear();
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
