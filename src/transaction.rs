//! Transaction value type for PeerChain
//!
//! A transaction is an immutable transfer/message between two addresses. It has no
//! behaviour beyond equality and a canonical byte encoding fed into block hashes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender_address: String,
    pub recipient_address: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub data: Option<String>,
}

impl Transaction {
    pub fn new(
        sender_address: impl Into<String>,
        recipient_address: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            sender_address: sender_address.into(),
            recipient_address: recipient_address.into(),
            value,
            data: None,
        }
    }

    /// Attach an opaque data payload.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// JSON description used by the pending-transactions query.
    pub fn to_json(&self) -> String {
        self.to_string()
    }

    /// Feed the canonical encoding of this transaction into `hasher`.
    ///
    /// Strings are length-prefixed so field boundaries cannot shift, and the value
    /// is encoded by its IEEE-754 bit pattern rather than a formatted string.
    pub(crate) fn write_canonical(&self, hasher: &mut Sha256) {
        write_str(hasher, &self.sender_address);
        write_str(hasher, &self.recipient_address);
        hasher.update(self.value.to_bits().to_le_bytes());
        match &self.data {
            Some(data) => {
                hasher.update([1u8]);
                write_str(hasher, data);
            }
            None => hasher.update([0u8]),
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

pub(crate) fn write_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(tx: &Transaction) -> Vec<u8> {
        let mut hasher = Sha256::new();
        tx.write_canonical(&mut hasher);
        hasher.finalize().to_vec()
    }

    #[test]
    fn test_equality_covers_all_fields() {
        let a = Transaction::new("Alice", "Bob", 10.0).with_data("Hello Bob!");
        let b = Transaction::new("Alice", "Bob", 10.0).with_data("Hello Bob!");
        assert_eq!(a, b);

        assert_ne!(a, Transaction::new("Alice", "Bob", 10.0));
        assert_ne!(a, Transaction::new("Alice", "Bob", 11.0).with_data("Hello Bob!"));
        assert_ne!(a, Transaction::new("Bob", "Alice", 10.0).with_data("Hello Bob!"));
    }

    #[test]
    fn test_value_defaults_to_zero_when_deserialized() {
        let tx: Transaction =
            serde_json::from_str(r#"{"sender_address":"Alice","recipient_address":"Bob"}"#).unwrap();
        assert_eq!(tx.value, 0.0);
        assert_eq!(tx.data, None);
    }

    #[test]
    fn test_canonical_encoding_separates_fields() {
        // Same concatenated text, different field boundaries.
        let a = Transaction::new("ab", "c", 1.0);
        let b = Transaction::new("a", "bc", 1.0);
        assert_ne!(digest(&a), digest(&b));

        let empty = Transaction::new("a", "b", 1.0).with_data("");
        let none = Transaction::new("a", "b", 1.0);
        assert_ne!(digest(&empty), digest(&none));
    }

    #[test]
    fn test_json_description() {
        let tx = Transaction::new("Alice", "Bob", 5.0).with_data("hi");
        let json: serde_json::Value = serde_json::from_str(&tx.to_json()).unwrap();
        assert_eq!(json["sender_address"], "Alice");
        assert_eq!(json["recipient_address"], "Bob");
        assert_eq!(json["value"], 5.0);
        assert_eq!(json["data"], "hi");
    }
}
