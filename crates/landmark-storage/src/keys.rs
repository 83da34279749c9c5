//! Key encoding and decoding for storage layer.
//!
//! Sequenced keys use `{prefix}:{sequence:020}` so lexicographic order
//! equals numeric order. Atom keys are the raw 32-byte content hash.

use crate::error::StorageError;

/// Key for sequenced entries (audit log, outcomes, ingest queue)
/// Format: {prefix}:{sequence:020}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqKey {
    pub prefix: &'static str,
    /// Monotonic sequence number
    pub sequence: u64,
}

impl SeqKey {
    pub const AUDIT: &'static str = "audit";
    pub const QUEUE: &'static str = "ingest";
    pub const OUTCOME: &'static str = "outcome";

    pub fn new(prefix: &'static str, sequence: u64) -> Self {
        Self { prefix, sequence }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}:{:020}", self.prefix, self.sequence).into_bytes()
    }

    /// Decode a key, checking the expected prefix
    pub fn from_bytes(prefix: &'static str, bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let (p, seq) = s
            .split_once(':')
            .ok_or_else(|| StorageError::Key(format!("Invalid sequence key format: {}", s)))?;
        if p != prefix {
            return Err(StorageError::Key(format!(
                "Expected prefix {}, got {}",
                prefix, p
            )));
        }

        let sequence: u64 = seq
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid sequence: {}", e)))?;

        Ok(Self { prefix, sequence })
    }
}

/// Well-known keys in the meta column family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKey {
    Landmarks,
    IndexParams,
    RetrievalSettings,
}

impl MetaKey {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            MetaKey::Landmarks => b"landmarks",
            MetaKey::IndexParams => b"index_params",
            MetaKey::RetrievalSettings => b"retrieval_settings",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_key_roundtrip() {
        let key = SeqKey::new(SeqKey::AUDIT, 12345);
        let decoded = SeqKey::from_bytes(SeqKey::AUDIT, &key.to_bytes()).unwrap();
        assert_eq!(decoded.sequence, 12345);
        assert!(SeqKey::from_bytes(SeqKey::QUEUE, &key.to_bytes()).is_err());
    }

    #[test]
    fn test_seq_key_lexicographic_order() {
        let a = SeqKey::new(SeqKey::QUEUE, 9);
        let b = SeqKey::new(SeqKey::QUEUE, 10);
        assert!(a.to_bytes() < b.to_bytes());
    }
}
