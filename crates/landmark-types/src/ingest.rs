//! Ingestion feed records.

use serde::{Deserialize, Serialize};

use crate::atom::AtomId;

/// One `(raw_vector, payload_ref)` tuple from the ingestion feed.
///
/// Delivery is at-least-once. Applying the same request twice yields the
/// same stored state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub raw_vector: Vec<f32>,
    pub payload_ref: String,
    /// Identifies the delivering message; distinct sources raise the ref count
    #[serde(default)]
    pub source_id: Option<String>,
    /// Producer-computed id, checked against the recomputed content hash
    #[serde(default)]
    pub expected_id: Option<AtomId>,
}

impl IngestRequest {
    pub fn new(raw_vector: Vec<f32>, payload_ref: impl Into<String>) -> Self {
        Self {
            raw_vector,
            payload_ref: payload_ref.into(),
            source_id: None,
            expected_id: None,
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_expected_id(mut self, id: AtomId) -> Self {
        self.expected_id = Some(id);
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Result of applying an ingest request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub atom_id: AtomId,
    /// False when the content already existed
    pub created: bool,
    pub ref_count: usize,
}
