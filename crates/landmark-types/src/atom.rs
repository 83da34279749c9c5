//! Atom and projected-coordinate types.
//!
//! An atom is the smallest content-addressed unit of ingested data: a raw
//! embedding vector plus an opaque reference to externally stored content.
//! Its identity is the SHA-256 digest of both, so identical content always
//! collapses onto one record.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::LandmarkError;

/// Number of dimensions in a projected coordinate.
pub const PROJECTED_DIMS: usize = 3;

/// Low-dimensional projected coordinate.
pub type Coord = [f32; PROJECTED_DIMS];

/// Default importance assigned to new atoms.
pub const DEFAULT_IMPORTANCE: f32 = 1.0;

/// Domain tag mixed into every atom digest.
const ATOM_DIGEST_TAG: &[u8] = b"landmark.atom.v1";

/// 256-bit content hash identifying an atom.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomId([u8; 32]);

impl AtomId {
    /// Compute the content hash for a raw vector and payload reference.
    ///
    /// The vector length is hashed first so that a trailing float can never
    /// be confused with payload bytes.
    pub fn compute(raw_vector: &[f32], payload_ref: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(ATOM_DIGEST_TAG);
        hasher.update((raw_vector.len() as u64).to_le_bytes());
        for value in raw_vector {
            hasher.update(value.to_le_bytes());
        }
        hasher.update(payload_ref.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomId({})", self.short())
    }
}

impl FromStr for AtomId {
    type Err = LandmarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| LandmarkError::InvalidAtomId(e.to_string()))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| LandmarkError::InvalidAtomId(format!("expected 32 bytes: {}", s)))?;
        Ok(Self(array))
    }
}

impl Serialize for AtomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AtomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Immutable content-addressed record plus its mutable importance weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    /// Content hash of `raw_vector` + `payload_ref`
    pub id: AtomId,
    /// Original embedding vector (fixed dimensionality per embedding space)
    pub raw_vector: Vec<f32>,
    /// Opaque handle to externally stored content
    pub payload_ref: String,
    /// Mutable importance weight, adjusted by the tuning loop
    pub importance: f32,
    /// When the atom was first ingested
    pub created_at: DateTime<Utc>,
    /// Distinct delivery sources that referenced this content
    #[serde(default)]
    pub sources: BTreeSet<String>,
    /// Last time the atom appeared in a search result
    #[serde(default)]
    pub last_access: Option<DateTime<Utc>>,
}

impl Atom {
    /// Create a new atom, computing its content id.
    pub fn new(raw_vector: Vec<f32>, payload_ref: impl Into<String>) -> Self {
        let payload_ref = payload_ref.into();
        let id = AtomId::compute(&raw_vector, &payload_ref);
        Self {
            id,
            raw_vector,
            payload_ref,
            importance: DEFAULT_IMPORTANCE,
            created_at: Utc::now(),
            sources: BTreeSet::new(),
            last_access: None,
        }
    }

    /// Recompute the content hash and compare with the stored id.
    pub fn verify_id(&self) -> bool {
        AtomId::compute(&self.raw_vector, &self.payload_ref) == self.id
    }

    /// Number of distinct references collapsed onto this record.
    pub fn ref_count(&self) -> usize {
        self.sources.len().max(1)
    }

    pub fn dimension(&self) -> usize {
        self.raw_vector.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Derived coordinate of an atom; recomputable from `raw_vector` alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectedCoordinate {
    pub atom_id: AtomId,
    pub coord: Coord,
    pub curve_key: u64,
}
