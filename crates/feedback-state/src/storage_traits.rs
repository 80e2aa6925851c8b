//! Storage trait definitions for the feedback log
//!
//! - `ContentDigest`: SHA-256 identity used for requirement fingerprints
//! - `FeedbackEntry`: one append-only record (fingerprint + embedding + payload)
//! - `FeedbackLog`: backend-agnostic append / nearest-neighbour interface
//!
//! All traits are async and backend-agnostic. Test doubles live in the
//! `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private so the string is always lowercase hex produced
/// by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// FeedbackLog
// ---------------------------------------------------------------------------

/// One append-only entry in the feedback log.
///
/// `payload` is opaque to this layer; the domain layer stores a serialized
/// verification report there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Unique id of the entry (the report id upstream)
    pub record_id: String,
    /// Deterministic fingerprint of the requirements
    pub fingerprint: ContentDigest,
    /// Retrieval vector; never used for correctness decisions
    pub embedding: Vec<f32>,
    /// Serialized domain payload
    pub payload: serde_json::Value,
    /// Whether the stored outcome was verified
    pub verified: bool,
    /// Overall score of the stored outcome
    pub score: f64,
    /// When the entry was appended
    pub recorded_at: DateTime<Utc>,
}

/// An entry returned from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub entry: FeedbackEntry,
    /// Cosine similarity in [-1, 1]
    pub similarity: f64,
}

/// Append-only feedback log.
///
/// Guarantees:
/// - `append` never overwrites; an existing `record_id` yields
///   `StorageError::DuplicateRecord`.
/// - Concurrent appends from many sessions are safe.
/// - `nearest` returns at most `k` entries ordered by decreasing similarity.
///   Results may be slightly stale relative to in-flight appends.
#[async_trait]
pub trait FeedbackLog: Send + Sync {
    /// Append an entry.
    async fn append(&self, entry: FeedbackEntry) -> StorageResult<()>;

    /// Up to `k` entries whose embedding is closest to `embedding`.
    async fn nearest(&self, embedding: &[f32], k: usize) -> StorageResult<Vec<ScoredEntry>>;

    /// All entries sharing a fingerprint, newest first.
    async fn by_fingerprint(&self, fingerprint: &ContentDigest)
        -> StorageResult<Vec<FeedbackEntry>>;

    /// Number of entries in the log.
    async fn len(&self) -> StorageResult<usize>;

    /// Whether the log holds no entries.
    async fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
