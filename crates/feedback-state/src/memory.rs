//! Process-local feedback log.
//!
//! Entries live in a `RwLock<Vec<_>>`; every append takes the write lock once,
//! so concurrent sessions never interleave a read-modify-write.

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<FeedbackEntry>,
    ids: HashSet<String>,
}

/// In-memory feedback log.
#[derive(Debug, Default)]
pub struct MemoryFeedbackLog {
    state: RwLock<LogState>,
    dimension: Option<usize>,
}

impl MemoryFeedbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject appends whose embedding length differs from `dimension`.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            state: RwLock::default(),
            dimension: Some(dimension),
        }
    }

    fn poisoned() -> StorageError {
        StorageError::Backend("feedback log lock poisoned".to_string())
    }
}

#[async_trait]
impl FeedbackLog for MemoryFeedbackLog {
    async fn append(&self, entry: FeedbackEntry) -> StorageResult<()> {
        if let Some(expected) = self.dimension {
            if entry.embedding.len() != expected {
                return Err(StorageError::DimensionMismatch {
                    expected,
                    actual: entry.embedding.len(),
                });
            }
        }

        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        if !state.ids.insert(entry.record_id.clone()) {
            return Err(StorageError::DuplicateRecord {
                record_id: entry.record_id,
            });
        }
        state.entries.push(entry);
        Ok(())
    }

    async fn nearest(&self, embedding: &[f32], k: usize) -> StorageResult<Vec<ScoredEntry>> {
        if k == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        let mut scored: Vec<ScoredEntry> = state
            .entries
            .iter()
            .filter(|e| e.embedding.len() == embedding.len())
            .map(|e| ScoredEntry {
                similarity: cosine_similarity(&e.embedding, embedding),
                entry: e.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.entry.recorded_at.cmp(&a.entry.recorded_at))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn by_fingerprint(
        &self,
        fingerprint: &ContentDigest,
    ) -> StorageResult<Vec<FeedbackEntry>> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        let mut matches: Vec<FeedbackEntry> = state
            .entries
            .iter()
            .filter(|e| &e.fingerprint == fingerprint)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(matches)
    }

    async fn len(&self) -> StorageResult<usize> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state.entries.len())
    }
}
