//! Fakes for exercising degraded-storage paths (testing only)
//!
//! `UnavailableFeedbackLog` fails every call the way an unreachable remote
//! backend would.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// A feedback log whose backend is always unreachable.
#[derive(Debug, Clone)]
pub struct UnavailableFeedbackLog {
    reason: String,
}

impl UnavailableFeedbackLog {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn err(&self) -> StorageError {
        StorageError::Unavailable(self.reason.clone())
    }
}

impl Default for UnavailableFeedbackLog {
    fn default() -> Self {
        Self::new("connection refused")
    }
}

#[async_trait]
impl FeedbackLog for UnavailableFeedbackLog {
    async fn append(&self, _entry: FeedbackEntry) -> StorageResult<()> {
        Err(self.err())
    }

    async fn nearest(&self, _embedding: &[f32], _k: usize) -> StorageResult<Vec<ScoredEntry>> {
        Err(self.err())
    }

    async fn by_fingerprint(
        &self,
        _fingerprint: &ContentDigest,
    ) -> StorageResult<Vec<FeedbackEntry>> {
        Err(self.err())
    }

    async fn len(&self) -> StorageResult<usize> {
        Err(self.err())
    }
}
