//! Feedback store: durable history of terminal reports, queried for similar
//! prior cases when building correction requests.
//!
//! The store never fails the pipeline. Append failures are logged and
//! swallowed; lookups against an unreachable backend return no cases. Every
//! backend call is bounded by the store timeout, so a stalled backend counts
//! as unreachable.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feedback_state::{
    cosine_similarity, ContentDigest, FeedbackEntry, FeedbackLog, MemoryFeedbackLog,
    StorageError, StorageResult,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::corrector::PriorCase;
use crate::domain::{Report, Requirements, Result};
use crate::embedding::{Embedder, HashingEmbedder};
use crate::obs;

/// One stored verification outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub requirements_fingerprint: ContentDigest,
    pub report: Report,
    /// Embedding of the requirements text; used for retrieval only.
    pub embedding: Vec<f32>,
    pub recorded_at: DateTime<Utc>,
}

impl FeedbackRecord {
    fn into_entry(self) -> Result<FeedbackEntry> {
        Ok(FeedbackEntry {
            record_id: self.report.id.to_string(),
            fingerprint: self.requirements_fingerprint,
            embedding: self.embedding,
            verified: self.report.verified,
            score: self.report.overall_score,
            payload: serde_json::to_value(&self.report)?,
            recorded_at: self.recorded_at,
        })
    }

    fn from_entry(entry: FeedbackEntry) -> Result<Self> {
        Ok(Self {
            report: serde_json::from_value(entry.payload)?,
            requirements_fingerprint: entry.fingerprint,
            embedding: entry.embedding,
            recorded_at: entry.recorded_at,
        })
    }
}

/// A retrieved record with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarCase {
    pub record: FeedbackRecord,
    pub similarity: f64,
    /// The stored requirements fingerprint equals the query's.
    pub exact_match: bool,
}

impl SimilarCase {
    pub fn to_prior_case(&self) -> PriorCase {
        let report = &self.record.report;
        PriorCase {
            report_id: report.id,
            similarity: self.similarity,
            exact_match: self.exact_match,
            verified: report.verified,
            overall_score: report.overall_score,
            code: report.request.code.clone(),
            findings: report.failure_findings(),
        }
    }
}

/// Upper bound on a single backend call.
pub const DEFAULT_FEEDBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared, concurrency-safe feedback store over a [`FeedbackLog`] backend.
pub struct FeedbackStore {
    log: Arc<dyn FeedbackLog>,
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl FeedbackStore {
    pub fn new(log: Arc<dyn FeedbackLog>) -> Self {
        Self {
            log,
            embedder: Arc::new(HashingEmbedder::default()),
            timeout: DEFAULT_FEEDBACK_TIMEOUT,
        }
    }

    /// Process-local store, lost on exit.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryFeedbackLog::new()))
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn log(&self) -> &Arc<dyn FeedbackLog> {
        &self.log
    }

    async fn bounded<T>(&self, call: impl Future<Output = StorageResult<T>>) -> StorageResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(StorageError::Unavailable(format!(
                    "no response within {:?}",
                    self.timeout
                )))
            })
    }

    /// Append a record for `report`, propagating storage errors.
    pub async fn try_record(&self, report: &Report) -> Result<()> {
        let requirements = &report.request.requirements;
        let record = FeedbackRecord {
            requirements_fingerprint: requirements.fingerprint(),
            embedding: self.embedder.embed(&requirements.retrieval_text()),
            report: report.clone(),
            recorded_at: Utc::now(),
        };
        let fingerprint = record.requirements_fingerprint.short().to_string();
        self.bounded(self.log.append(record.into_entry()?)).await?;
        debug!(report_id = %report.id, fingerprint = %fingerprint, "feedback recorded");
        Ok(())
    }

    /// Append a record for `report`. Failures are logged and swallowed.
    pub async fn record(&self, report: &Report) {
        if let Err(e) = self.try_record(report).await {
            obs::emit_feedback_record_failed(report.id, &e);
        }
    }

    /// Up to `k` prior records for similar requirements.
    ///
    /// Records with the exact same requirements fingerprint come first
    /// (newest first), followed by nearest neighbours by decreasing cosine
    /// similarity. Never errors: an unreachable or empty store yields an
    /// empty list.
    pub async fn similar_cases(&self, requirements: &Requirements, k: usize) -> Vec<SimilarCase> {
        if k == 0 {
            return Vec::new();
        }

        let fingerprint = requirements.fingerprint();
        let query = self.embedder.embed(&requirements.retrieval_text());

        let exact = match self.bounded(self.log.by_fingerprint(&fingerprint)).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "feedback lookup by fingerprint failed");
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        let mut cases = Vec::with_capacity(k);

        for entry in exact.into_iter().take(k) {
            seen.insert(entry.record_id.clone());
            let similarity = cosine_similarity(&query, &entry.embedding);
            match FeedbackRecord::from_entry(entry) {
                Ok(record) => cases.push(SimilarCase {
                    record,
                    similarity,
                    exact_match: true,
                }),
                Err(e) => debug!(error = %e, "skipping undecodable feedback record"),
            }
        }

        if cases.len() < k {
            let nearest = match self.bounded(self.log.nearest(&query, k + seen.len())).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(error = %e, "feedback nearest-neighbour lookup failed");
                    Vec::new()
                }
            };

            for hit in nearest {
                if cases.len() >= k {
                    break;
                }
                if !seen.insert(hit.entry.record_id.clone()) {
                    continue;
                }
                let exact_match = hit.entry.fingerprint == fingerprint;
                match FeedbackRecord::from_entry(hit.entry) {
                    Ok(record) => cases.push(SimilarCase {
                        record,
                        similarity: hit.similarity,
                        exact_match,
                    }),
                    Err(e) => debug!(error = %e, "skipping undecodable feedback record"),
                }
            }
        }

        cases
    }

    pub async fn len(&self) -> usize {
        self.bounded(self.log.len()).await.unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
