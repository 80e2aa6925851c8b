//! Database row types for the SurrealDB backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{ContentDigest, FeedbackEntry, ScoredEntry};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Row in the `feedback_records` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRow {
    /// SurrealDB record ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    /// Unique entry id
    pub record_id: String,
    /// Requirements fingerprint (hex SHA-256)
    pub fingerprint: String,
    /// Retrieval vector
    pub embedding: Vec<f32>,
    /// Opaque domain payload
    pub payload: serde_json::Value,
    pub verified: bool,
    pub score: f64,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

/// Row returned by the nearest-neighbour query
#[derive(Debug, Clone, Deserialize)]
pub struct ScoredRow {
    pub record_id: String,
    pub fingerprint: String,
    pub embedding: Vec<f32>,
    pub payload: serde_json::Value,
    pub verified: bool,
    pub score: f64,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
    pub similarity: f64,
}

impl FeedbackRow {
    pub fn from_entry(entry: FeedbackEntry) -> Self {
        Self {
            id: None,
            record_id: entry.record_id,
            fingerprint: entry.fingerprint.as_str().to_string(),
            embedding: entry.embedding,
            payload: entry.payload,
            verified: entry.verified,
            score: entry.score,
            recorded_at: entry.recorded_at,
        }
    }

    pub fn into_entry(self) -> Result<FeedbackEntry, StorageError> {
        Ok(FeedbackEntry {
            record_id: self.record_id,
            fingerprint: ContentDigest::try_from(self.fingerprint)?,
            embedding: self.embedding,
            payload: self.payload,
            verified: self.verified,
            score: self.score,
            recorded_at: self.recorded_at,
        })
    }
}

impl ScoredRow {
    pub fn into_scored(self) -> Result<ScoredEntry, StorageError> {
        Ok(ScoredEntry {
            similarity: self.similarity,
            entry: FeedbackEntry {
                record_id: self.record_id,
                fingerprint: ContentDigest::try_from(self.fingerprint)?,
                embedding: self.embedding,
                payload: self.payload,
                verified: self.verified,
                score: self.score,
                recorded_at: self.recorded_at,
            },
        })
    }
}
