//! SurrealDB-backed FeedbackLog implementation
//!
//! Uses `schema::FeedbackRow` for persistence, converting to/from
//! `storage_traits` types at the boundary.

use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::handle::{connect_cloud, connect_url, CloudConfig};
use crate::migrations;
use crate::schema::{FeedbackRow, ScoredRow};
use crate::storage_traits::{
    ContentDigest, FeedbackEntry, FeedbackLog, ScoredEntry, StorageResult,
};

/// SurrealDB-backed implementation of [`FeedbackLog`].
pub struct SurrealFeedbackLog {
    db: Surreal<Any>,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: usize,
}

impl SurrealFeedbackLog {
    /// Create an in-memory instance (tests, single-process use).
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect("mem://").await
    }

    /// Connect to an explicit URL and initialize the schema.
    pub async fn connect(url: &str) -> crate::Result<Self> {
        let db = connect_url(url).await?;
        migrations::init_schema(&db).await?;
        Ok(Self { db })
    }

    /// Open a local surrealkv database under `path`.
    pub async fn open_local(path: &std::path::Path) -> crate::Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::connect(&format!("surrealkv://{}", path.display())).await
    }

    /// Create from environment variables.
    ///
    /// Resolution order: cloud credentials (`SURREALDB_ENDPOINT` + user/pass),
    /// then `SURREALDB_URL`, then local persistence in `.codegate/db`.
    pub async fn from_env() -> crate::Result<Self> {
        if let Ok(config) = CloudConfig::from_env() {
            let db = connect_cloud(&config).await?;
            migrations::init_schema(&db).await?;
            info!("SurrealFeedbackLog connected (cloud)");
            return Ok(Self { db });
        }

        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url).await;
        }

        let path = std::path::Path::new(".codegate/db");
        info!(
            "No cloud config or SURREALDB_URL found, using local persistence: {}",
            path.display()
        );
        Self::open_local(path).await
    }

    fn backend(e: surrealdb::Error) -> StorageError {
        StorageError::Backend(e.to_string())
    }
}

#[async_trait]
impl FeedbackLog for SurrealFeedbackLog {
    async fn append(&self, entry: FeedbackEntry) -> StorageResult<()> {
        let record_id = entry.record_id.clone();
        debug!(record_id = %record_id, "appending feedback record");

        let row = FeedbackRow::from_entry(entry);
        let created: Result<Option<FeedbackRow>, surrealdb::Error> =
            self.db.create("feedback_records").content(row).await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("idx_record_id") => {
                Err(StorageError::DuplicateRecord { record_id })
            }
            Err(e) => Err(Self::backend(e)),
        }
    }

    async fn nearest(&self, embedding: &[f32], k: usize) -> StorageResult<Vec<ScoredEntry>> {
        if k == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }

        let mut res = self
            .db
            .query(
                "SELECT record_id, fingerprint, embedding, payload, verified, score, recorded_at, \
                 vector::similarity::cosine(embedding, $query) AS similarity \
                 FROM feedback_records WHERE array::len(embedding) = $dims \
                 ORDER BY similarity DESC LIMIT $k",
            )
            .bind(("query", embedding.to_vec()))
            .bind(("dims", embedding.len()))
            .bind(("k", k))
            .await
            .map_err(Self::backend)?;

        let rows: Vec<ScoredRow> = res.take(0).map_err(Self::backend)?;
        rows.into_iter().map(ScoredRow::into_scored).collect()
    }

    async fn by_fingerprint(
        &self,
        fingerprint: &ContentDigest,
    ) -> StorageResult<Vec<FeedbackEntry>> {
        let fp = fingerprint.as_str().to_string();
        let mut res = self
            .db
            .query("SELECT * FROM feedback_records WHERE fingerprint = $fp ORDER BY recorded_at DESC")
            .bind(("fp", fp))
            .await
            .map_err(Self::backend)?;

        let rows: Vec<FeedbackRow> = res.take(0).map_err(Self::backend)?;
        rows.into_iter().map(FeedbackRow::into_entry).collect()
    }

    async fn len(&self) -> StorageResult<usize> {
        let mut res = self
            .db
            .query("SELECT count() AS count FROM feedback_records GROUP ALL")
            .await
            .map_err(Self::backend)?;

        let rows: Vec<CountRow> = res.take(0).map_err(Self::backend)?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }
}
