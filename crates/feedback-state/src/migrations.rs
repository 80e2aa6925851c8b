//! SurrealDB schema initialization for the feedback log
//!
//! Safe to call on every connect (idempotent `IF NOT EXISTS` definitions).

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StateError;
use crate::Result;

/// Initialize the feedback tables.
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing codegate feedback schema");
    init_feedback_records_table(db).await?;
    Ok(())
}

/// Initialize `feedback_records`
///
/// Schema:
/// ```text
/// TABLE feedback_records {
///   record_id:    STRING (unique)
///   fingerprint:  STRING (indexed)
///   embedding:    ARRAY<FLOAT>
///   payload:      OBJECT
///   verified:     BOOL
///   score:        FLOAT
///   recorded_at:  DATETIME (indexed)
/// }
/// ```
///
/// Rows are append-only: update and delete are not permitted.
async fn init_feedback_records_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing feedback_records table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS feedback_records
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_record_id ON TABLE feedback_records COLUMNS record_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_fingerprint ON TABLE feedback_records COLUMNS fingerprint;
        DEFINE INDEX IF NOT EXISTS idx_recorded_at ON TABLE feedback_records COLUMNS recorded_at;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?
        .check()
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;

    Ok(())
}
