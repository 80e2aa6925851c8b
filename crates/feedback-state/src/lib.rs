//! Feedback-State: persistence for codegate verification history
//!
//! This crate provides the storage layer behind the feedback store: an
//! append-only log of verification outcomes that can be searched by vector
//! similarity to give the correction loop prior precedent.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: append-only integrity, concurrent appends, nearest-neighbour lookup.
//!
//! ## Key Components
//!
//! - `FeedbackLog`: backend-agnostic storage trait
//! - `MemoryFeedbackLog`: process-local implementation
//! - `SurrealFeedbackLog`: SurrealDB implementation (in-memory, file, or cloud)

mod error;
pub mod fakes;
mod handle;
pub mod memory;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_log;

pub use error::{StateError, StorageError};
pub use handle::CloudConfig;
pub use memory::MemoryFeedbackLog;
pub use storage_traits::{
    cosine_similarity, ContentDigest, FeedbackEntry, FeedbackLog, ScoredEntry, StorageResult,
};
pub use surreal_log::SurrealFeedbackLog;

/// Result type for feedback-state setup operations
pub type Result<T> = std::result::Result<T, StateError>;
