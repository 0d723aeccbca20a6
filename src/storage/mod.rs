//! Storage layer for snapshot persistence.
//!
//! The [`SnapshotStore`] trait is the narrow keyed interface the snapshot
//! service depends on; [`SqliteStorage`] is the production implementation.
//! There are no transactions and no locking: writes to the same key are
//! last-write-wins.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::snapshot::ReviewUpdate;

/// A stored snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Deterministic `{analysis_type}_{YYYYMMDD}` key.
    pub snapshot_id: String,
    /// Period type name (weekly, monthly, quarterly, custom).
    pub analysis_type: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub created_at: DateTime<Utc>,
    /// False when the payload failed schema validation and was stored raw.
    pub validated: bool,
    /// Full snapshot JSON (or the raw record when not validated).
    pub payload: serde_json::Value,
    pub reviewed: bool,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// A stored comparison row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub comparison_id: String,
    pub current_snapshot_id: String,
    pub prior_snapshot_id: String,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Keyed storage for snapshots and comparisons.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    // Snapshot operations

    /// Insert or replace a snapshot, leaving any review fields untouched.
    async fn put_snapshot(&self, record: &SnapshotRecord) -> StorageResult<()>;
    /// Get a snapshot by id.
    async fn get_snapshot(&self, snapshot_id: &str) -> StorageResult<Option<SnapshotRecord>>;
    /// Snapshots of one type, most recent `period_start` first.
    async fn list_snapshots(
        &self,
        analysis_type: &str,
        limit: Option<u32>,
    ) -> StorageResult<Vec<SnapshotRecord>>;
    /// Set the review fields of an existing snapshot.
    async fn mark_reviewed(&self, snapshot_id: &str, review: &ReviewUpdate) -> StorageResult<()>;

    // Comparison operations

    /// Insert or replace a comparison.
    async fn put_comparison(&self, record: &ComparisonRecord) -> StorageResult<()>;
    /// Get a comparison by id.
    async fn get_comparison(&self, comparison_id: &str) -> StorageResult<Option<ComparisonRecord>>;
}
