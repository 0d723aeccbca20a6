use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{ComparisonRecord, SnapshotRecord, SnapshotStore};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::snapshot::ReviewUpdate;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// In-memory database, private to this instance.
    ///
    /// Pinned to a single connection that is never recycled, since every
    /// new in-memory connection would start from an empty database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SnapshotStore for SqliteStorage {
    async fn put_snapshot(&self, record: &SnapshotRecord) -> StorageResult<()> {
        let payload = serde_json::to_string(&record.payload)?;

        sqlx::query(
            r#"
            INSERT INTO analysis_snapshots
                (snapshot_id, analysis_type, period_start, period_end, created_at, validated, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(snapshot_id) DO UPDATE SET
                analysis_type = excluded.analysis_type,
                period_start = excluded.period_start,
                period_end = excluded.period_end,
                created_at = excluded.created_at,
                validated = excluded.validated,
                payload = excluded.payload
            "#,
        )
        .bind(&record.snapshot_id)
        .bind(&record.analysis_type)
        .bind(record.period_start.to_string())
        .bind(record.period_end.to_string())
        .bind(record.created_at.to_rfc3339())
        .bind(record.validated)
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        debug!(snapshot_id = %record.snapshot_id, validated = record.validated, "Snapshot stored");
        Ok(())
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> StorageResult<Option<SnapshotRecord>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT snapshot_id, analysis_type, period_start, period_end, created_at, validated,
                   payload, reviewed, reviewed_by, reviewed_at, notes
            FROM analysis_snapshots
            WHERE snapshot_id = ?
            "#,
        )
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SnapshotRecord::try_from).transpose()
    }

    async fn list_snapshots(
        &self,
        analysis_type: &str,
        limit: Option<u32>,
    ) -> StorageResult<Vec<SnapshotRecord>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(i64::from).unwrap_or(-1);

        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT snapshot_id, analysis_type, period_start, period_end, created_at, validated,
                   payload, reviewed, reviewed_by, reviewed_at, notes
            FROM analysis_snapshots
            WHERE analysis_type = ?
            ORDER BY period_start DESC, snapshot_id DESC
            LIMIT ?
            "#,
        )
        .bind(analysis_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SnapshotRecord::try_from).collect()
    }

    async fn mark_reviewed(&self, snapshot_id: &str, review: &ReviewUpdate) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_snapshots
            SET reviewed = 1, reviewed_by = ?, reviewed_at = ?, notes = ?
            WHERE snapshot_id = ?
            "#,
        )
        .bind(&review.reviewed_by)
        .bind(review.reviewed_at.to_rfc3339())
        .bind(&review.notes)
        .bind(snapshot_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SnapshotNotFound {
                snapshot_id: snapshot_id.to_string(),
            });
        }

        Ok(())
    }

    async fn put_comparison(&self, record: &ComparisonRecord) -> StorageResult<()> {
        let payload = serde_json::to_string(&record.payload)?;

        sqlx::query(
            r#"
            INSERT INTO snapshot_comparisons
                (comparison_id, current_snapshot_id, prior_snapshot_id, created_at, payload)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(comparison_id) DO UPDATE SET
                created_at = excluded.created_at,
                payload = excluded.payload
            "#,
        )
        .bind(&record.comparison_id)
        .bind(&record.current_snapshot_id)
        .bind(&record.prior_snapshot_id)
        .bind(record.created_at.to_rfc3339())
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_comparison(&self, comparison_id: &str) -> StorageResult<Option<ComparisonRecord>> {
        let row: Option<ComparisonRow> = sqlx::query_as(
            r#"
            SELECT comparison_id, current_snapshot_id, prior_snapshot_id, created_at, payload
            FROM snapshot_comparisons
            WHERE comparison_id = ?
            "#,
        )
        .bind(comparison_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ComparisonRecord::try_from).transpose()
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct SnapshotRow {
    snapshot_id: String,
    analysis_type: String,
    period_start: String,
    period_end: String,
    created_at: String,
    validated: bool,
    payload: String,
    reviewed: bool,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
    notes: Option<String>,
}

impl TryFrom<SnapshotRow> for SnapshotRecord {
    type Error = StorageError;

    fn try_from(row: SnapshotRow) -> StorageResult<Self> {
        Ok(Self {
            period_start: parse_date(&row.period_start, &row.snapshot_id)?,
            period_end: parse_date(&row.period_end, &row.snapshot_id)?,
            created_at: parse_timestamp(&row.created_at),
            validated: row.validated,
            payload: serde_json::from_str(&row.payload)?,
            reviewed: row.reviewed,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at.as_deref().map(parse_timestamp),
            notes: row.notes,
            snapshot_id: row.snapshot_id,
            analysis_type: row.analysis_type,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ComparisonRow {
    comparison_id: String,
    current_snapshot_id: String,
    prior_snapshot_id: String,
    created_at: String,
    payload: String,
}

impl TryFrom<ComparisonRow> for ComparisonRecord {
    type Error = StorageError;

    fn try_from(row: ComparisonRow) -> StorageResult<Self> {
        Ok(Self {
            comparison_id: row.comparison_id,
            current_snapshot_id: row.current_snapshot_id,
            prior_snapshot_id: row.prior_snapshot_id,
            created_at: parse_timestamp(&row.created_at),
            payload: serde_json::from_str(&row.payload)?,
        })
    }
}

fn parse_date(raw: &str, snapshot_id: &str) -> StorageResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| StorageError::Query {
        message: format!("Invalid date {:?} on snapshot {}: {}", raw, snapshot_id, e),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
