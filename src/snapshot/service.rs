use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::comparator::compute_comparison;
use super::extract::{extract_aggregates, DataCompleteness};
use super::period::{derive_period, generate_snapshot_id, parse_snapshot_date, DerivedPeriod};
use super::types::{AnalysisType, Comparison, HistoricalContext, ReviewUpdate, Snapshot};
use crate::error::{AppError, AppResult, StorageResult};
use crate::storage::{ComparisonRecord, SnapshotRecord, SnapshotStore};

/// Result of assembling a snapshot without persisting it.
#[derive(Debug, Clone)]
pub struct BuiltSnapshot {
    pub snapshot: Snapshot,
    pub period: DerivedPeriod,
    pub completeness: DataCompleteness,
    /// Why schema validation failed, if it did.
    pub validation_error: Option<String>,
}

impl BuiltSnapshot {
    pub fn is_valid(&self) -> bool {
        self.validation_error.is_none()
    }
}

/// Owns snapshot identity, extraction, validation and comparison.
///
/// All methods are async and never block the executor; see
/// [`BlockingSnapshotService`] for callers without a runtime.
#[derive(Clone)]
pub struct SnapshotService {
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotService {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Derive the period, extract aggregates and validate. No store access.
    pub fn build_snapshot(&self, output: &Value, analysis_type: AnalysisType) -> BuiltSnapshot {
        let period = derive_period(output, Utc::now().date_naive());
        let extracted = extract_aggregates(output);

        let mut snapshot = Snapshot::unchecked(analysis_type, period.start, period.end);
        snapshot.total_conversations = extracted.total_conversations;
        snapshot.topic_volumes = extracted.topic_volumes;
        snapshot.topic_sentiments = extracted.topic_sentiments;
        snapshot.tier_distribution = extracted.tier_distribution;
        snapshot.agent_attribution = extracted.agent_attribution;
        snapshot.resolution_metrics = extracted.resolution_metrics;
        snapshot.fin_performance = extracted.fin_performance;
        snapshot.key_patterns = extracted.key_patterns;

        let validation_error = snapshot.validate().err().map(|e| e.to_string());

        BuiltSnapshot {
            snapshot,
            period,
            completeness: extracted.completeness,
            validation_error,
        }
    }

    /// Persist a snapshot of `output` and return its id.
    ///
    /// Saving the same period twice overwrites. Records that fail validation
    /// are stored unvalidated, and the id is returned even if the write fails.
    pub async fn save_snapshot(&self, output: &Value, analysis_type: AnalysisType) -> String {
        let built = self.build_snapshot(output, analysis_type);
        if let Err(e) = self.store_built(&built, output).await {
            error!(snapshot_id = %built.snapshot.snapshot_id, error = %e, "Failed to store snapshot");
        }
        built.snapshot.snapshot_id
    }

    /// Like [`save_snapshot`](Self::save_snapshot) but reports store failures.
    pub async fn try_save_snapshot(
        &self,
        output: &Value,
        analysis_type: AnalysisType,
    ) -> StorageResult<String> {
        let built = self.build_snapshot(output, analysis_type);
        self.store_built(&built, output).await?;
        Ok(built.snapshot.snapshot_id)
    }

    async fn store_built(&self, built: &BuiltSnapshot, output: &Value) -> StorageResult<()> {
        let snapshot_id = &built.snapshot.snapshot_id;

        if let Some(reason) = &built.validation_error {
            warn!(
                snapshot_id = %snapshot_id,
                reason = %reason,
                "Snapshot failed validation, storing unvalidated record"
            );
        }
        for issue in built.completeness.issues() {
            debug!(snapshot_id = %snapshot_id, issue = %issue, "Snapshot field degraded");
        }

        let payload = serde_json::to_value(&built.snapshot).unwrap_or_else(|e| {
            warn!(snapshot_id = %snapshot_id, error = %e, "Snapshot serialization failed, storing raw output");
            output.clone()
        });
        let record = SnapshotRecord {
            snapshot_id: snapshot_id.clone(),
            analysis_type: built.snapshot.analysis_type.as_str().to_string(),
            period_start: built.snapshot.period_start,
            period_end: built.snapshot.period_end,
            created_at: built.snapshot.created_at,
            validated: built.is_valid(),
            payload,
            reviewed: false,
            reviewed_by: None,
            reviewed_at: None,
            notes: None,
        };

        self.store.put_snapshot(&record).await?;
        info!(
            snapshot_id = %snapshot_id,
            validated = record.validated,
            topics = built.snapshot.topic_volumes.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// Get a snapshot by id.
    pub async fn get_snapshot(&self, snapshot_id: &str) -> StorageResult<Option<Snapshot>> {
        let record = self.store.get_snapshot(snapshot_id).await?;
        Ok(record.map(snapshot_from_record))
    }

    /// Snapshots of one type, most recent period first.
    pub async fn list_snapshots(
        &self,
        analysis_type: AnalysisType,
        limit: Option<u32>,
    ) -> StorageResult<Vec<Snapshot>> {
        let records = self.store.list_snapshots(analysis_type.as_str(), limit).await?;
        Ok(records.into_iter().map(snapshot_from_record).collect())
    }

    /// The snapshot exactly one period offset before `current_snapshot_id`.
    ///
    /// Returns `None` when that exact period was never saved, even if an
    /// earlier snapshot exists.
    pub async fn get_prior_snapshot(
        &self,
        current_snapshot_id: &str,
        analysis_type: AnalysisType,
    ) -> Option<Snapshot> {
        let current_date = parse_snapshot_date(current_snapshot_id)?;
        let prior_date = current_date - chrono::Duration::days(analysis_type.prior_offset_days());
        let prior_id = generate_snapshot_id(prior_date, analysis_type);

        match self.get_snapshot(&prior_id).await {
            Ok(found) => {
                if found.is_none() {
                    debug!(current = %current_snapshot_id, prior = %prior_id, "No prior snapshot at offset");
                }
                found
            }
            Err(e) => {
                warn!(prior = %prior_id, error = %e, "Prior snapshot lookup failed");
                None
            }
        }
    }

    /// The most recent snapshot of the same type starting before the current one.
    pub async fn find_latest_prior_snapshot(
        &self,
        current_snapshot_id: &str,
        analysis_type: AnalysisType,
    ) -> Option<Snapshot> {
        let current_date = parse_snapshot_date(current_snapshot_id)?;
        match self.list_snapshots(analysis_type, None).await {
            Ok(snapshots) => snapshots
                .into_iter()
                .find(|s| s.period_start < current_date),
            Err(e) => {
                warn!(current = %current_snapshot_id, error = %e, "Snapshot listing failed");
                None
            }
        }
    }

    /// Compare two snapshots and persist the result.
    ///
    /// Never fails: derivation errors yield an empty comparison with an
    /// error id, and the comparison is returned whether or not it was stored.
    pub async fn calculate_comparison(&self, current: &Snapshot, prior: &Snapshot) -> Comparison {
        let comparison = match compute_comparison(current, prior) {
            Ok(comparison) => comparison,
            Err(e) => {
                warn!(
                    current = %current.snapshot_id,
                    prior = %prior.snapshot_id,
                    error = %e,
                    "Comparison failed, returning empty comparison"
                );
                Comparison::failed(&current.snapshot_id, &prior.snapshot_id, e.to_string())
            }
        };

        if let Err(e) = self.store_comparison(&comparison).await {
            warn!(comparison_id = %comparison.comparison_id, error = %e, "Failed to store comparison");
        }

        comparison
    }

    async fn store_comparison(&self, comparison: &Comparison) -> StorageResult<()> {
        let record = ComparisonRecord {
            comparison_id: comparison.comparison_id.clone(),
            current_snapshot_id: comparison.current_snapshot_id.clone(),
            prior_snapshot_id: comparison.prior_snapshot_id.clone(),
            created_at: comparison.created_at,
            payload: serde_json::to_value(comparison)?,
        };
        self.store.put_comparison(&record).await
    }

    /// Get a stored comparison by id.
    pub async fn get_comparison(&self, comparison_id: &str) -> StorageResult<Option<Comparison>> {
        let Some(record) = self.store.get_comparison(comparison_id).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(record.payload)?))
    }

    /// How much weekly history exists.
    pub async fn get_historical_context(&self) -> HistoricalContext {
        let starts: Vec<NaiveDate> = match self
            .store
            .list_snapshots(AnalysisType::Weekly.as_str(), None)
            .await
        {
            Ok(records) => records.into_iter().map(|r| r.period_start).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to list weekly snapshots");
                Vec::new()
            }
        };
        HistoricalContext::from_period_starts(starts)
    }

    /// Mark a snapshot as reviewed.
    pub async fn review_snapshot(
        &self,
        snapshot_id: &str,
        reviewer: &str,
        notes: Option<String>,
    ) -> StorageResult<ReviewUpdate> {
        let review = ReviewUpdate {
            reviewed_by: reviewer.to_string(),
            reviewed_at: Utc::now(),
            notes,
        };
        self.store.mark_reviewed(snapshot_id, &review).await?;
        info!(snapshot_id = %snapshot_id, reviewer = %reviewer, "Snapshot reviewed");
        Ok(review)
    }
}

/// Read a stored record back as a snapshot, tolerating unvalidated payloads.
///
/// Review columns on the record always win over the payload.
fn snapshot_from_record(record: SnapshotRecord) -> Snapshot {
    let mut snapshot = match serde_json::from_value::<Snapshot>(record.payload.clone()) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            debug!(snapshot_id = %record.snapshot_id, error = %e, "Rebuilding snapshot from raw record");
            let analysis_type = record.analysis_type.parse().unwrap_or_default();
            let extracted = extract_aggregates(&record.payload);
            let mut snapshot = Snapshot::unchecked(analysis_type, record.period_start, record.period_end);
            snapshot.total_conversations = extracted.total_conversations;
            snapshot.topic_volumes = extracted.topic_volumes;
            snapshot.topic_sentiments = extracted.topic_sentiments;
            snapshot.tier_distribution = extracted.tier_distribution;
            snapshot.agent_attribution = extracted.agent_attribution;
            snapshot.resolution_metrics = extracted.resolution_metrics;
            snapshot.fin_performance = extracted.fin_performance;
            snapshot.key_patterns = extracted.key_patterns;
            snapshot.created_at = record.created_at;
            snapshot
        }
    };
    snapshot.snapshot_id = record.snapshot_id;
    snapshot.reviewed = record.reviewed;
    snapshot.reviewed_by = record.reviewed_by;
    snapshot.reviewed_at = record.reviewed_at;
    snapshot.notes = record.notes;
    snapshot
}

/// Synchronous facade over [`SnapshotService`] for callers outside a runtime.
///
/// Must not be used from within an async context.
pub struct BlockingSnapshotService {
    runtime: tokio::runtime::Runtime,
    inner: SnapshotService,
}

impl BlockingSnapshotService {
    pub fn new(inner: SnapshotService) -> AppResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to build snapshot runtime: {}", e),
            })?;
        Ok(Self { runtime, inner })
    }

    pub fn save_snapshot(&self, output: &Value, analysis_type: AnalysisType) -> String {
        self.runtime
            .block_on(self.inner.save_snapshot(output, analysis_type))
    }

    pub fn get_snapshot(&self, snapshot_id: &str) -> StorageResult<Option<Snapshot>> {
        self.runtime.block_on(self.inner.get_snapshot(snapshot_id))
    }

    pub fn get_prior_snapshot(
        &self,
        current_snapshot_id: &str,
        analysis_type: AnalysisType,
    ) -> Option<Snapshot> {
        self.runtime
            .block_on(self.inner.get_prior_snapshot(current_snapshot_id, analysis_type))
    }

    pub fn calculate_comparison(&self, current: &Snapshot, prior: &Snapshot) -> Comparison {
        self.runtime
            .block_on(self.inner.calculate_comparison(current, prior))
    }

    pub fn get_historical_context(&self) -> HistoricalContext {
        self.runtime.block_on(self.inner.get_historical_context())
    }

    pub fn review_snapshot(
        &self,
        snapshot_id: &str,
        reviewer: &str,
        notes: Option<String>,
    ) -> StorageResult<ReviewUpdate> {
        self.runtime
            .block_on(self.inner.review_snapshot(snapshot_id, reviewer, notes))
    }

    /// The async service this wraps.
    pub fn inner(&self) -> &SnapshotService {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::MockSnapshotStore;
    use serde_json::json;

    fn weekly_output() -> Value {
        json!({
            "week_id": "2024_W23",
            "total_conversations": 30,
            "topic_volumes": {"Billing": 20, "API": 5},
            "topic_sentiments": {"Billing": {"positive": 0.3, "negative": 0.5}},
            "tier_distribution": {"free": 10, "pro": 20}
        })
    }

    #[tokio::test]
    async fn test_save_returns_id_when_store_fails() {
        let mut store = MockSnapshotStore::new();
        store.expect_put_snapshot().times(1).returning(|_| {
            Err(StorageError::Connection {
                message: "disk gone".to_string(),
            })
        });
        let service = SnapshotService::new(Arc::new(store));

        let id = service.save_snapshot(&weekly_output(), AnalysisType::Weekly).await;
        assert_eq!(id, "weekly_20240603");
    }

    #[tokio::test]
    async fn test_try_save_reports_store_failure() {
        let mut store = MockSnapshotStore::new();
        store.expect_put_snapshot().times(1).returning(|_| {
            Err(StorageError::Query {
                message: "readonly".to_string(),
            })
        });
        let service = SnapshotService::new(Arc::new(store));

        let result = service.try_save_snapshot(&weekly_output(), AnalysisType::Weekly).await;
        assert!(matches!(result, Err(StorageError::Query { .. })));
    }

    #[tokio::test]
    async fn test_invalid_snapshot_is_stored_unvalidated() {
        let mut store = MockSnapshotStore::new();
        store
            .expect_put_snapshot()
            .withf(|record| !record.validated && record.snapshot_id == "weekly_20240603")
            .times(1)
            .returning(|_| Ok(()));
        let service = SnapshotService::new(Arc::new(store));

        let mut output = weekly_output();
        output["topic_sentiments"]["Billing"]["positive"] = json!(3.5);
        let id = service.save_snapshot(&output, AnalysisType::Weekly).await;
        assert_eq!(id, "weekly_20240603");
    }

    #[tokio::test]
    async fn test_prior_lookup_uses_fixed_offset() {
        let mut store = MockSnapshotStore::new();
        store
            .expect_get_snapshot()
            .withf(|id| id == "monthly_20240503")
            .times(1)
            .returning(|_| Ok(None));
        let service = SnapshotService::new(Arc::new(store));

        let prior = service
            .get_prior_snapshot("monthly_20240602", AnalysisType::Monthly)
            .await;
        assert!(prior.is_none());
    }

    #[tokio::test]
    async fn test_prior_lookup_with_unparseable_id_skips_store() {
        let store = MockSnapshotStore::new();
        let service = SnapshotService::new(Arc::new(store));
        assert!(service
            .get_prior_snapshot("weekly_latest", AnalysisType::Weekly)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_comparison_returned_when_persist_fails() {
        let mut store = MockSnapshotStore::new();
        store.expect_put_comparison().times(1).returning(|_| {
            Err(StorageError::Query {
                message: "locked".to_string(),
            })
        });
        let service = SnapshotService::new(Arc::new(store));

        let start = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let current = Snapshot::new(AnalysisType::Weekly, start, start)
            .unwrap()
            .with_topic_volumes([("Billing", 20)]);
        let prior_start = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let prior = Snapshot::new(AnalysisType::Weekly, prior_start, prior_start)
            .unwrap()
            .with_topic_volumes([("Billing", 10)]);

        let comparison = service.calculate_comparison(&current, &prior).await;
        assert_eq!(comparison.volume_changes["Billing"].change, 10);
        assert!(!comparison.is_error());
    }

    #[tokio::test]
    async fn test_comparison_failure_degrades_to_error_shape() {
        let mut store = MockSnapshotStore::new();
        store.expect_put_comparison().returning(|_| Ok(()));
        let service = SnapshotService::new(Arc::new(store));

        let start = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let current = Snapshot::new(AnalysisType::Weekly, start, start)
            .unwrap()
            .with_topic_volumes([("Huge", u64::MAX)]);
        let prior = Snapshot::new(AnalysisType::Weekly, start - chrono::Duration::days(7), start)
            .unwrap();

        let comparison = service.calculate_comparison(&current, &prior).await;
        assert!(comparison.is_error());
        assert!(comparison.comparison_id.starts_with("comp_error_"));
        assert!(comparison.volume_changes.is_empty());
        assert!(comparison.significant_changes.is_empty());
    }

    #[tokio::test]
    async fn test_historical_context_degrades_on_store_error() {
        let mut store = MockSnapshotStore::new();
        store.expect_list_snapshots().returning(|_, _| {
            Err(StorageError::Query {
                message: "boom".to_string(),
            })
        });
        let service = SnapshotService::new(Arc::new(store));

        let context = service.get_historical_context().await;
        assert_eq!(context.weeks_available, 0);
        assert!(!context.has_baseline);
    }

    #[test]
    fn test_snapshot_from_raw_record() {
        let start = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let record = SnapshotRecord {
            snapshot_id: "weekly_20240603".to_string(),
            analysis_type: "weekly".to_string(),
            period_start: start,
            period_end: start,
            created_at: Utc::now(),
            validated: false,
            payload: json!({"topic_volumes": {"Billing": 4}, "created_at": "not a date"}),
            reviewed: true,
            reviewed_by: Some("sam".to_string()),
            reviewed_at: None,
            notes: None,
        };
        let snapshot = snapshot_from_record(record);
        assert_eq!(snapshot.topic_volumes["Billing"], 4);
        assert!(snapshot.reviewed);
        assert_eq!(snapshot.reviewed_by.as_deref(), Some("sam"));
    }

    #[test]
    fn test_blocking_service_saves_outside_runtime() {
        let mut store = MockSnapshotStore::new();
        store.expect_put_snapshot().times(1).returning(|_| Ok(()));
        let blocking = BlockingSnapshotService::new(SnapshotService::new(Arc::new(store))).unwrap();

        let id = blocking.save_snapshot(&weekly_output(), AnalysisType::Weekly);
        assert_eq!(id, "weekly_20240603");
    }
}
