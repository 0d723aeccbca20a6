use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::period::generate_snapshot_id;
use crate::error::{SnapshotError, SnapshotResult};

/// Length of the period a snapshot aggregates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    /// Seven-day period, compared week over week.
    #[default]
    Weekly,
    /// Thirty-day period.
    Monthly,
    /// Ninety-day period.
    Quarterly,
    /// Ad-hoc period; compared against the snapshot seven days earlier.
    Custom,
}

impl AnalysisType {
    /// Get the type name as used in snapshot ids
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Weekly => "weekly",
            AnalysisType::Monthly => "monthly",
            AnalysisType::Quarterly => "quarterly",
            AnalysisType::Custom => "custom",
        }
    }

    /// Days between a snapshot and the prior one it is compared against.
    pub fn prior_offset_days(&self) -> i64 {
        match self {
            AnalysisType::Weekly => 7,
            AnalysisType::Monthly => 30,
            AnalysisType::Quarterly => 90,
            AnalysisType::Custom => 7,
        }
    }
}

impl std::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnalysisType {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weekly" => Ok(AnalysisType::Weekly),
            "monthly" => Ok(AnalysisType::Monthly),
            "quarterly" => Ok(AnalysisType::Quarterly),
            "custom" => Ok(AnalysisType::Custom),
            _ => Err(SnapshotError::UnknownAnalysisType {
                value: s.to_string(),
            }),
        }
    }
}

/// Share of positive and negative conversations for one topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TopicSentiment {
    /// Fraction of conversations with positive sentiment (0.0-1.0).
    pub positive: f64,
    /// Fraction of conversations with negative sentiment (0.0-1.0).
    pub negative: f64,
}

/// Resolution quality for the period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResolutionMetrics {
    /// First-contact resolution rate (0.0-1.0).
    pub fcr_rate: f64,
    /// Median hours from open to close.
    pub median_resolution_hours: f64,
    /// Fraction of closed conversations that were reopened (0.0-1.0).
    pub reopen_rate: f64,
}

/// A point-in-time aggregate of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Snapshot {
    /// `{analysis_type}_{YYYYMMDD}` of `period_start`.
    pub snapshot_id: String,
    pub analysis_type: AnalysisType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub total_conversations: u64,
    #[serde(default)]
    pub topic_volumes: BTreeMap<String, u64>,
    #[serde(default)]
    pub topic_sentiments: BTreeMap<String, TopicSentiment>,
    #[serde(default)]
    pub tier_distribution: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_attribution: Option<BTreeMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_metrics: Option<ResolutionMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fin_performance: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub reviewed: bool,
    #[serde(default)]
    pub reviewed_by: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Snapshot {
    /// Create an empty snapshot for a period.
    ///
    /// Fails when `period_end` precedes `period_start`.
    pub fn new(
        analysis_type: AnalysisType,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> SnapshotResult<Self> {
        if period_end < period_start {
            return Err(SnapshotError::Validation {
                field: "period_end".to_string(),
                reason: format!("{} is before period_start {}", period_end, period_start),
            });
        }
        Ok(Self::unchecked(analysis_type, period_start, period_end))
    }

    /// Same as [`Snapshot::new`] without the period check; used when reading
    /// back records that were stored unvalidated.
    pub(crate) fn unchecked(
        analysis_type: AnalysisType,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Self {
        Self {
            snapshot_id: generate_snapshot_id(period_start, analysis_type),
            analysis_type,
            period_start,
            period_end,
            created_at: Utc::now(),
            total_conversations: 0,
            topic_volumes: BTreeMap::new(),
            topic_sentiments: BTreeMap::new(),
            tier_distribution: BTreeMap::new(),
            agent_attribution: None,
            resolution_metrics: None,
            fin_performance: None,
            key_patterns: None,
            reviewed: false,
            reviewed_by: None,
            reviewed_at: None,
            notes: None,
        }
    }

    /// Set topic volumes
    pub fn with_topic_volumes<I, S>(mut self, volumes: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        self.topic_volumes = volumes.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let volume_sum = self
            .topic_volumes
            .values()
            .fold(0u64, |acc, v| acc.saturating_add(*v));
        self.total_conversations = self.total_conversations.max(volume_sum);
        self
    }

    /// Set a topic's sentiment split
    pub fn with_sentiment(mut self, topic: impl Into<String>, positive: f64, negative: f64) -> Self {
        self.topic_sentiments
            .insert(topic.into(), TopicSentiment { positive, negative });
        self
    }

    /// Set resolution metrics
    pub fn with_resolution(mut self, metrics: ResolutionMetrics) -> Self {
        self.resolution_metrics = Some(metrics);
        self
    }

    /// Check the schema invariants that serde alone cannot express.
    pub fn validate(&self) -> SnapshotResult<()> {
        let expected_id = generate_snapshot_id(self.period_start, self.analysis_type);
        if self.snapshot_id != expected_id {
            return Err(SnapshotError::Validation {
                field: "snapshot_id".to_string(),
                reason: format!("expected {}, got {}", expected_id, self.snapshot_id),
            });
        }

        if self.period_end < self.period_start {
            return Err(SnapshotError::Validation {
                field: "period_end".to_string(),
                reason: format!(
                    "{} is before period_start {}",
                    self.period_end, self.period_start
                ),
            });
        }

        for (topic, sentiment) in &self.topic_sentiments {
            for (field, value) in [("positive", sentiment.positive), ("negative", sentiment.negative)] {
                if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                    return Err(SnapshotError::Validation {
                        field: format!("topic_sentiments.{}.{}", topic, field),
                        reason: format!("{} is outside 0.0-1.0", value),
                    });
                }
            }
        }

        if let Some(metrics) = &self.resolution_metrics {
            for (field, value) in [("fcr_rate", metrics.fcr_rate), ("reopen_rate", metrics.reopen_rate)] {
                if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                    return Err(SnapshotError::Validation {
                        field: format!("resolution_metrics.{}", field),
                        reason: format!("{} is outside 0.0-1.0", value),
                    });
                }
            }
            if !metrics.median_resolution_hours.is_finite() || metrics.median_resolution_hours < 0.0 {
                return Err(SnapshotError::Validation {
                    field: "resolution_metrics.median_resolution_hours".to_string(),
                    reason: format!("{} is not a valid duration", metrics.median_resolution_hours),
                });
            }
        }

        Ok(())
    }
}

/// Review fields set by [`SnapshotService::review_snapshot`](super::SnapshotService::review_snapshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewUpdate {
    pub reviewed_by: String,
    pub reviewed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Volume movement of one topic between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VolumeChange {
    pub current: u64,
    pub prior: u64,
    pub change: i64,
    /// Relative change; 0.0 when the prior volume is zero.
    pub pct: f64,
}

/// Direction of a topic's sentiment between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SentimentShift {
    #[serde(rename = "more positive")]
    MorePositive,
    #[serde(rename = "more negative")]
    MoreNegative,
    #[serde(rename = "stable")]
    Stable,
}

/// Sentiment movement of one topic present in both snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SentimentChange {
    pub positive_delta: f64,
    pub negative_delta: f64,
    pub shift: SentimentShift,
}

/// Overall reading of a set of directional signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrendInterpretation {
    Improving,
    Declining,
    Stable,
}

/// Resolution movement between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResolutionChanges {
    /// Percentage points.
    pub fcr_rate_delta: f64,
    /// Hours; negative means faster resolution.
    pub resolution_time_delta: f64,
    /// Percentage points.
    pub reopen_rate_delta: f64,
    pub interpretation: TrendInterpretation,
}

/// Whether a topic grew or shrank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDirection {
    Increase,
    Decrease,
}

/// A volume change large enough to call out in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SignificantChange {
    pub topic: String,
    pub current: u64,
    pub prior: u64,
    pub change: i64,
    pub pct: f64,
    pub direction: ChangeDirection,
    /// Glyph for report rendering.
    pub alert: String,
}

/// A topic that appeared or disappeared between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PatternChange {
    pub topic: String,
    /// Current volume for emerging topics, prior volume for declining ones.
    pub volume: u64,
}

/// Derived delta structure between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Comparison {
    /// `comp_{current}_{prior}`, or `comp_error_{timestamp}` when derivation failed.
    pub comparison_id: String,
    pub current_snapshot_id: String,
    pub prior_snapshot_id: String,
    pub created_at: DateTime<Utc>,
    pub volume_changes: BTreeMap<String, VolumeChange>,
    pub sentiment_changes: BTreeMap<String, SentimentChange>,
    pub resolution_changes: Option<ResolutionChanges>,
    pub significant_changes: Vec<SignificantChange>,
    pub emerging_patterns: Vec<PatternChange>,
    pub declining_patterns: Vec<PatternChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Comparison {
    /// Build the deterministic comparison id.
    pub fn id_for(current_snapshot_id: &str, prior_snapshot_id: &str) -> String {
        format!("comp_{}_{}", current_snapshot_id, prior_snapshot_id)
    }

    /// Empty comparison carrying a synthesized error id.
    pub fn failed(current_snapshot_id: &str, prior_snapshot_id: &str, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            comparison_id: format!("comp_error_{}", now.format("%Y%m%d%H%M%S")),
            current_snapshot_id: current_snapshot_id.to_string(),
            prior_snapshot_id: prior_snapshot_id.to_string(),
            created_at: now,
            volume_changes: BTreeMap::new(),
            sentiment_changes: BTreeMap::new(),
            resolution_changes: None,
            significant_changes: Vec::new(),
            emerging_patterns: Vec::new(),
            declining_patterns: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// How much history is available for trend work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalContext {
    pub has_baseline: bool,
    pub weeks_available: usize,
    pub can_do_trends: bool,
    pub can_do_seasonality: bool,
    pub baseline_date: Option<NaiveDate>,
}

/// Minimum weekly snapshots for a baseline and trend lines.
pub const BASELINE_MIN_WEEKS: usize = 4;
/// Minimum weekly snapshots for seasonality.
pub const SEASONALITY_MIN_WEEKS: usize = 12;

impl HistoricalContext {
    /// Derive the context from weekly period starts in any order.
    pub fn from_period_starts(mut starts: Vec<NaiveDate>) -> Self {
        starts.sort();
        let weeks_available = starts.len();
        Self {
            has_baseline: weeks_available >= BASELINE_MIN_WEEKS,
            weeks_available,
            can_do_trends: weeks_available >= BASELINE_MIN_WEEKS,
            can_do_seasonality: weeks_available >= SEASONALITY_MIN_WEEKS,
            baseline_date: starts.first().copied(),
        }
    }
}

/// JSON schema for [`Snapshot`], for external documentation consumers.
pub fn snapshot_json_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(Snapshot)
}

/// JSON schema for [`Comparison`].
pub fn comparison_json_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(Comparison)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_analysis_type_round_trip_names() {
        for t in [
            AnalysisType::Weekly,
            AnalysisType::Monthly,
            AnalysisType::Quarterly,
            AnalysisType::Custom,
        ] {
            assert_eq!(AnalysisType::from_str(t.as_str()).unwrap(), t);
        }
        assert!(AnalysisType::from_str("daily").is_err());
    }

    #[test]
    fn test_prior_offsets() {
        assert_eq!(AnalysisType::Weekly.prior_offset_days(), 7);
        assert_eq!(AnalysisType::Monthly.prior_offset_days(), 30);
        assert_eq!(AnalysisType::Quarterly.prior_offset_days(), 90);
        assert_eq!(AnalysisType::Custom.prior_offset_days(), 7);
    }

    #[test]
    fn test_snapshot_new_rejects_inverted_period() {
        let err = Snapshot::new(AnalysisType::Weekly, date(2024, 6, 10), date(2024, 6, 3)).unwrap_err();
        assert!(err.to_string().contains("period_end"));
    }

    #[test]
    fn test_snapshot_new_sets_deterministic_id() {
        let snap = Snapshot::new(AnalysisType::Weekly, date(2024, 6, 3), date(2024, 6, 9)).unwrap();
        assert_eq!(snap.snapshot_id, "weekly_20240603");
        assert!(!snap.reviewed);
        assert!(snap.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_sentiment() {
        let snap = Snapshot::new(AnalysisType::Weekly, date(2024, 6, 3), date(2024, 6, 9))
            .unwrap()
            .with_sentiment("Billing", 1.4, 0.1);
        let err = snap.validate().unwrap_err();
        assert!(err.to_string().contains("topic_sentiments.Billing.positive"));
    }

    #[test]
    fn test_validate_rejects_mismatched_id() {
        let mut snap =
            Snapshot::new(AnalysisType::Weekly, date(2024, 6, 3), date(2024, 6, 9)).unwrap();
        snap.snapshot_id = "weekly_20240101".to_string();
        assert!(snap.validate().is_err());
    }

    #[test]
    fn test_sentiment_shift_serializes_as_phrase() {
        let json = serde_json::to_value(SentimentShift::MorePositive).unwrap();
        assert_eq!(json, "more positive");
    }

    #[test]
    fn test_historical_context_thresholds() {
        let starts: Vec<_> = (0..4).map(|w| date(2024, 1, 1) + chrono::Duration::weeks(w)).collect();
        let ctx = HistoricalContext::from_period_starts(starts.into_iter().rev().collect());
        assert!(ctx.has_baseline);
        assert!(ctx.can_do_trends);
        assert!(!ctx.can_do_seasonality);
        assert_eq!(ctx.baseline_date, Some(date(2024, 1, 1)));

        let empty = HistoricalContext::from_period_starts(Vec::new());
        assert!(!empty.has_baseline);
        assert_eq!(empty.baseline_date, None);
    }

    #[test]
    fn test_schema_export_names_fields() {
        let schema = serde_json::to_value(snapshot_json_schema()).unwrap();
        let props = &schema["properties"];
        assert!(props.get("topic_volumes").is_some());
        assert!(props.get("period_start").is_some());

        let schema = serde_json::to_value(comparison_json_schema()).unwrap();
        assert!(schema["properties"].get("significant_changes").is_some());
    }
}
