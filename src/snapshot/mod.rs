//! Point-in-time snapshots of analysis runs and week-over-week comparison.
//!
//! - [`period`]: deterministic snapshot ids and period derivation
//! - [`extract`]: fault-tolerant aggregate extraction from agent payloads
//! - [`comparator`]: pure delta computation between two snapshots
//! - [`SnapshotService`]: persistence, prior lookup and history
//! - [`migrate_legacy_snapshots`]: import of legacy flat-file snapshots

pub mod comparator;
pub mod extract;
mod migration;
pub mod period;
mod service;
mod types;

pub use extract::{extract_aggregates, DataCompleteness, ExtractedAggregates, FieldStatus};
pub use migration::{migrate_legacy_snapshots, MigrationFailure, MigrationReport};
pub use period::{generate_snapshot_id, parse_snapshot_date, parse_week_id, week_id_for};
pub use service::{BlockingSnapshotService, BuiltSnapshot, SnapshotService};
pub use types::{
    comparison_json_schema, snapshot_json_schema, AnalysisType, ChangeDirection, Comparison,
    HistoricalContext, PatternChange, ResolutionChanges, ResolutionMetrics, ReviewUpdate,
    SentimentChange, SentimentShift, SignificantChange, Snapshot, TopicSentiment,
    TrendInterpretation, VolumeChange, BASELINE_MIN_WEEKS, SEASONALITY_MIN_WEEKS,
};
