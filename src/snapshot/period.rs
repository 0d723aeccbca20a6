//! Snapshot identity and period derivation.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::warn;

use super::types::AnalysisType;

fn week_id_regex() -> &'static Regex {
    static WEEK_ID_RE: OnceLock<Regex> = OnceLock::new();
    WEEK_ID_RE.get_or_init(|| Regex::new(r"^(\d{4})_W(\d{2})$").expect("week id regex should compile"))
}

fn snapshot_date_regex() -> &'static Regex {
    static SNAPSHOT_DATE_RE: OnceLock<Regex> = OnceLock::new();
    SNAPSHOT_DATE_RE
        .get_or_init(|| Regex::new(r"_(\d{8})$").expect("snapshot date regex should compile"))
}

/// Deterministic id for the snapshot covering the period starting at `period_start`.
pub fn generate_snapshot_id(period_start: NaiveDate, analysis_type: AnalysisType) -> String {
    format!("{}_{}", analysis_type.as_str(), period_start.format("%Y%m%d"))
}

/// Date suffix of a snapshot id, if it has one.
pub fn parse_snapshot_date(snapshot_id: &str) -> Option<NaiveDate> {
    let caps = snapshot_date_regex().captures(snapshot_id)?;
    NaiveDate::parse_from_str(&caps[1], "%Y%m%d").ok()
}

/// Monday and Sunday of an ISO week id such as `2024_W23`.
pub fn parse_week_id(week_id: &str) -> Option<(NaiveDate, NaiveDate)> {
    let caps = week_id_regex().captures(week_id.trim())?;
    let year: i32 = caps[1].parse().ok()?;
    let week: u32 = caps[2].parse().ok()?;
    let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
    Some((monday, monday + Duration::days(6)))
}

/// ISO week id (`YYYY_Www`) containing `date`.
pub fn week_id_for(date: NaiveDate) -> String {
    let iso = date.iso_week();
    format!("{}_W{:02}", iso.year(), iso.week())
}

/// Where a snapshot's period came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodSource {
    /// `period_start` / `period_end` in the payload.
    Explicit,
    /// Parsed from `week_id`.
    WeekId,
    /// Neither was usable; single-day period on the fallback date.
    Fallback,
}

/// Period resolved from an analysis payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub source: PeriodSource,
}

/// Resolve the period of an analysis payload.
///
/// Explicit dates win, then `week_id`, then a degenerate `today..=today` period.
pub fn derive_period(output: &Value, today: NaiveDate) -> DerivedPeriod {
    let start = output.get("period_start").and_then(parse_date_value);
    let end = output.get("period_end").and_then(parse_date_value);
    if let (Some(start), Some(end)) = (start, end) {
        return DerivedPeriod {
            start,
            end,
            source: PeriodSource::Explicit,
        };
    }

    if let Some(week_id) = output.get("week_id").and_then(Value::as_str) {
        if let Some((start, end)) = parse_week_id(week_id) {
            return DerivedPeriod {
                start,
                end,
                source: PeriodSource::WeekId,
            };
        }
        warn!(week_id = %week_id, "Unparseable week_id, falling back to today");
    }

    DerivedPeriod {
        start: today,
        end: today,
        source: PeriodSource::Fallback,
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp.
fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}
