//! Delta computation between two snapshots.
//!
//! Pure functions only; persistence and error degradation live in
//! [`SnapshotService`](super::SnapshotService).

use chrono::Utc;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use super::types::{
    ChangeDirection, Comparison, PatternChange, ResolutionChanges, ResolutionMetrics,
    SentimentChange, SentimentShift, SignificantChange, Snapshot, TopicSentiment,
    TrendInterpretation, VolumeChange,
};
use crate::error::ComparisonError;

/// Sentiment delta above which a topic is no longer "stable".
pub const SENTIMENT_SHIFT_THRESHOLD: f64 = 0.10;
/// Minimum relative change for a significant change.
pub const SIGNIFICANT_PCT: f64 = 0.25;
/// Minimum absolute change for a significant change.
pub const SIGNIFICANT_ABS_CHANGE: i64 = 5;
/// Maximum number of significant changes reported.
pub const MAX_SIGNIFICANT_CHANGES: usize = 5;
/// Relative change at which the alert escalates to red.
pub const RED_ALERT_PCT: f64 = 0.5;
/// Minimum volume for an emerging or declining pattern.
pub const PATTERN_NOISE_FLOOR: u64 = 3;

/// Compare `current` against `prior`.
pub fn compute_comparison(current: &Snapshot, prior: &Snapshot) -> Result<Comparison, ComparisonError> {
    let volume_changes = volume_changes(&current.topic_volumes, &prior.topic_volumes)?;
    let sentiment_changes = sentiment_changes(&current.topic_sentiments, &prior.topic_sentiments)?;
    let resolution_changes = match (&current.resolution_metrics, &prior.resolution_metrics) {
        (Some(cur), Some(prev)) => Some(resolution_changes(cur, prev)?),
        _ => None,
    };
    let significant_changes = significant_changes(&volume_changes);
    let (emerging_patterns, declining_patterns) =
        pattern_changes(&current.topic_volumes, &prior.topic_volumes);

    Ok(Comparison {
        comparison_id: Comparison::id_for(&current.snapshot_id, &prior.snapshot_id),
        current_snapshot_id: current.snapshot_id.clone(),
        prior_snapshot_id: prior.snapshot_id.clone(),
        created_at: Utc::now(),
        volume_changes,
        sentiment_changes,
        resolution_changes,
        significant_changes,
        emerging_patterns,
        declining_patterns,
        error: None,
    })
}

/// Per-topic volume deltas over the union of both topic sets.
pub fn volume_changes(
    current: &BTreeMap<String, u64>,
    prior: &BTreeMap<String, u64>,
) -> Result<BTreeMap<String, VolumeChange>, ComparisonError> {
    let topics: BTreeSet<&String> = current.keys().chain(prior.keys()).collect();

    topics
        .into_iter()
        .map(|topic| {
            let cur = current.get(topic).copied().unwrap_or(0);
            let prev = prior.get(topic).copied().unwrap_or(0);
            let overflow = || ComparisonError::Overflow {
                topic: topic.clone(),
            };
            let cur_i = i64::try_from(cur).map_err(|_| overflow())?;
            let prev_i = i64::try_from(prev).map_err(|_| overflow())?;
            let change = cur_i.checked_sub(prev_i).ok_or_else(overflow)?;
            let pct = if prev == 0 {
                0.0
            } else {
                change as f64 / prev as f64
            };
            Ok((
                topic.clone(),
                VolumeChange {
                    current: cur,
                    prior: prev,
                    change,
                    pct,
                },
            ))
        })
        .collect()
}

/// Sentiment deltas for topics with sentiment in both periods.
pub fn sentiment_changes(
    current: &BTreeMap<String, TopicSentiment>,
    prior: &BTreeMap<String, TopicSentiment>,
) -> Result<BTreeMap<String, SentimentChange>, ComparisonError> {
    current
        .iter()
        .filter_map(|(topic, cur)| prior.get(topic).map(|prev| (topic, cur, prev)))
        .map(|(topic, cur, prev)| {
            let positive_delta = finite(cur.positive - prev.positive, topic, "positive")?;
            let negative_delta = finite(cur.negative - prev.negative, topic, "negative")?;
            Ok((
                topic.clone(),
                SentimentChange {
                    positive_delta,
                    negative_delta,
                    shift: classify_shift(positive_delta, negative_delta),
                },
            ))
        })
        .collect()
}

/// Positive movement is checked first; negative movement maps inversely.
pub fn classify_shift(positive_delta: f64, negative_delta: f64) -> SentimentShift {
    if positive_delta.abs() > SENTIMENT_SHIFT_THRESHOLD {
        if positive_delta > 0.0 {
            SentimentShift::MorePositive
        } else {
            SentimentShift::MoreNegative
        }
    } else if negative_delta.abs() > SENTIMENT_SHIFT_THRESHOLD {
        if negative_delta > 0.0 {
            SentimentShift::MoreNegative
        } else {
            SentimentShift::MorePositive
        }
    } else {
        SentimentShift::Stable
    }
}

/// Resolution deltas; rates in percentage points, time in hours.
pub fn resolution_changes(
    current: &ResolutionMetrics,
    prior: &ResolutionMetrics,
) -> Result<ResolutionChanges, ComparisonError> {
    let topic = "resolution_metrics";
    let fcr_rate_delta = finite((current.fcr_rate - prior.fcr_rate) * 100.0, topic, "fcr_rate")?;
    let resolution_time_delta = finite(
        current.median_resolution_hours - prior.median_resolution_hours,
        topic,
        "median_resolution_hours",
    )?;
    let reopen_rate_delta = finite(
        (current.reopen_rate - prior.reopen_rate) * 100.0,
        topic,
        "reopen_rate",
    )?;

    Ok(ResolutionChanges {
        fcr_rate_delta,
        resolution_time_delta,
        reopen_rate_delta,
        interpretation: interpret_resolution(fcr_rate_delta, resolution_time_delta),
    })
}

/// Majority vote of higher FCR and faster resolution.
fn interpret_resolution(fcr_rate_delta: f64, resolution_time_delta: f64) -> TrendInterpretation {
    let vote = |v: f64| match v.partial_cmp(&0.0) {
        Some(Ordering::Greater) => 1,
        Some(Ordering::Less) => -1,
        _ => 0,
    };
    // Negative resolution time is the good direction.
    match vote(fcr_rate_delta) - vote(resolution_time_delta) {
        score if score > 0 => TrendInterpretation::Improving,
        score if score < 0 => TrendInterpretation::Declining,
        _ => TrendInterpretation::Stable,
    }
}

/// Changes that clear both noise bounds, largest relative move first.
///
/// Equal `|pct|` entries are ordered by topic name.
pub fn significant_changes(volume_changes: &BTreeMap<String, VolumeChange>) -> Vec<SignificantChange> {
    let mut significant: Vec<SignificantChange> = volume_changes
        .iter()
        .filter(|(_, vc)| vc.pct.abs() > SIGNIFICANT_PCT && vc.change.abs() > SIGNIFICANT_ABS_CHANGE)
        .map(|(topic, vc)| SignificantChange {
            topic: topic.clone(),
            current: vc.current,
            prior: vc.prior,
            change: vc.change,
            pct: vc.pct,
            direction: if vc.change > 0 {
                ChangeDirection::Increase
            } else {
                ChangeDirection::Decrease
            },
            alert: if vc.pct.abs() >= RED_ALERT_PCT {
                "🔴".to_string()
            } else {
                "🟡".to_string()
            },
        })
        .collect();

    significant.sort_by(|a, b| {
        b.pct
            .abs()
            .partial_cmp(&a.pct.abs())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.topic.cmp(&b.topic))
    });
    significant.truncate(MAX_SIGNIFICANT_CHANGES);
    significant
}

/// Topics that appeared (emerging) or disappeared (declining) above the noise floor.
pub fn pattern_changes(
    current: &BTreeMap<String, u64>,
    prior: &BTreeMap<String, u64>,
) -> (Vec<PatternChange>, Vec<PatternChange>) {
    let emerging = only_in(current, prior);
    let declining = only_in(prior, current);
    (emerging, declining)
}

/// Topics with volume in `a` and none in `b`.
fn only_in(a: &BTreeMap<String, u64>, b: &BTreeMap<String, u64>) -> Vec<PatternChange> {
    let mut patterns: Vec<PatternChange> = a
        .iter()
        .filter(|(topic, volume)| {
            **volume >= PATTERN_NOISE_FLOOR && b.get(*topic).copied().unwrap_or(0) == 0
        })
        .map(|(topic, volume)| PatternChange {
            topic: topic.clone(),
            volume: *volume,
        })
        .collect();
    patterns.sort_by(|x, y| y.volume.cmp(&x.volume).then_with(|| x.topic.cmp(&y.topic)));
    patterns
}

fn finite(value: f64, topic: &str, field: &str) -> Result<f64, ComparisonError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ComparisonError::NonFinite {
            topic: topic.to_string(),
            field: field.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "comparator_tests.rs"]
mod comparator_tests;
