use super::*;
use chrono::NaiveDate;
use pretty_assertions::assert_eq;

use crate::snapshot::types::AnalysisType;

fn week(start: (i32, u32, u32)) -> Snapshot {
    let start = NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap();
    Snapshot::new(AnalysisType::Weekly, start, start + chrono::Duration::days(6)).unwrap()
}

fn current_and_prior() -> (Snapshot, Snapshot) {
    let current = week((2024, 6, 10)).with_topic_volumes([("Billing", 20), ("API", 5)]);
    let prior = week((2024, 6, 3)).with_topic_volumes([("Billing", 10), ("Auth", 8)]);
    (current, prior)
}

#[test]
fn test_basic_weekly_comparison() {
    let (current, prior) = current_and_prior();
    let comparison = compute_comparison(&current, &prior).unwrap();

    assert_eq!(comparison.comparison_id, "comp_weekly_20240610_weekly_20240603");
    assert_eq!(
        comparison.volume_changes["Billing"],
        VolumeChange { current: 20, prior: 10, change: 10, pct: 1.0 }
    );
    assert_eq!(
        comparison.volume_changes["API"],
        VolumeChange { current: 5, prior: 0, change: 5, pct: 0.0 }
    );
    assert_eq!(
        comparison.volume_changes["Auth"],
        VolumeChange { current: 0, prior: 8, change: -8, pct: -1.0 }
    );

    assert_eq!(
        comparison.emerging_patterns,
        vec![PatternChange { topic: "API".to_string(), volume: 5 }]
    );
    assert_eq!(
        comparison.declining_patterns,
        vec![PatternChange { topic: "Auth".to_string(), volume: 8 }]
    );

    // Equal |pct|: topic name breaks the tie.
    let topics: Vec<&str> = comparison
        .significant_changes
        .iter()
        .map(|c| c.topic.as_str())
        .collect();
    assert_eq!(topics, vec!["Auth", "Billing"]);
    assert_eq!(comparison.significant_changes[0].direction, ChangeDirection::Decrease);
    assert_eq!(comparison.significant_changes[1].direction, ChangeDirection::Increase);
    assert_eq!(comparison.significant_changes[0].alert, "🔴");
    assert!(!comparison.is_error());
}

#[test]
fn test_volume_change_symmetry() {
    let (a, b) = current_and_prior();
    let ab = compute_comparison(&a, &b).unwrap();
    let ba = compute_comparison(&b, &a).unwrap();

    assert_eq!(ab.volume_changes.len(), 3);
    for (topic, change) in &ab.volume_changes {
        assert_eq!(change.change, -ba.volume_changes[topic].change, "topic {}", topic);
    }
}

#[test]
fn test_zero_prior_never_divides() {
    let current = week((2024, 6, 10)).with_topic_volumes([("New", 1000)]);
    let prior = week((2024, 6, 3));
    let changes = volume_changes(&current.topic_volumes, &prior.topic_volumes).unwrap();
    assert_eq!(changes["New"].pct, 0.0);
    assert!(changes["New"].pct.is_finite());
}

#[test]
fn test_significant_changes_require_both_bounds() {
    let current = week((2024, 6, 10)).with_topic_volumes([
        ("SmallButSteep", 4),  // +300%, change 3
        ("LargeButFlat", 120), // +20%, change 20
        ("Both", 40),          // +100%, change 20
    ]);
    let prior = week((2024, 6, 3)).with_topic_volumes([
        ("SmallButSteep", 1),
        ("LargeButFlat", 100),
        ("Both", 20),
    ]);
    let comparison = compute_comparison(&current, &prior).unwrap();

    assert_eq!(comparison.significant_changes.len(), 1);
    let only = &comparison.significant_changes[0];
    assert_eq!(only.topic, "Both");
    for change in &comparison.significant_changes {
        assert!(change.pct.abs() > SIGNIFICANT_PCT);
        assert!(change.change.abs() > SIGNIFICANT_ABS_CHANGE);
    }
}

#[test]
fn test_significant_changes_capped_and_sorted() {
    let current = week((2024, 6, 10)).with_topic_volumes(
        (0..8u64).map(|i| (format!("T{}", i), 20 + 10 * i)),
    );
    let prior = week((2024, 6, 3)).with_topic_volumes((0..8u64).map(|i| (format!("T{}", i), 10)));
    let comparison = compute_comparison(&current, &prior).unwrap();

    assert_eq!(comparison.significant_changes.len(), MAX_SIGNIFICANT_CHANGES);
    assert_eq!(comparison.significant_changes[0].topic, "T7");
    let pcts: Vec<f64> = comparison.significant_changes.iter().map(|c| c.pct).collect();
    assert!(pcts.windows(2).all(|w| w[0].abs() >= w[1].abs()));
}

#[test]
fn test_yellow_alert_below_half() {
    let current = week((2024, 6, 10)).with_topic_volumes([("Billing", 140)]);
    let prior = week((2024, 6, 3)).with_topic_volumes([("Billing", 100)]);
    let comparison = compute_comparison(&current, &prior).unwrap();
    assert_eq!(comparison.significant_changes[0].alert, "🟡");
}

#[test]
fn test_noise_floor_filters_patterns() {
    let current = week((2024, 6, 10)).with_topic_volumes([("Tiny", 2), ("Real", 3)]);
    let prior = week((2024, 6, 3)).with_topic_volumes([("Gone", 2), ("Old", 9), ("Older", 12)]);
    let comparison = compute_comparison(&current, &prior).unwrap();

    let emerging: Vec<&str> = comparison.emerging_patterns.iter().map(|p| p.topic.as_str()).collect();
    let declining: Vec<&str> = comparison.declining_patterns.iter().map(|p| p.topic.as_str()).collect();
    assert_eq!(emerging, vec!["Real"]);
    assert_eq!(declining, vec!["Older", "Old"]);
}

#[test]
fn test_sentiment_shift_more_positive() {
    let current = week((2024, 6, 10)).with_sentiment("Support", 0.6, 0.2);
    let prior = week((2024, 6, 3)).with_sentiment("Support", 0.45, 0.3);
    let comparison = compute_comparison(&current, &prior).unwrap();

    let change = comparison.sentiment_changes["Support"];
    assert!((change.positive_delta - 0.15).abs() < 1e-9);
    assert_eq!(change.shift, SentimentShift::MorePositive);
}

#[test]
fn test_sentiment_skips_topics_missing_either_side() {
    let current = week((2024, 6, 10))
        .with_sentiment("Support", 0.5, 0.2)
        .with_sentiment("Billing", 0.1, 0.8);
    let prior = week((2024, 6, 3)).with_sentiment("Support", 0.5, 0.2);
    let comparison = compute_comparison(&current, &prior).unwrap();

    assert!(comparison.sentiment_changes.get("Billing").is_none());
    assert_eq!(comparison.sentiment_changes["Support"].shift, SentimentShift::Stable);
}

#[test]
fn test_classify_shift_rules() {
    assert_eq!(classify_shift(-0.2, 0.0), SentimentShift::MoreNegative);
    assert_eq!(classify_shift(0.05, 0.2), SentimentShift::MoreNegative);
    assert_eq!(classify_shift(0.05, -0.2), SentimentShift::MorePositive);
    // Positive delta wins when both exceed the threshold.
    assert_eq!(classify_shift(0.2, 0.3), SentimentShift::MorePositive);
    assert_eq!(classify_shift(0.10, 0.10), SentimentShift::Stable);
}

#[test]
fn test_resolution_changes_interpretation() {
    let metrics = |fcr, hours, reopen| ResolutionMetrics {
        fcr_rate: fcr,
        median_resolution_hours: hours,
        reopen_rate: reopen,
    };
    let improving = resolution_changes(&metrics(0.8, 2.0, 0.05), &metrics(0.7, 3.0, 0.1)).unwrap();
    assert!((improving.fcr_rate_delta - 10.0).abs() < 1e-9);
    assert!((improving.resolution_time_delta + 1.0).abs() < 1e-9);
    assert!((improving.reopen_rate_delta + 5.0).abs() < 1e-9);
    assert_eq!(improving.interpretation, TrendInterpretation::Improving);

    let declining = resolution_changes(&metrics(0.6, 4.0, 0.1), &metrics(0.7, 3.0, 0.1)).unwrap();
    assert_eq!(declining.interpretation, TrendInterpretation::Declining);

    let mixed = resolution_changes(&metrics(0.8, 4.0, 0.1), &metrics(0.7, 3.0, 0.1)).unwrap();
    assert_eq!(mixed.interpretation, TrendInterpretation::Stable);
}

#[test]
fn test_resolution_changes_need_both_periods() {
    let current = week((2024, 6, 10)).with_resolution(ResolutionMetrics::default());
    let prior = week((2024, 6, 3));
    let comparison = compute_comparison(&current, &prior).unwrap();
    assert!(comparison.resolution_changes.is_none());
}

#[test]
fn test_non_finite_sentiment_is_an_error() {
    let current = week((2024, 6, 10)).with_sentiment("Support", f64::NAN, 0.2);
    let prior = week((2024, 6, 3)).with_sentiment("Support", 0.5, 0.2);
    let err = compute_comparison(&current, &prior).unwrap_err();
    assert!(matches!(err, ComparisonError::NonFinite { .. }));
}

#[test]
fn test_oversized_volume_is_an_error() {
    let current = week((2024, 6, 10)).with_topic_volumes([("Huge", u64::MAX)]);
    let prior = week((2024, 6, 3));
    let err = compute_comparison(&current, &prior).unwrap_err();
    assert!(matches!(err, ComparisonError::Overflow { .. }));
}
