//! Rule-based analytical agents run concurrently after tier performance.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use super::{ratio, round2, Agent, AgentContext, AgentResult};
use crate::models::Conversation;

/// Conversations grouped by detected topic.
fn by_topic(ctx: &AgentContext) -> BTreeMap<&str, Vec<&Conversation>> {
    let mut grouped: BTreeMap<&str, Vec<&Conversation>> = BTreeMap::new();
    for conv in ctx.conversations.iter() {
        for topic in ctx.topics.detected_topics(&conv.id) {
            grouped.entry(topic.as_str()).or_default().push(conv);
        }
    }
    grouped
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Pearson correlation; `None` with fewer than three points or no variance.
fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 3 {
        return None;
    }
    let mx = average(xs)?;
    let my = average(ys)?;
    let cov: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mx) * (y - my)).sum();
    let vx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    let vy: f64 = ys.iter().map(|y| (y - my).powi(2)).sum();
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}

// ============================================================================
// Correlation
// ============================================================================

const CORRELATION_NAME: &str = "CorrelationAgent";
const ESCALATION_PATTERN_RATE: f64 = 0.5;
const PATTERN_MIN_VOLUME: usize = 5;
const LOW_RATING: f64 = 3.0;

/// Per-topic escalation and rating statistics and the patterns they imply.
pub struct CorrelationAgent;

#[async_trait]
impl Agent for CorrelationAgent {
    fn name(&self) -> &str {
        CORRELATION_NAME
    }

    async fn execute(&self, ctx: &AgentContext) -> AgentResult {
        let grouped = by_topic(ctx);
        let mut topic_stats = BTreeMap::new();
        let mut key_patterns = Vec::new();

        for (topic, conversations) in &grouped {
            let escalated = conversations
                .iter()
                .filter(|c| c.admin_assignee_id.is_some())
                .count();
            let reopened = conversations.iter().filter(|c| c.reopen_count > 0).count();
            let ratings: Vec<f64> = conversations
                .iter()
                .filter_map(|c| c.rating.map(f64::from))
                .collect();
            let escalation_rate = ratio(escalated, conversations.len());
            let avg_rating = average(&ratings);

            if conversations.len() >= PATTERN_MIN_VOLUME && escalation_rate >= ESCALATION_PATTERN_RATE {
                key_patterns.push(format!(
                    "{}: {:.0}% of {} conversations needed a human",
                    topic,
                    escalation_rate * 100.0,
                    conversations.len()
                ));
            }
            if let Some(avg) = avg_rating.filter(|a| *a < LOW_RATING && ratings.len() >= 3) {
                key_patterns.push(format!(
                    "{}: low satisfaction (average rating {:.1} over {} ratings)",
                    topic,
                    avg,
                    ratings.len()
                ));
            }

            topic_stats.insert(
                topic.to_string(),
                json!({
                    "volume": conversations.len(),
                    "escalation_rate": round2(escalation_rate),
                    "reopen_rate": round2(ratio(reopened, conversations.len())),
                    "avg_rating": avg_rating.map(round2),
                }),
            );
        }

        // Escalated (1.0) vs not (0.0) against rating, over rated conversations.
        let (xs, ys): (Vec<f64>, Vec<f64>) = ctx
            .conversations
            .iter()
            .filter_map(|c| {
                c.rating.map(|r| {
                    let escalated = if c.admin_assignee_id.is_some() { 1.0 } else { 0.0 };
                    (escalated, f64::from(r))
                })
            })
            .unzip();
        let correlation = pearson(&xs, &ys).map(round2);

        let mut result = AgentResult::success(
            CORRELATION_NAME,
            json!({
                "topic_stats": topic_stats,
                "escalation_rating_correlation": correlation,
                "rated_conversations": xs.len(),
                "key_patterns": key_patterns,
            }),
            if xs.len() >= 30 { 0.8 } else { 0.6 },
        )
        .with_source("topic assignments, assignee and rating fields");

        if correlation.is_none() {
            result = result.with_limitation("Not enough rated conversations for a rating correlation");
        }
        if grouped.is_empty() {
            result = result.with_limitation("No topic assignments available");
        }
        result
    }
}

// ============================================================================
// Quality Insights
// ============================================================================

const QUALITY_NAME: &str = "QualityInsightsAgent";
const ANOMALY_Z: f64 = 2.0;
const HOTSPOT_LOW_SHARE: f64 = 0.4;
const HOTSPOT_MIN_RATINGS: usize = 3;

/// Volume anomalies across topics and low-rating hot spots.
pub struct QualityInsightsAgent;

#[async_trait]
impl Agent for QualityInsightsAgent {
    fn name(&self) -> &str {
        QUALITY_NAME
    }

    async fn execute(&self, ctx: &AgentContext) -> AgentResult {
        let grouped = by_topic(ctx);
        let volumes: Vec<f64> = grouped.values().map(|c| c.len() as f64).collect();
        let mut limitations = Vec::new();

        let mut anomalies = Vec::new();
        match (average(&volumes), volumes.len() >= 3) {
            (Some(mean), true) => {
                let variance =
                    volumes.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / volumes.len() as f64;
                let std = variance.sqrt();
                if std > 0.0 {
                    for (topic, conversations) in &grouped {
                        let z = (conversations.len() as f64 - mean) / std;
                        if z > ANOMALY_Z {
                            anomalies.push(json!({
                                "topic": topic,
                                "volume": conversations.len(),
                                "z_score": round2(z),
                            }));
                        }
                    }
                }
            }
            _ => limitations.push("Fewer than three topics; volume anomalies not assessed".to_string()),
        }

        let mut hotspots = Vec::new();
        for (topic, conversations) in &grouped {
            let ratings: Vec<u8> = conversations.iter().filter_map(|c| c.rating).collect();
            if ratings.len() < HOTSPOT_MIN_RATINGS {
                continue;
            }
            let low = ratings.iter().filter(|r| **r <= 2).count();
            let share = ratio(low, ratings.len());
            if share >= HOTSPOT_LOW_SHARE {
                hotspots.push(json!({
                    "topic": topic,
                    "low_rating_share": round2(share),
                    "ratings": ratings.len(),
                }));
            }
        }

        info!(anomalies = anomalies.len(), hotspots = hotspots.len(), "Quality insights computed");

        AgentResult::success(
            QUALITY_NAME,
            json!({
                "volume_anomalies": anomalies,
                "low_rating_hotspots": hotspots,
                "topics_assessed": grouped.len(),
            }),
            if limitations.is_empty() { 0.75 } else { 0.55 },
        )
        .with_source("topic volumes and ratings")
        .with_limitations(limitations)
    }
}

// ============================================================================
// Churn Risk
// ============================================================================

const CHURN_NAME: &str = "ChurnRiskAgent";

/// Phrases that signal a customer may leave.
const CHURN_SIGNALS: &[&str] = &[
    "cancel",
    "cancellation",
    "refund",
    "downgrade",
    "unsubscribe",
    "switch to",
    "competitor",
    "too expensive",
    "not worth",
    "close my account",
    "delete my account",
];

/// Churn-signal phrases, per-tier risk counts and high-risk conversations.
pub struct ChurnRiskAgent;

impl ChurnRiskAgent {
    fn signals(conv: &Conversation) -> BTreeSet<&'static str> {
        let text = conv.searchable_text();
        CHURN_SIGNALS
            .iter()
            .copied()
            .filter(|s| text.contains(s))
            .collect()
    }
}

#[async_trait]
impl Agent for ChurnRiskAgent {
    fn name(&self) -> &str {
        CHURN_NAME
    }

    async fn execute(&self, ctx: &AgentContext) -> AgentResult {
        let mut signal_counts: BTreeMap<&str, u64> = BTreeMap::new();
        let mut at_risk_by_tier: BTreeMap<String, u64> = BTreeMap::new();
        let mut high_risk = Vec::new();
        let mut at_risk = 0usize;

        for conv in ctx.conversations.iter() {
            let signals = Self::signals(conv);
            if signals.is_empty() {
                continue;
            }
            at_risk += 1;
            for s in &signals {
                *signal_counts.entry(*s).or_default() += 1;
            }
            let tier = conv.tier.clone().unwrap_or_else(|| "unknown".to_string()).to_lowercase();
            *at_risk_by_tier.entry(tier).or_default() += 1;

            let unhappy = conv.rating.map_or(false, |r| r <= 2);
            if signals.len() >= 2 || unhappy {
                high_risk.push(conv.id.clone());
            }
        }

        info!(at_risk = at_risk, high_risk = high_risk.len(), "Churn signals scanned");

        AgentResult::success(
            CHURN_NAME,
            json!({
                "at_risk_total": at_risk,
                "at_risk_share": round2(ratio(at_risk, ctx.conversations.len())),
                "signal_counts": signal_counts,
                "at_risk_by_tier": at_risk_by_tier,
                "high_risk_conversation_ids": high_risk,
            }),
            0.65,
        )
        .with_source("keyword churn signals")
        .with_limitation("Keyword matching cannot tell intent from mention")
    }
}
