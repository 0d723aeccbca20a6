//! Pulls snapshot aggregates out of analysis payloads.
//!
//! Every extractor returns `Result<T, ExtractionError>` on its own; callers
//! decide whether a failure degrades to an empty default. [`extract_aggregates`]
//! does exactly that and records each failure in a [`DataCompleteness`] report.
//!
//! Top-level aggregate keys (legacy flat snapshots) take precedence over the
//! nested per-agent payloads written by the orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::types::{ResolutionMetrics, TopicSentiment};
use crate::error::ExtractionError;

type Extracted<T> = Result<T, ExtractionError>;

/// Everything a snapshot needs from one analysis payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedAggregates {
    pub total_conversations: u64,
    pub topic_volumes: BTreeMap<String, u64>,
    pub topic_sentiments: BTreeMap<String, TopicSentiment>,
    pub tier_distribution: BTreeMap<String, u64>,
    pub agent_attribution: Option<BTreeMap<String, u64>>,
    pub resolution_metrics: Option<ResolutionMetrics>,
    pub fin_performance: Option<Value>,
    pub key_patterns: Option<Vec<String>>,
    pub completeness: DataCompleteness,
}

/// Outcome of one extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum FieldStatus {
    Present,
    Missing(String),
    Malformed(String),
}

/// Which aggregates could be extracted and which degraded to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataCompleteness {
    pub fields: BTreeMap<String, FieldStatus>,
}

/// Fields every snapshot is expected to carry.
const REQUIRED_FIELDS: [&str; 4] = [
    "total_conversations",
    "topic_volumes",
    "topic_sentiments",
    "tier_distribution",
];

impl DataCompleteness {
    fn record<T>(&mut self, field: &str, result: Extracted<T>) -> Option<T> {
        match result {
            Ok(value) => {
                self.fields.insert(field.to_string(), FieldStatus::Present);
                Some(value)
            }
            Err(ExtractionError::Missing { path }) => {
                self.fields
                    .insert(field.to_string(), FieldStatus::Missing(path));
                None
            }
            Err(err @ ExtractionError::Malformed { .. }) => {
                self.fields
                    .insert(field.to_string(), FieldStatus::Malformed(err.to_string()));
                None
            }
        }
    }

    /// Share of required fields that were extracted.
    pub fn ratio(&self) -> f64 {
        let present = REQUIRED_FIELDS
            .iter()
            .filter(|f| matches!(self.fields.get(**f), Some(FieldStatus::Present)))
            .count();
        present as f64 / REQUIRED_FIELDS.len() as f64
    }

    /// Human-readable issues, one per degraded field.
    pub fn issues(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter_map(|(field, status)| match status {
                FieldStatus::Present => None,
                FieldStatus::Missing(path) => Some(format!("{}: missing ({})", field, path)),
                FieldStatus::Malformed(reason) => Some(format!("{}: {}", field, reason)),
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.ratio() >= 1.0
    }
}

/// Run every extractor, degrading failures to defaults.
pub fn extract_aggregates(output: &Value) -> ExtractedAggregates {
    let mut completeness = DataCompleteness::default();

    let topic_volumes = completeness
        .record("topic_volumes", extract_topic_volumes(output))
        .unwrap_or_default();
    let topic_sentiments = completeness
        .record("topic_sentiments", extract_topic_sentiments(output))
        .unwrap_or_default();
    let tier_distribution = completeness
        .record("tier_distribution", extract_tier_distribution(output))
        .unwrap_or_default();
    let total_conversations = completeness
        .record("total_conversations", extract_total_conversations(output))
        .unwrap_or_else(|| topic_volumes.values().copied().max().unwrap_or(0));
    let agent_attribution = completeness.record("agent_attribution", extract_agent_attribution(output));
    let resolution_metrics =
        completeness.record("resolution_metrics", extract_resolution_metrics(output));
    let fin_performance = completeness.record("fin_performance", extract_fin_performance(output));
    let key_patterns = completeness.record("key_patterns", extract_key_patterns(output));

    ExtractedAggregates {
        total_conversations,
        topic_volumes,
        topic_sentiments,
        tier_distribution,
        agent_attribution,
        resolution_metrics,
        fin_performance,
        key_patterns,
        completeness,
    }
}

/// `{topic: count}` from `topic_volumes` or the topic detection payload.
pub fn extract_topic_volumes(output: &Value) -> Extracted<BTreeMap<String, u64>> {
    if let Some(flat) = output.get("topic_volumes") {
        return count_map(flat, "topic_volumes");
    }

    let path = "results.topic_detection.data.topic_distribution";
    let distribution = agent_data(output, "topic_detection")?
        .get("topic_distribution")
        .ok_or_else(|| missing(path))?;
    let entries = distribution.as_object().ok_or_else(|| malformed(path, "not an object"))?;

    entries
        .iter()
        .map(|(topic, stats)| {
            let volume = match stats {
                Value::Object(obj) => obj.get("volume").map(|v| as_count(v, path)).transpose()?,
                other => Some(as_count(other, path)?),
            }
            .unwrap_or(0);
            Ok((topic.clone(), volume))
        })
        .collect()
}

/// `{topic: {positive, negative}}` from `topic_sentiments` or per-topic sentiment results.
pub fn extract_topic_sentiments(output: &Value) -> Extracted<BTreeMap<String, TopicSentiment>> {
    if let Some(flat) = output.get("topic_sentiments") {
        let entries = flat
            .as_object()
            .ok_or_else(|| malformed("topic_sentiments", "not an object"))?;
        return entries
            .iter()
            .map(|(topic, value)| Ok((topic.clone(), sentiment_from(value, "topic_sentiments")?)))
            .collect();
    }

    let path = "results.topic_sentiments";
    let per_topic = output
        .get("results")
        .and_then(|r| r.get("topic_sentiments"))
        .ok_or_else(|| missing(path))?
        .as_object()
        .ok_or_else(|| malformed(path, "not an object"))?;

    // A failed sentiment run for one topic only drops that topic.
    let sentiments = per_topic
        .iter()
        .filter(|(_, result)| result.get("success").and_then(Value::as_bool).unwrap_or(true))
        .filter_map(|(topic, result)| {
            result
                .get("data")
                .and_then(|data| sentiment_from(data, path).ok())
                .map(|s| (topic.clone(), s))
        })
        .collect();
    Ok(sentiments)
}

/// `{tier: count}` from `tier_distribution` or the segmentation payload.
pub fn extract_tier_distribution(output: &Value) -> Extracted<BTreeMap<String, u64>> {
    if let Some(flat) = output.get("tier_distribution") {
        return count_map(flat, "tier_distribution");
    }
    let data = agent_data(output, "segmentation")?;
    let dist = data
        .get("tier_distribution")
        .ok_or_else(|| missing("results.segmentation.data.tier_distribution"))?;
    count_map(dist, "results.segmentation.data.tier_distribution")
}

/// Total conversations analysed in the run.
pub fn extract_total_conversations(output: &Value) -> Extracted<u64> {
    if let Some(total) = output.get("total_conversations") {
        return as_count(total, "total_conversations");
    }
    let data = agent_data(output, "segmentation")?;
    let total = data
        .get("total_conversations")
        .ok_or_else(|| missing("results.segmentation.data.total_conversations"))?;
    as_count(total, "results.segmentation.data.total_conversations")
}

/// `{agent_type: count}` from the segmentation payload.
pub fn extract_agent_attribution(output: &Value) -> Extracted<BTreeMap<String, u64>> {
    if let Some(flat) = output.get("agent_attribution") {
        return count_map(flat, "agent_attribution");
    }
    let data = agent_data(output, "segmentation")?;
    let dist = data
        .get("agent_distribution")
        .ok_or_else(|| missing("results.segmentation.data.agent_distribution"))?;
    count_map(dist, "results.segmentation.data.agent_distribution")
}

/// Resolution metrics from the tier performance payload.
pub fn extract_resolution_metrics(output: &Value) -> Extracted<ResolutionMetrics> {
    let (value, path) = match output.get("resolution_metrics") {
        Some(flat) => (flat, "resolution_metrics"),
        None => (
            agent_data(output, "tier_performance")?
                .get("resolution_metrics")
                .ok_or_else(|| missing("results.tier_performance.data.resolution_metrics"))?,
            "results.tier_performance.data.resolution_metrics",
        ),
    };
    if value.as_object().map_or(true, |o| o.is_empty()) {
        return Err(missing(path));
    }
    serde_json::from_value(value.clone()).map_err(|e| malformed(path, &e.to_string()))
}

/// Whole tier performance payload.
pub fn extract_fin_performance(output: &Value) -> Extracted<Value> {
    if let Some(flat) = output.get("fin_performance") {
        return Ok(flat.clone());
    }
    agent_data(output, "tier_performance").map(Value::clone)
}

/// Key patterns surfaced by the correlation agent.
pub fn extract_key_patterns(output: &Value) -> Extracted<Vec<String>> {
    let (value, path) = match output.get("key_patterns") {
        Some(flat) => (flat, "key_patterns"),
        None => (
            agent_data(output, "correlation")?
                .get("key_patterns")
                .ok_or_else(|| missing("results.correlation.data.key_patterns"))?,
            "results.correlation.data.key_patterns",
        ),
    };
    let items = value.as_array().ok_or_else(|| malformed(path, "not a list"))?;
    Ok(items
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect())
}

/// `results.{agent}.data`, refusing payloads of failed agents.
fn agent_data<'a>(output: &'a Value, agent: &str) -> Extracted<&'a Value> {
    let result = output
        .get("results")
        .and_then(|r| r.get(agent))
        .ok_or_else(|| missing(&format!("results.{}", agent)))?;
    if result.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(malformed(
            &format!("results.{}", agent),
            "agent reported failure",
        ));
    }
    result
        .get("data")
        .filter(|d| !d.is_null())
        .ok_or_else(|| missing(&format!("results.{}.data", agent)))
}

fn sentiment_from(value: &Value, path: &str) -> Extracted<TopicSentiment> {
    let source = value.get("sentiment_breakdown").unwrap_or(value);
    let fraction = |key: &str| {
        source
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| malformed(path, &format!("{} is not a number", key)))
    };
    Ok(TopicSentiment {
        positive: fraction("positive")?,
        negative: fraction("negative")?,
    })
}

fn count_map(value: &Value, path: &str) -> Extracted<BTreeMap<String, u64>> {
    let entries = value.as_object().ok_or_else(|| malformed(path, "not an object"))?;
    entries
        .iter()
        .map(|(k, v)| Ok((k.clone(), as_count(v, path)?)))
        .collect()
}

fn as_count(value: &Value, path: &str) -> Extracted<u64> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    match value.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 && f.is_finite() => Ok(f as u64),
        _ => Err(malformed(path, &format!("{} is not a non-negative count", value))),
    }
}

fn missing(path: &str) -> ExtractionError {
    ExtractionError::Missing {
        path: path.to_string(),
    }
}

fn malformed(path: &str, reason: &str) -> ExtractionError {
    ExtractionError::Malformed {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
