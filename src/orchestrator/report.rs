//! Report assembly and rendering.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::fanout::TopicEntry;
use super::monitor::ExecutionSummary;

// ============================================================================
// Result Slots
// ============================================================================

/// Report slots in phase order: `(key, title, grouped per topic)`.
pub const SLOTS: [(&str, &str, bool); 11] = [
    ("segmentation", "Segmentation", false),
    ("topic_detection", "Topic Detection", false),
    ("subtopic_detection", "Sub-topic Detection", false),
    ("topic_sentiments", "Topic Sentiment", true),
    ("topic_examples", "Topic Examples", true),
    ("tier_performance", "Fin Tier Performance", false),
    ("correlation", "Correlations", false),
    ("quality_insights", "Quality Insights", false),
    ("churn_risk", "Churn Risk", false),
    ("confidence_meta", "Confidence", false),
    ("trend", "Week-over-Week Trend", false),
];

/// The orchestrator's output payload. Snapshot extraction reads this shape.
pub fn build_output(
    analysis_id: &str,
    week_id: &str,
    period_start: NaiveDate,
    period_end: NaiveDate,
    total_conversations: usize,
    results: &BTreeMap<String, Value>,
) -> Value {
    json!({
        "analysis_id": analysis_id,
        "week_id": week_id,
        "period_start": period_start.format("%Y-%m-%d").to_string(),
        "period_end": period_end.format("%Y-%m-%d").to_string(),
        "total_conversations": total_conversations,
        "results": results,
    })
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Complete,
    Failed,
    NoData,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Complete => "complete",
            SectionStatus::Failed => "failed",
            SectionStatus::NoData => "no_data",
        }
    }
}

/// One phase's slot in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub key: String,
    pub title: String,
    pub status: SectionStatus,
    /// Mean confidence of the successful results in the slot.
    pub confidence: Option<f64>,
    pub errors: Vec<String>,
    pub limitations: Vec<String>,
}

impl ReportSection {
    /// Section for a slot holding one serialized agent result, or a
    /// `{member: result}` group when `grouped`.
    pub fn from_slot(key: &str, title: &str, grouped: bool, slot: Option<&Value>) -> Self {
        let mut section = Self {
            key: key.to_string(),
            title: title.to_string(),
            status: SectionStatus::NoData,
            confidence: None,
            errors: Vec::new(),
            limitations: Vec::new(),
        };

        let members: Vec<(Option<&str>, &Value)> = match (slot, grouped) {
            (None, _) | (Some(Value::Null), _) => Vec::new(),
            (Some(value), false) => vec![(None, value)],
            (Some(value), true) => value
                .as_object()
                .map(|m| m.iter().map(|(k, v)| (Some(k.as_str()), v)).collect())
                .unwrap_or_default(),
        };
        if members.is_empty() {
            return section;
        }

        let mut confidences = Vec::new();
        for (member, result) in members {
            let label = |text: &str| match member {
                Some(m) => format!("{}: {}", m, text),
                None => text.to_string(),
            };
            if result.get("success").and_then(Value::as_bool).unwrap_or(false) {
                confidences.push(result.get("confidence").and_then(Value::as_f64).unwrap_or(0.0));
                if let Some(items) = result.get("limitations").and_then(Value::as_array) {
                    section
                        .limitations
                        .extend(items.iter().filter_map(Value::as_str).map(|l| label(l)));
                }
            } else {
                let error = result
                    .get("error_message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                section.errors.push(label(error));
            }
        }

        if confidences.is_empty() {
            section.status = SectionStatus::Failed;
        } else {
            section.status = SectionStatus::Complete;
            section.confidence = Some(confidences.iter().sum::<f64>() / confidences.len() as f64);
        }
        section
    }
}

// ============================================================================
// Report
// ============================================================================

/// Everything a caller gets back from one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub analysis_id: String,
    pub week_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_conversations: usize,
    /// One section per slot, always in phase order.
    pub sections: Vec<ReportSection>,
    pub topics: Vec<TopicEntry>,
    /// Topics with zero volume that were not analysed.
    pub skipped_topics: Vec<String>,
    pub execution: ExecutionSummary,
    /// Absent when auto-save was disabled or failed.
    pub snapshot_id: Option<String>,
    /// Full merged payload, as snapshotted.
    pub output: Value,
}

impl AnalysisReport {
    pub fn sections_from_output(output: &Value) -> Vec<ReportSection> {
        let results = output.get("results");
        SLOTS
            .iter()
            .map(|(key, title, grouped)| {
                ReportSection::from_slot(key, title, *grouped, results.and_then(|r| r.get(*key)))
            })
            .collect()
    }

    pub fn section(&self, key: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.key == key)
    }

    /// Serialized sentiment insight for a topic, if that topic was analysed.
    fn insight(&self, topic: &str) -> Option<&str> {
        self.output
            .pointer(&format!("/results/topic_sentiments/{}/data/sentiment_insight", escape_pointer(topic)))
            .and_then(Value::as_str)
    }

    /// Plain-text rendering for terminals and files.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Support Analysis {}", self.week_id);
        let _ = writeln!(
            out,
            "\n{} to {} | {} conversations | run {}",
            self.period_start, self.period_end, self.total_conversations, self.analysis_id
        );
        match &self.snapshot_id {
            Some(id) => {
                let _ = writeln!(out, "Snapshot: {}", id);
            }
            None => {
                let _ = writeln!(out, "Snapshot: not saved");
            }
        }

        let _ = writeln!(out, "\n## Sections\n");
        for section in &self.sections {
            let confidence = section
                .confidence
                .map(|c| format!(" ({:.0}% confidence)", c * 100.0))
                .unwrap_or_default();
            let _ = writeln!(out, "- **{}**: {}{}", section.title, section.status.as_str(), confidence);
            for error in &section.errors {
                let _ = writeln!(out, "  - error: {}", error);
            }
        }

        let _ = writeln!(out, "\n## Topics\n");
        if self.topics.is_empty() {
            let _ = writeln!(out, "_No topics detected._");
        }
        for entry in &self.topics {
            match entry {
                TopicEntry::Analyzed {
                    topic,
                    sentiment_confidence,
                    example_count,
                    examples_error,
                } => {
                    let _ = writeln!(
                        out,
                        "### {}\n\n{}\n\nSentiment confidence {:.0}%, {} examples",
                        topic,
                        self.insight(topic).unwrap_or("(no insight)"),
                        sentiment_confidence * 100.0,
                        example_count
                    );
                    if let Some(error) = examples_error {
                        let _ = writeln!(out, "Example extraction failed: {}", error);
                    }
                    let _ = writeln!(out);
                }
                TopicEntry::Failed { topic, error } => {
                    let _ = writeln!(out, "### {}\n\nAnalysis failed: {}\n", topic, error);
                }
                TopicEntry::Empty { topic } => {
                    let _ = writeln!(out, "### {}\n\nNo conversations matched.\n", topic);
                }
            }
        }
        if !self.skipped_topics.is_empty() {
            let _ = writeln!(out, "Skipped (no volume): {}", self.skipped_topics.join(", "));
        }

        let limitations: Vec<&str> = self
            .sections
            .iter()
            .flat_map(|s| s.limitations.iter().map(String::as_str))
            .collect();
        if !limitations.is_empty() {
            let _ = writeln!(out, "\n## Limitations\n");
            for limitation in limitations {
                let _ = writeln!(out, "- {}", limitation);
            }
        }

        let _ = writeln!(
            out,
            "\n---\n{} agent runs, {} failed, {} ms total",
            self.execution.total_executions, self.execution.failed, self.execution.total_duration_ms
        );
        out
    }
}

/// RFC 6901 escaping for a single pointer segment.
fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentResult;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sections_cover_every_slot() {
        let mut results = BTreeMap::new();
        results.insert(
            "segmentation".to_string(),
            AgentResult::success("SegmentationAgent", json!({}), 0.9).to_json(),
        );
        results.insert(
            "trend".to_string(),
            AgentResult::failure("TrendAgent", "store down").to_json(),
        );
        results.insert(
            "topic_sentiments".to_string(),
            json!({
                "Billing": AgentResult::success("SentimentAgent", json!({}), 0.7).to_json(),
                "API": AgentResult::failure("SentimentAgent", "timeout").to_json(),
            }),
        );
        results.insert("topic_examples".to_string(), json!({}));
        let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let output = build_output("run", "2024_W23", day, day, 10, &results);

        let sections = AnalysisReport::sections_from_output(&output);
        assert_eq!(sections.len(), SLOTS.len());

        let status: BTreeMap<&str, SectionStatus> =
            sections.iter().map(|s| (s.key.as_str(), s.status)).collect();
        assert_eq!(status["segmentation"], SectionStatus::Complete);
        assert_eq!(status["trend"], SectionStatus::Failed);
        assert_eq!(status["topic_sentiments"], SectionStatus::Complete);
        assert_eq!(status["topic_examples"], SectionStatus::NoData);
        assert_eq!(status["churn_risk"], SectionStatus::NoData);

        let sentiments = sections.iter().find(|s| s.key == "topic_sentiments").unwrap();
        assert_eq!(sentiments.errors, vec!["API: timeout".to_string()]);
    }

    #[test]
    fn test_render_markdown() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let mut results = BTreeMap::new();
        results.insert(
            "topic_sentiments".to_string(),
            json!({"Billing": AgentResult::success(
                "SentimentAgent",
                json!({"sentiment_insight": "Refunds are slow"}),
                0.8
            ).to_json()}),
        );
        let output = build_output("run", "2024_W23", day, day, 10, &results);
        let report = AnalysisReport {
            analysis_id: "run".to_string(),
            week_id: "2024_W23".to_string(),
            period_start: day,
            period_end: day,
            total_conversations: 10,
            sections: AnalysisReport::sections_from_output(&output),
            topics: vec![
                TopicEntry::Analyzed {
                    topic: "Billing".to_string(),
                    sentiment_confidence: 0.8,
                    example_count: 2,
                    examples_error: None,
                },
                TopicEntry::Empty {
                    topic: "Export".to_string(),
                },
            ],
            skipped_topics: vec!["Credits".to_string()],
            execution: ExecutionSummary::default(),
            snapshot_id: None,
            output,
        };

        let text = report.render_markdown();
        assert!(text.contains("# Support Analysis 2024_W23"));
        assert!(text.contains("Refunds are slow"));
        assert!(text.contains("No conversations matched."));
        assert!(text.contains("Skipped (no volume): Credits"));
        assert!(text.contains("Snapshot: not saved"));
        assert!(text.contains("- **Churn Risk**: no_data"));
    }
}
