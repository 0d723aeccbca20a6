//! Analysis agents and their shared execution contract.
//!
//! Every agent implements [`Agent`]: `validate_input`, `execute` and
//! `validate_output`. [`run_agent`] applies the three in order and turns any
//! error into a failed [`AgentResult`], so nothing raises past the agent
//! boundary. Agents are either rule-based (segmentation, topics, tier
//! performance, the analytical insights) or LLM-backed through a
//! [`CompletionProvider`](crate::langbase::CompletionProvider).

mod confidence_meta;
mod examples;
mod insights;
mod segmentation;
mod sentiment;
mod tier_performance;
mod topics;
mod trend;

pub use confidence_meta::{ConfidenceMetaAgent, COMPLETENESS_KEY};
pub use examples::{ExampleExtractionAgent, SENTIMENT_KEY};
pub use insights::{ChurnRiskAgent, CorrelationAgent, QualityInsightsAgent};
pub use segmentation::{classify_conversation, AgentType, Segment, SegmentationAgent};
pub use sentiment::SentimentAgent;
pub use tier_performance::{TierPerformanceAgent, SEGMENTATION_KEY};
pub use topics::{standard_taxonomy, SubTopicDetectionAgent, TopicDefinition, TopicDetectionAgent};
pub use trend::{TrendAgent, ANALYSIS_OUTPUT_KEY};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::{AgentError, AgentOutcome};
use crate::models::{Conversation, TopicAssignments};

/// Metadata key naming the topic a per-topic agent works on.
pub const TOPIC_KEY: &str = "topic";
/// Metadata key carrying the snapshot analysis type.
pub const ANALYSIS_TYPE_KEY: &str = "analysis_type";

// ============================================================================
// Agent Result
// ============================================================================

/// Coarse confidence bucket derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    /// >= 0.8 is HIGH, >= 0.6 is MEDIUM, anything else LOW.
    pub fn from_score(confidence: f64) -> Self {
        if confidence >= 0.8 {
            ConfidenceLevel::High
        } else if confidence >= 0.6 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// Uniform output of every agent, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub success: bool,
    /// Agent-specific payload; `{"error": ...}` on failure.
    pub data: Value,
    /// 0.0-1.0
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub limitations: Vec<String>,
    pub sources: Vec<String>,
    /// Seconds.
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AgentResult {
    /// Successful result; confidence is clamped to 0.0-1.0.
    pub fn success(agent_name: impl Into<String>, data: Value, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            agent_name: agent_name.into(),
            success: true,
            data,
            confidence,
            confidence_level: ConfidenceLevel::from_score(confidence),
            limitations: Vec::new(),
            sources: Vec::new(),
            execution_time: 0.0,
            error_message: None,
        }
    }

    /// Failed result carrying the error message.
    pub fn failure(agent_name: impl Into<String>, error: impl fmt::Display) -> Self {
        let message = error.to_string();
        Self {
            agent_name: agent_name.into(),
            success: false,
            data: serde_json::json!({ "error": message }),
            confidence: 0.0,
            confidence_level: ConfidenceLevel::Low,
            limitations: Vec::new(),
            sources: Vec::new(),
            execution_time: 0.0,
            error_message: Some(message),
        }
    }

    /// Add a caveat
    pub fn with_limitation(mut self, limitation: impl Into<String>) -> Self {
        self.limitations.push(limitation.into());
        self
    }

    /// Add several caveats
    pub fn with_limitations<I, S>(mut self, limitations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.limitations
            .extend(limitations.into_iter().map(Into::into));
        self
    }

    /// Record where the data came from
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Serialized form used in reports and downstream agent contexts.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "agent_name": self.agent_name,
                "success": false,
                "error_message": format!("result serialization failed: {}", e),
            })
        })
    }
}

// ============================================================================
// Agent Context
// ============================================================================

/// Everything an agent may read. Agents never mutate the conversations.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub analysis_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub week_id: String,
    pub conversations: Arc<Vec<Conversation>>,
    pub topics: Arc<TopicAssignments>,
    /// Serialized results of earlier phases, keyed by report slot.
    pub previous_results: BTreeMap<String, Value>,
    pub metadata: BTreeMap<String, String>,
}

impl AgentContext {
    pub fn new(
        analysis_id: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        week_id: impl Into<String>,
        conversations: Arc<Vec<Conversation>>,
    ) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            start_date,
            end_date,
            week_id: week_id.into(),
            conversations,
            topics: Arc::new(TopicAssignments::new()),
            previous_results: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Same context over a different conversation set
    pub fn with_conversations(&self, conversations: Vec<Conversation>) -> Self {
        let mut ctx = self.clone();
        ctx.conversations = Arc::new(conversations);
        ctx
    }

    /// Attach the topic side-table
    pub fn with_topics(mut self, topics: Arc<TopicAssignments>) -> Self {
        self.topics = topics;
        self
    }

    /// Attach an earlier phase's result
    pub fn with_result(mut self, key: impl Into<String>, result: &AgentResult) -> Self {
        self.previous_results.insert(key.into(), result.to_json());
        self
    }

    /// Attach an arbitrary earlier value
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.previous_results.insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// `data` of an earlier result, only if that result succeeded.
    pub fn previous_data(&self, key: &str) -> Option<&Value> {
        let result = self.previous_results.get(key)?;
        match result.get("success").and_then(Value::as_bool) {
            Some(false) => None,
            Some(true) => result.get("data"),
            None => Some(result),
        }
    }

    /// The topic a per-topic agent should analyse.
    pub fn topic(&self, agent: &str) -> AgentOutcome<&str> {
        self.metadata(TOPIC_KEY).ok_or_else(|| AgentError::InvalidInput {
            agent: agent.to_string(),
            reason: "no topic supplied".to_string(),
        })
    }
}

// ============================================================================
// Agent Contract
// ============================================================================

/// A unit of analysis with a validate/execute/validate contract.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Agent name as shown in reports
    fn name(&self) -> &str;

    /// Reject contexts the agent cannot work with. Defaults to requiring conversations.
    fn validate_input(&self, ctx: &AgentContext) -> AgentOutcome<()> {
        if ctx.conversations.is_empty() {
            return Err(AgentError::InvalidInput {
                agent: self.name().to_string(),
                reason: "no conversations supplied".to_string(),
            });
        }
        Ok(())
    }

    /// Run the analysis. Internal errors must come back as a failed result.
    async fn execute(&self, ctx: &AgentContext) -> AgentResult;

    /// Reject malformed successful results.
    fn validate_output(&self, result: &AgentResult) -> AgentOutcome<()> {
        if !(0.0..=1.0).contains(&result.confidence) {
            return Err(AgentError::InvalidOutput {
                agent: self.name().to_string(),
                reason: format!("confidence {} outside 0.0-1.0", result.confidence),
            });
        }
        if result.data.is_null() {
            return Err(AgentError::InvalidOutput {
                agent: self.name().to_string(),
                reason: "empty data".to_string(),
            });
        }
        Ok(())
    }
}

/// Run an agent through its full contract, timing it.
pub async fn run_agent(agent: &dyn Agent, ctx: &AgentContext) -> AgentResult {
    let start = Instant::now();

    let mut result = match agent.validate_input(ctx) {
        Ok(()) => agent.execute(ctx).await,
        Err(e) => {
            warn!(agent = %agent.name(), error = %e, "Agent input rejected");
            AgentResult::failure(agent.name(), &e)
        }
    };

    if result.success {
        if let Err(e) = agent.validate_output(&result) {
            warn!(agent = %agent.name(), error = %e, "Agent output rejected");
            result = AgentResult::failure(agent.name(), &e);
        }
    }

    result.execution_time = start.elapsed().as_secs_f64();
    debug!(
        agent = %agent.name(),
        success = result.success,
        confidence = result.confidence,
        elapsed_ms = start.elapsed().as_millis(),
        "Agent finished"
    );
    result
}

/// Convert an internal outcome into the result contract.
pub(crate) fn into_result(agent: &str, outcome: AgentOutcome<AgentResult>) -> AgentResult {
    outcome.unwrap_or_else(|e| {
        warn!(agent = %agent, error = %e, "Agent execution failed");
        AgentResult::failure(agent, &e)
    })
}

/// Share helper: `part / whole`, 0.0 for an empty whole.
pub(crate) fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Median of unsorted values.
pub(crate) fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Round to two decimals for presentation.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
