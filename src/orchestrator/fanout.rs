//! Bounded per-topic fan-out.
//!
//! Each topic with non-zero volume gets one spawned task that holds a
//! semaphore permit while it runs sentiment and then example extraction.
//! Zero-volume topics never get a task. A panicking or failing topic only
//! affects its own [`TopicOutcome`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::monitor::ExecutionMonitor;
use crate::agents::{run_agent, Agent, AgentContext, AgentResult, SENTIMENT_KEY, TOPIC_KEY};
use crate::error::AgentError;
use crate::models::Conversation;

/// Phase name recorded in the execution monitor.
pub const TOPIC_PHASE: &str = "topic_fanout";

/// What one topic task produced.
#[derive(Debug)]
pub struct TopicOutcome {
    pub topic: String,
    /// `None` when the topic had no conversations; `Err` when the task died.
    pub sentiment: Option<Result<AgentResult, AgentError>>,
    /// Only present when sentiment succeeded.
    pub examples: Option<AgentResult>,
}

impl TopicOutcome {
    pub fn empty(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            sentiment: None,
            examples: None,
        }
    }

    fn aborted(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            sentiment: Some(Err(AgentError::Aborted {
                agent: TOPIC_PHASE.to_string(),
                message: message.into(),
            })),
            examples: None,
        }
    }
}

/// Report entry for one topic. Failure and absence of data are never conflated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TopicEntry {
    Analyzed {
        topic: String,
        sentiment_confidence: f64,
        example_count: usize,
        /// Set when sentiment succeeded but example extraction did not.
        examples_error: Option<String>,
    },
    Failed {
        topic: String,
        error: String,
    },
    Empty {
        topic: String,
    },
}

impl TopicEntry {
    pub fn classify(outcome: &TopicOutcome) -> Self {
        let topic = outcome.topic.clone();
        match &outcome.sentiment {
            None => TopicEntry::Empty { topic },
            Some(Err(e)) => TopicEntry::Failed {
                topic,
                error: e.to_string(),
            },
            Some(Ok(sentiment)) if !sentiment.success => TopicEntry::Failed {
                topic,
                error: sentiment
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "sentiment failed".to_string()),
            },
            Some(Ok(sentiment)) => {
                let (example_count, examples_error) = match &outcome.examples {
                    Some(ex) if ex.success => (
                        ex.data
                            .get("example_count")
                            .and_then(serde_json::Value::as_u64)
                            .unwrap_or(0) as usize,
                        None,
                    ),
                    Some(ex) => (0, ex.error_message.clone()),
                    None => (0, None),
                };
                TopicEntry::Analyzed {
                    topic,
                    sentiment_confidence: sentiment.confidence,
                    example_count,
                    examples_error,
                }
            }
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            TopicEntry::Analyzed { topic, .. }
            | TopicEntry::Failed { topic, .. }
            | TopicEntry::Empty { topic } => topic,
        }
    }
}

/// Work done for a single topic while holding a permit.
#[async_trait]
pub trait TopicWorker: Send + Sync {
    async fn analyze_topic(&self, topic: &str) -> TopicOutcome;
}

/// Run `worker` for every topic with non-zero volume, at most `width` at a time.
///
/// Returns one outcome per spawned topic in topic order, plus the names of
/// zero-volume topics that were skipped.
pub async fn fan_out_topics(
    volumes: &BTreeMap<String, u64>,
    width: usize,
    worker: Arc<dyn TopicWorker>,
) -> (Vec<TopicOutcome>, Vec<String>) {
    let (active, skipped): (Vec<_>, Vec<_>) = volumes.iter().partition(|(_, volume)| **volume > 0);
    let topics: Vec<String> = active.into_iter().map(|(topic, _)| topic.clone()).collect();
    let skipped: Vec<String> = skipped.into_iter().map(|(topic, _)| topic.clone()).collect();

    let semaphore = Arc::new(Semaphore::new(width.max(1)));
    info!(
        topics = topics.len(),
        skipped = skipped.len(),
        width = width.max(1),
        "Starting per-topic fan-out"
    );

    let handles: Vec<_> = topics
        .iter()
        .map(|topic| {
            let semaphore = Arc::clone(&semaphore);
            let worker = Arc::clone(&worker);
            let topic = topic.clone();
            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return TopicOutcome::aborted(topic, e.to_string()),
                };
                worker.analyze_topic(&topic).await
            })
        })
        .collect();

    let outcomes = topics
        .into_iter()
        .zip(join_all(handles).await)
        .map(|(topic, joined)| match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Topic task did not complete");
                TopicOutcome::aborted(topic, e.to_string())
            }
        })
        .collect();

    (outcomes, skipped)
}

/// Sentiment then example extraction over one topic's conversations.
pub struct SentimentExamplesWorker {
    pub sentiment: Arc<dyn Agent>,
    pub examples: Arc<dyn Agent>,
    /// Run context carrying the full conversation set and topic table.
    pub context: AgentContext,
    pub monitor: ExecutionMonitor,
}

#[async_trait]
impl TopicWorker for SentimentExamplesWorker {
    async fn analyze_topic(&self, topic: &str) -> TopicOutcome {
        let conversations: Vec<Conversation> = self
            .context
            .topics
            .conversations_for(topic, &self.context.conversations)
            .into_iter()
            .cloned()
            .collect();
        if conversations.is_empty() {
            debug!(topic = %topic, "Topic has volume but no matching conversations");
            return TopicOutcome::empty(topic);
        }

        let ctx = self
            .context
            .with_conversations(conversations)
            .with_metadata(TOPIC_KEY, topic);

        let sentiment = run_agent(self.sentiment.as_ref(), &ctx).await;
        self.monitor.record(TOPIC_PHASE, Some(topic), &sentiment).await;
        if !sentiment.success {
            return TopicOutcome {
                topic: topic.to_string(),
                sentiment: Some(Ok(sentiment)),
                examples: None,
            };
        }

        let ctx = ctx.with_result(SENTIMENT_KEY, &sentiment);
        let examples = run_agent(self.examples.as_ref(), &ctx).await;
        self.monitor.record(TOPIC_PHASE, Some(topic), &examples).await;

        TopicOutcome {
            topic: topic.to_string(),
            sentiment: Some(Ok(sentiment)),
            examples: Some(examples),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classification_is_three_way() {
        let ok = AgentResult::success("SentimentAgent", json!({}), 0.8);
        let examples = AgentResult::success("ExampleExtractionAgent", json!({"example_count": 2}), 0.7);

        let analyzed = TopicEntry::classify(&TopicOutcome {
            topic: "Billing".to_string(),
            sentiment: Some(Ok(ok)),
            examples: Some(examples),
        });
        assert_eq!(
            analyzed,
            TopicEntry::Analyzed {
                topic: "Billing".to_string(),
                sentiment_confidence: 0.8,
                example_count: 2,
                examples_error: None,
            }
        );

        let failed = TopicEntry::classify(&TopicOutcome {
            topic: "API".to_string(),
            sentiment: Some(Ok(AgentResult::failure("SentimentAgent", "bad json"))),
            examples: None,
        });
        assert!(matches!(failed, TopicEntry::Failed { ref error, .. } if error == "bad json"));

        let aborted = TopicEntry::classify(&TopicOutcome::aborted("Bug", "panicked"));
        assert!(matches!(aborted, TopicEntry::Failed { .. }));

        let empty = TopicEntry::classify(&TopicOutcome::empty("Export"));
        assert_eq!(empty.topic(), "Export");
        assert!(matches!(empty, TopicEntry::Empty { .. }));
    }

    #[test]
    fn test_entry_serializes_with_status_tag() {
        let entry = TopicEntry::Empty {
            topic: "Export".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({"status": "empty", "topic": "Export"})
        );
    }
}
