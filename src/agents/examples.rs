use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{into_result, Agent, AgentContext, AgentResult};
use crate::error::{AgentError, AgentOutcome};
use crate::langbase::{parse_completion, CompletionProvider, Message};
use crate::prompts::EXAMPLE_EXTRACTION_PROMPT;

const NAME: &str = "ExampleExtractionAgent";
/// Context key holding this topic's sentiment result.
pub const SENTIMENT_KEY: &str = "sentiment";
const TEXT_CHARS: usize = 600;
/// Conversations offered to the model per topic.
const CANDIDATE_LIMIT: usize = 30;

#[derive(Debug, Deserialize)]
struct ExampleResponse {
    #[serde(default)]
    examples: Vec<Example>,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Example {
    conversation_id: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    why_representative: String,
}

/// Picks representative conversations for a topic, guided by its sentiment insight.
pub struct ExampleExtractionAgent {
    provider: Arc<dyn CompletionProvider>,
    pipe: String,
    max_examples: usize,
}

impl ExampleExtractionAgent {
    pub fn new(provider: Arc<dyn CompletionProvider>, pipe: impl Into<String>, max_examples: usize) -> Self {
        Self {
            provider,
            pipe: pipe.into(),
            max_examples: max_examples.max(1),
        }
    }

    fn sentiment_insight(ctx: &AgentContext) -> Option<&str> {
        ctx.previous_data(SENTIMENT_KEY)?
            .get("sentiment_insight")
            .and_then(Value::as_str)
    }

    async fn analyze(&self, ctx: &AgentContext) -> AgentOutcome<AgentResult> {
        let topic = ctx.topic(NAME)?;
        let insight = Self::sentiment_insight(ctx).unwrap_or_default();

        let candidates: Vec<String> = ctx
            .conversations
            .iter()
            .take(CANDIDATE_LIMIT)
            .map(|c| format!("- [{}] {}", c.id, c.text.chars().take(TEXT_CHARS).collect::<String>()))
            .collect();

        let messages = vec![
            Message::system(EXAMPLE_EXTRACTION_PROMPT),
            Message::user(format!(
                "Topic: {}\nSentiment insight: {}\nReturn at most {} examples.\n\nConversations:\n{}",
                topic,
                insight,
                self.max_examples,
                candidates.join("\n")
            )),
        ];

        debug!(topic = %topic, candidates = candidates.len(), "Requesting topic examples");
        let completion = self.provider.complete(&self.pipe, messages).await?;
        let parsed: ExampleResponse = parse_completion(&completion)?;

        let known: HashSet<&str> = ctx.conversations.iter().map(|c| c.id.as_str()).collect();
        let (kept, dropped): (Vec<Example>, Vec<Example>) = parsed
            .examples
            .into_iter()
            .partition(|e| known.contains(e.conversation_id.as_str()));
        let dropped_ids: Vec<String> = dropped.into_iter().map(|e| e.conversation_id).collect();
        if !dropped_ids.is_empty() {
            warn!(topic = %topic, dropped = ?dropped_ids, "Model returned unknown conversation ids");
        }

        let mut examples = kept;
        examples.truncate(self.max_examples);

        let mut result = AgentResult::success(
            NAME,
            json!({
                "topic": topic,
                "examples": examples,
                "example_count": examples.len(),
                "dropped_ids": dropped_ids,
            }),
            parsed.confidence,
        )
        .with_source(format!("pipe:{}", self.pipe));

        if !dropped_ids.is_empty() {
            result = result.with_limitation(format!(
                "{} suggested examples referenced unknown conversations",
                dropped_ids.len()
            ));
        }
        if examples.is_empty() {
            result = result.with_limitation(format!("No usable examples for {}", topic));
        }
        Ok(result)
    }
}

#[async_trait]
impl Agent for ExampleExtractionAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn validate_input(&self, ctx: &AgentContext) -> AgentOutcome<()> {
        ctx.topic(NAME)?;
        if ctx.conversations.is_empty() {
            return Err(AgentError::InvalidInput {
                agent: NAME.to_string(),
                reason: "topic has no conversations".to_string(),
            });
        }
        if Self::sentiment_insight(ctx).is_none() {
            return Err(AgentError::InvalidInput {
                agent: NAME.to_string(),
                reason: "sentiment insight required".to_string(),
            });
        }
        Ok(())
    }

    async fn execute(&self, ctx: &AgentContext) -> AgentResult {
        into_result(NAME, self.analyze(ctx).await)
    }
}
