use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::{into_result, Agent, AgentContext, AgentResult};
use crate::error::{AgentError, AgentOutcome};
use crate::langbase::{parse_completion, CompletionProvider, Message};
use crate::prompts::SENTIMENT_PROMPT;

const NAME: &str = "SentimentAgent";
const TEXT_CHARS: usize = 500;
/// Below this sample size the result carries a limitation.
const SMALL_SAMPLE: usize = 5;

#[derive(Debug, Deserialize)]
struct SentimentResponse {
    sentiment_insight: String,
    positive: f64,
    negative: f64,
    #[serde(default)]
    neutral: Option<f64>,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.7
}

/// LLM sentiment over a sample of one topic's conversations.
pub struct SentimentAgent {
    provider: Arc<dyn CompletionProvider>,
    pipe: String,
    sample_size: usize,
}

impl SentimentAgent {
    pub fn new(provider: Arc<dyn CompletionProvider>, pipe: impl Into<String>, sample_size: usize) -> Self {
        Self {
            provider,
            pipe: pipe.into(),
            sample_size: sample_size.max(1),
        }
    }

    async fn analyze(&self, ctx: &AgentContext) -> AgentOutcome<AgentResult> {
        let topic = ctx.topic(NAME)?;
        let sample: Vec<String> = ctx
            .conversations
            .iter()
            .take(self.sample_size)
            .map(|c| format!("- [{}] {}", c.id, c.text.chars().take(TEXT_CHARS).collect::<String>()))
            .collect();

        let messages = vec![
            Message::system(SENTIMENT_PROMPT),
            Message::user(format!("Topic: {}\n\nConversations:\n{}", topic, sample.join("\n"))),
        ];

        debug!(topic = %topic, sample = sample.len(), "Requesting topic sentiment");
        let completion = self.provider.complete(&self.pipe, messages).await?;
        let parsed: SentimentResponse = parse_completion(&completion)?;

        let (positive, negative, neutral) = normalize(parsed.positive, parsed.negative, parsed.neutral)
            .ok_or_else(|| AgentError::InvalidOutput {
                agent: NAME.to_string(),
                reason: format!(
                    "sentiment fractions out of range: positive={} negative={}",
                    parsed.positive, parsed.negative
                ),
            })?;

        let mut result = AgentResult::success(
            NAME,
            json!({
                "topic": topic,
                "sentiment_insight": parsed.sentiment_insight,
                "positive": positive,
                "negative": negative,
                "neutral": neutral,
                "sample_size": sample.len(),
                "conversation_count": ctx.conversations.len(),
            }),
            parsed.confidence,
        )
        .with_source(format!("pipe:{}", self.pipe));

        if sample.len() < SMALL_SAMPLE {
            result = result.with_limitation(format!(
                "Only {} conversations sampled for {}",
                sample.len(),
                topic
            ));
        }
        if sample.len() < ctx.conversations.len() {
            result = result.with_limitation(format!(
                "Sentiment estimated from {} of {} conversations",
                sample.len(),
                ctx.conversations.len()
            ));
        }
        Ok(result)
    }
}

/// Scale fractions to sum to 1.0; `None` if any is negative or non-finite.
fn normalize(positive: f64, negative: f64, neutral: Option<f64>) -> Option<(f64, f64, f64)> {
    let neutral = neutral.unwrap_or_else(|| (1.0 - positive - negative).max(0.0));
    let parts = [positive, negative, neutral];
    if parts.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return None;
    }
    let total: f64 = parts.iter().sum();
    if total <= 0.0 {
        return None;
    }
    Some((positive / total, negative / total, neutral / total))
}

#[async_trait]
impl Agent for SentimentAgent {
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
        Ok(())
    }

    async fn execute(&self, ctx: &AgentContext) -> AgentResult {
        into_result(NAME, self.analyze(ctx).await)
    }

    fn validate_output(&self, result: &AgentResult) -> AgentOutcome<()> {
        for key in ["positive", "negative"] {
            let in_range = result.data[key]
                .as_f64()
                .map_or(false, |v| (0.0..=1.0).contains(&v));
            if !in_range {
                return Err(AgentError::InvalidOutput {
                    agent: NAME.to_string(),
                    reason: format!("{} missing or outside 0.0-1.0", key),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{run_agent, TOPIC_KEY};
    use crate::error::LangbaseResult;
    use crate::models::Conversation;
    use chrono::NaiveDate;

    struct Canned(&'static str);

    #[async_trait]
    impl CompletionProvider for Canned {
        async fn complete(&self, _pipe: &str, _messages: Vec<Message>) -> LangbaseResult<String> {
            Ok(self.0.to_string())
        }
    }

    fn ctx(n: usize) -> AgentContext {
        let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let conversations = (0..n).map(|i| Conversation::new(format!("c{}", i), "refund")).collect();
        AgentContext::new("run", day, day, "2024_W23", Arc::new(conversations))
            .with_metadata(TOPIC_KEY, "Billing")
    }

    #[tokio::test]
    async fn test_sentiment_parses_fenced_json() {
        let provider = Arc::new(Canned(
            "```json\n{\"sentiment_insight\": \"Refund delays frustrate users\", \"positive\": 0.2, \"negative\": 0.6, \"neutral\": 0.2, \"confidence\": 0.85}\n```",
        ));
        let agent = SentimentAgent::new(provider, "sentiment", 25);
        let result = run_agent(&agent, &ctx(10)).await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.data["topic"], "Billing");
        assert!((result.data["negative"].as_f64().unwrap() - 0.6).abs() < 1e-9);
        assert_eq!(result.confidence, 0.85);
        assert!(result.limitations.is_empty());
    }

    #[tokio::test]
    async fn test_sentiment_without_topic_fails_at_input() {
        let provider = Arc::new(Canned("{}"));
        let agent = SentimentAgent::new(provider, "sentiment", 25);
        let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let context = AgentContext::new(
            "run",
            day,
            day,
            "2024_W23",
            Arc::new(vec![Conversation::new("c1", "x")]),
        );
        let result = run_agent(&agent, &context).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("no topic"));
    }

    #[tokio::test]
    async fn test_garbage_completion_is_a_failed_result() {
        let provider = Arc::new(Canned("I think people are mostly happy."));
        let agent = SentimentAgent::new(provider, "sentiment", 25);
        let result = run_agent(&agent, &ctx(3)).await;
        assert!(!result.success);
    }

    #[test]
    fn test_normalize() {
        let (p, n, u) = normalize(0.4, 0.4, Some(0.4)).unwrap();
        assert!((p + n + u - 1.0).abs() < 1e-9);
        assert!(normalize(-0.1, 0.5, None).is_none());
        let (_, _, neutral) = normalize(0.3, 0.5, None).unwrap();
        assert!((neutral - 0.2).abs() < 1e-9);
    }
}
