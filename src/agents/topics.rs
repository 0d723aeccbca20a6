use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::{into_result, ratio, round2, Agent, AgentContext, AgentResult};
use crate::error::{AgentError, AgentOutcome};
use crate::langbase::{parse_completion, CompletionProvider, Message};
use crate::models::Conversation;
use crate::prompts::SUBTOPIC_THEMES_PROMPT;

const TOPIC_NAME: &str = "TopicDetectionAgent";
const SUBTOPIC_NAME: &str = "SubTopicDetectionAgent";

/// Bucket for conversations that match no sub-topic.
const GENERAL_SUBTOPIC: &str = "General";
/// Sub-topics below this size are not sent for theme discovery.
const MIN_THEME_CONVERSATIONS: usize = 3;
/// Upper bound on theme discovery calls per run.
const MAX_THEME_CALLS: usize = 6;
/// Characters of conversation text sent per conversation.
const THEME_TEXT_CHARS: usize = 400;

/// A named topic and the keywords that identify it.
#[derive(Debug, Clone)]
pub struct TopicDefinition {
    pub name: String,
    pub keywords: Vec<String>,
    /// Second-level topics inside this one.
    pub subtopics: Vec<TopicDefinition>,
}

impl TopicDefinition {
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            subtopics: Vec::new(),
        }
    }

    pub fn with_subtopic(mut self, name: &str, keywords: &[&str]) -> Self {
        self.subtopics.push(TopicDefinition::new(name, keywords));
        self
    }
}

/// Default support taxonomy.
pub fn standard_taxonomy() -> Vec<TopicDefinition> {
    vec![
        TopicDefinition::new(
            "Billing",
            &["refund", "invoice", "charge", "charged", "billing", "payment", "subscription", "receipt"],
        )
        .with_subtopic("Refund", &["refund", "money back"])
        .with_subtopic("Invoice", &["invoice", "receipt", "vat"])
        .with_subtopic("Failed payment", &["declined", "payment failed", "card"]),
        TopicDefinition::new(
            "Account",
            &["login", "log in", "password", "sign in", "2fa", "account access", "locked out"],
        )
        .with_subtopic("Password reset", &["password", "reset"])
        .with_subtopic("Two-factor", &["2fa", "authenticator", "verification code"])
        .with_subtopic("Lockout", &["locked out", "can't log in", "cannot log in"]),
        TopicDefinition::new("API", &["api", "endpoint", "rate limit", "webhook", "sdk", "api key"])
            .with_subtopic("Authentication", &["api key", "token", "unauthorized", "401"])
            .with_subtopic("Rate limits", &["rate limit", "429", "throttle"])
            .with_subtopic("Webhooks", &["webhook", "callback"]),
        TopicDefinition::new("Bug", &["bug", "error", "crash", "broken", "not working", "glitch"])
            .with_subtopic("Crash", &["crash", "freeze", "frozen"])
            .with_subtopic("Error message", &["error"]),
        TopicDefinition::new("Export", &["export", "download", "pdf", "pptx"])
            .with_subtopic("PDF", &["pdf"])
            .with_subtopic("PowerPoint", &["pptx", "powerpoint"]),
        TopicDefinition::new("Credits", &["credits", "usage limit", "out of credits", "quota"]),
        TopicDefinition::new(
            "Cancellation",
            &["cancel", "cancellation", "downgrade", "delete my account", "unsubscribe"],
        ),
        TopicDefinition::new(
            "Product Question",
            &["how do i", "how to", "is it possible", "feature", "where can i"],
        ),
    ]
}

/// Keyword topic with its compiled matcher.
struct CompiledTopic {
    name: String,
    matcher: Regex,
    subtopics: Vec<CompiledTopic>,
}

impl CompiledTopic {
    fn compile(def: &TopicDefinition, agent: &str) -> AgentOutcome<Self> {
        let alternatives: Vec<String> = def.keywords.iter().map(|k| regex::escape(&k.to_lowercase())).collect();
        let pattern = format!(r"\b(?:{})\b", alternatives.join("|"));
        let matcher = Regex::new(&pattern).map_err(|e| AgentError::InvalidInput {
            agent: agent.to_string(),
            reason: format!("invalid keywords for topic {}: {}", def.name, e),
        })?;
        let subtopics = def
            .subtopics
            .iter()
            .map(|s| CompiledTopic::compile(s, agent))
            .collect::<AgentOutcome<Vec<_>>>()?;
        Ok(Self {
            name: def.name.clone(),
            matcher,
            subtopics,
        })
    }

    fn matches(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }
}

fn compile_taxonomy(taxonomy: &[TopicDefinition], agent: &str) -> AgentOutcome<Vec<CompiledTopic>> {
    if taxonomy.is_empty() {
        return Err(AgentError::InvalidInput {
            agent: agent.to_string(),
            reason: "empty taxonomy".to_string(),
        });
    }
    taxonomy.iter().map(|t| CompiledTopic::compile(t, agent)).collect()
}

// ============================================================================
// Topic Detection
// ============================================================================

/// Multi-label keyword topic detection over every conversation.
pub struct TopicDetectionAgent {
    topics: Vec<CompiledTopic>,
}

impl TopicDetectionAgent {
    pub fn new(taxonomy: &[TopicDefinition]) -> AgentOutcome<Self> {
        Ok(Self {
            topics: compile_taxonomy(taxonomy, TOPIC_NAME)?,
        })
    }

    fn detect(&self, conv: &Conversation) -> Vec<String> {
        let text = conv.searchable_text();
        self.topics
            .iter()
            .filter(|t| t.matches(&text))
            .map(|t| t.name.clone())
            .collect()
    }
}

#[async_trait]
impl Agent for TopicDetectionAgent {
    fn name(&self) -> &str {
        TOPIC_NAME
    }

    async fn execute(&self, ctx: &AgentContext) -> AgentResult {
        let total = ctx.conversations.len();
        let mut volumes: BTreeMap<&str, usize> = self.topics.iter().map(|t| (t.name.as_str(), 0)).collect();
        let mut assignments = Map::new();
        let mut unclassified = 0usize;

        for conv in ctx.conversations.iter() {
            let detected = self.detect(conv);
            if detected.is_empty() {
                unclassified += 1;
            }
            for topic in &detected {
                if let Some(count) = volumes.get_mut(topic.as_str()) {
                    *count += 1;
                }
            }
            assignments.insert(conv.id.clone(), json!(detected));
        }

        let distribution: Map<String, Value> = volumes
            .iter()
            .filter(|(_, volume)| **volume > 0)
            .map(|(topic, volume)| {
                (
                    topic.to_string(),
                    json!({
                        "volume": volume,
                        "percentage": round2(ratio(*volume, total) * 100.0),
                    }),
                )
            })
            .collect();

        let classified_share = 1.0 - ratio(unclassified, total);
        info!(
            topics = distribution.len(),
            unclassified = unclassified,
            "Topic detection complete"
        );

        let mut result = AgentResult::success(
            TOPIC_NAME,
            json!({
                "topic_distribution": distribution,
                "assignments": assignments,
                "unclassified": unclassified,
            }),
            0.5 + 0.45 * classified_share,
        )
        .with_source("keyword taxonomy over conversation text and tags");

        if unclassified > 0 {
            result = result.with_limitation(format!(
                "{} of {} conversations matched no topic",
                unclassified, total
            ));
        }
        result
    }
}

// ============================================================================
// Sub-topic Detection
// ============================================================================

#[derive(Debug, Deserialize)]
struct ThemeResponse {
    #[serde(default)]
    themes: Vec<Theme>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct Theme {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    conversation_count: u64,
}

/// Tier-2 keyword sub-topics inside each detected topic, plus tier-3
/// themes from an LLM pipe. Theme discovery is best effort.
pub struct SubTopicDetectionAgent {
    topics: Vec<CompiledTopic>,
    provider: Arc<dyn CompletionProvider>,
    pipe: String,
}

impl SubTopicDetectionAgent {
    pub fn new(
        taxonomy: &[TopicDefinition],
        provider: Arc<dyn CompletionProvider>,
        pipe: impl Into<String>,
    ) -> AgentOutcome<Self> {
        Ok(Self {
            topics: compile_taxonomy(taxonomy, SUBTOPIC_NAME)?,
            provider,
            pipe: pipe.into(),
        })
    }

    async fn discover_themes(
        &self,
        topic: &str,
        subtopic: &str,
        conversations: &[&Conversation],
    ) -> AgentOutcome<Vec<Theme>> {
        let listing: Vec<String> = conversations
            .iter()
            .map(|c| format!("- [{}] {}", c.id, c.text.chars().take(THEME_TEXT_CHARS).collect::<String>()))
            .collect();
        let messages = vec![
            Message::system(SUBTOPIC_THEMES_PROMPT),
            Message::user(format!(
                "Topic: {}\nSub-topic: {}\n\nConversations:\n{}",
                topic,
                subtopic,
                listing.join("\n")
            )),
        ];
        let completion = self.provider.complete(&self.pipe, messages).await?;
        let parsed: ThemeResponse = parse_completion(&completion)?;
        Ok(parsed.themes)
    }

    async fn analyze(&self, ctx: &AgentContext) -> AgentOutcome<AgentResult> {
        // topic -> subtopic -> conversations
        let mut grouped: BTreeMap<&str, BTreeMap<&str, Vec<&Conversation>>> = BTreeMap::new();

        for conv in ctx.conversations.iter() {
            let text = conv.searchable_text();
            for topic_name in ctx.topics.detected_topics(&conv.id) {
                let Some(topic) = self.topics.iter().find(|t| &t.name == topic_name) else {
                    continue;
                };
                let matched: Vec<&str> = topic
                    .subtopics
                    .iter()
                    .filter(|s| s.matches(&text))
                    .map(|s| s.name.as_str())
                    .collect();
                let by_subtopic = grouped.entry(topic.name.as_str()).or_default();
                if matched.is_empty() {
                    by_subtopic.entry(GENERAL_SUBTOPIC).or_default().push(conv);
                }
                for subtopic in matched {
                    by_subtopic.entry(subtopic).or_default().push(conv);
                }
            }
        }

        let mut limitations = Vec::new();
        let mut theme_calls = 0usize;
        let mut hierarchy = Map::new();

        for (topic, by_subtopic) in &grouped {
            let mut subtopics = Map::new();
            for (subtopic, conversations) in by_subtopic {
                let mut themes = Vec::new();
                if conversations.len() >= MIN_THEME_CONVERSATIONS && theme_calls < MAX_THEME_CALLS {
                    theme_calls += 1;
                    match self.discover_themes(topic, subtopic, conversations).await {
                        Ok(found) => themes = found,
                        Err(e) => {
                            warn!(topic = %topic, subtopic = %subtopic, error = %e, "Theme discovery failed");
                            limitations.push(format!("No themes for {} / {}: {}", topic, subtopic, e));
                        }
                    }
                }
                subtopics.insert(
                    subtopic.to_string(),
                    json!({ "volume": conversations.len(), "themes": themes }),
                );
            }
            hierarchy.insert(topic.to_string(), Value::Object(subtopics));
        }

        let confidence = if limitations.is_empty() { 0.8 } else { 0.6 };
        Ok(AgentResult::success(
            SUBTOPIC_NAME,
            json!({ "subtopics": hierarchy, "theme_calls": theme_calls }),
            confidence,
        )
        .with_source("keyword sub-topics")
        .with_source(format!("pipe:{}", self.pipe))
        .with_limitations(limitations))
    }
}

#[async_trait]
impl Agent for SubTopicDetectionAgent {
    fn name(&self) -> &str {
        SUBTOPIC_NAME
    }

    fn validate_input(&self, ctx: &AgentContext) -> AgentOutcome<()> {
        if ctx.conversations.is_empty() {
            return Err(AgentError::InvalidInput {
                agent: SUBTOPIC_NAME.to_string(),
                reason: "no paid conversations supplied".to_string(),
            });
        }
        if ctx.topics.is_empty() {
            return Err(AgentError::InvalidInput {
                agent: SUBTOPIC_NAME.to_string(),
                reason: "no topic assignments available".to_string(),
            });
        }
        Ok(())
    }

    async fn execute(&self, ctx: &AgentContext) -> AgentResult {
        into_result(SUBTOPIC_NAME, self.analyze(ctx).await)
    }
}
