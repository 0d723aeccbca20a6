//! Conversation records and the per-run topic side-table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A single support conversation as exported from Intercom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Intercom conversation id.
    pub id: String,
    /// Customer subscription tier (free, pro, plus, ultra, ...).
    #[serde(default)]
    pub tier: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Intercom state: open, closed, snoozed.
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub admin_assignee_id: Option<String>,
    #[serde(default)]
    pub assignee_email: Option<String>,
    #[serde(default)]
    pub assignee_name: Option<String>,
    /// Whether the Fin AI agent took part in the conversation.
    #[serde(default)]
    pub ai_agent_participated: bool,
    #[serde(default)]
    pub reopen_count: u32,
    #[serde(default)]
    pub admin_reply_count: u32,
    /// Customer satisfaction rating (1-5).
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Concatenated customer-visible text of the conversation.
    #[serde(default)]
    pub text: String,
}

fn default_state() -> String {
    "open".to_string()
}

impl Conversation {
    /// Minimal conversation, mostly useful for tests and fixtures.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tier: None,
            created_at: Utc::now(),
            closed_at: None,
            state: default_state(),
            admin_assignee_id: None,
            assignee_email: None,
            assignee_name: None,
            ai_agent_participated: false,
            reopen_count: 0,
            admin_reply_count: 0,
            rating: None,
            tags: Vec::new(),
            text: text.into(),
        }
    }

    /// Set the subscription tier
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    /// Set the human assignee
    pub fn with_admin(
        mut self,
        admin_id: impl Into<String>,
        email: Option<&str>,
        name: Option<&str>,
    ) -> Self {
        self.admin_assignee_id = Some(admin_id.into());
        self.assignee_email = email.map(str::to_string);
        self.assignee_name = name.map(str::to_string);
        self
    }

    /// Mark the conversation as handled by Fin
    pub fn with_ai_agent(mut self) -> Self {
        self.ai_agent_participated = true;
        self
    }

    /// Close the conversation after `hours`
    pub fn closed_after_hours(mut self, hours: i64) -> Self {
        self.state = "closed".to_string();
        self.closed_at = Some(self.created_at + chrono::Duration::hours(hours));
        self
    }

    pub fn is_closed(&self) -> bool {
        self.state.eq_ignore_ascii_case("closed")
    }

    /// Hours between creation and close, if closed.
    pub fn resolution_hours(&self) -> Option<f64> {
        self.closed_at
            .map(|closed| (closed - self.created_at).num_minutes() as f64 / 60.0)
            .filter(|h| *h >= 0.0)
    }

    /// Lowercased text plus tags, for keyword matching.
    pub fn searchable_text(&self) -> String {
        let mut text = self.text.to_lowercase();
        for tag in &self.tags {
            text.push(' ');
            text.push_str(&tag.to_lowercase());
        }
        text
    }
}

/// Per-conversation topic assignments produced by topic detection.
///
/// Conversations are never mutated across phases; every consumer that needs
/// `detected_topics` reads them from this table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicAssignments {
    by_conversation: HashMap<String, Vec<String>>,
}

impl TopicAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the topics detected for one conversation.
    pub fn assign(&mut self, conversation_id: impl Into<String>, topics: Vec<String>) {
        self.by_conversation.insert(conversation_id.into(), topics);
    }

    /// Topics detected for a conversation (empty if untagged).
    pub fn detected_topics(&self, conversation_id: &str) -> &[String] {
        self.by_conversation
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Conversations from `pool` tagged with `topic`.
    pub fn conversations_for<'a>(
        &self,
        topic: &str,
        pool: &'a [Conversation],
    ) -> Vec<&'a Conversation> {
        pool.iter()
            .filter(|c| self.detected_topics(&c.id).iter().any(|t| t == topic))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_conversation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_conversation.is_empty()
    }

    /// Build the table from a `{conversation_id: [topics]}` JSON object.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut table = Self::new();
        if let Some(map) = value.as_object() {
            for (id, topics) in map {
                let topics = topics
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|t| t.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                table.assign(id.clone(), topics);
            }
        }
        table
    }

    /// Stable view for serialization into agent payloads.
    pub fn to_sorted(&self) -> BTreeMap<&str, &[String]> {
        self.by_conversation
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
            .collect()
    }
}
