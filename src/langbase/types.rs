//! Wire types for the `/v1/pipes/run` endpoint.
//!
//! Every analysis pipe is called the same way: one system prompt, one user
//! message carrying the conversation sample, non-streaming.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

/// Body posted to a named pipe.
#[derive(Debug, Clone, Serialize)]
pub struct PipeRequest {
    pub name: String,
    pub messages: Vec<Message>,
    pub stream: bool,
}

/// Pipe result. `completion` holds the model text, usually a fenced JSON block.
#[derive(Debug, Clone, Deserialize)]
pub struct PipeResponse {
    pub success: bool,
    pub completion: String,
    #[serde(default)]
    pub raw: Option<RawCompletion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCompletion {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

impl PipeRequest {
    pub fn new(name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            name: name.into(),
            messages,
            stream: false,
        }
    }
}

impl PipeResponse {
    /// Model that served the call, when the pipe echoes it back.
    pub fn model(&self) -> Option<&str> {
        self.raw.as_ref().and_then(|r| r.model.as_deref())
    }

    pub fn total_tokens(&self) -> Option<u32> {
        self.raw
            .as_ref()
            .and_then(|r| r.usage.as_ref())
            .and_then(|u| u.total_tokens)
    }
}
