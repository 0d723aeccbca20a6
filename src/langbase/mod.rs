//! Langbase pipe client used by the LLM-backed agents.
//!
//! Agents never talk to [`LangbaseClient`] directly; they hold an
//! `Arc<dyn CompletionProvider>` so tests can script completions.

mod client;
mod types;


pub use client::*;
pub use types::*;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{LangbaseError, LangbaseResult};

/// Anything that can turn a pipe name and a message list into a completion.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run the named pipe and return the raw completion text.
    async fn complete(&self, pipe: &str, messages: Vec<Message>) -> LangbaseResult<String>;
}

/// Pull the JSON payload out of a completion.
///
/// Pipes are prompted for bare JSON but often answer with a fenced block,
/// tagged `json` or untagged. Only the first fence is considered.
pub fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with(['{', '[']) {
        return Ok(trimmed);
    }

    let Some((_, opened)) = completion.split_once("```") else {
        return Err(format!(
            "No JSON found in completion: '{}'",
            completion.chars().take(100).collect::<String>()
        ));
    };
    let body = opened.strip_prefix("json").unwrap_or(opened);
    let body = body.split_once("```").map_or(body, |(inner, _)| inner).trim();

    if body.is_empty() {
        return Err("Fenced block in completion is empty".to_string());
    }
    Ok(body)
}

/// Parse a structured completion into `T`.
pub fn parse_completion<T: DeserializeOwned>(completion: &str) -> LangbaseResult<T> {
    let json = extract_json_from_completion(completion)
        .map_err(|message| LangbaseError::InvalidResponse { message })?;
    serde_json::from_str(json).map_err(|e| LangbaseError::InvalidResponse {
        message: format!("Failed to parse completion JSON: {}", e),
    })
}
