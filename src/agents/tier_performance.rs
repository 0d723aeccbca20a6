use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::info;

use super::{median, ratio, round2, Agent, AgentContext, AgentResult};
use crate::models::Conversation;

const NAME: &str = "TierPerformanceAgent";
/// Context key of the segmentation result.
pub const SEGMENTATION_KEY: &str = "segmentation";

/// Rule-based Fin AI performance for free-tier and paid Fin-resolved
/// conversations, plus overall resolution metrics.
pub struct TierPerformanceAgent;

impl TierPerformanceAgent {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TierPerformanceAgent {
    fn default() -> Self {
        Self::new()
    }
}

fn id_set(segmentation: Option<&Value>, pointer: &str) -> Option<HashSet<String>> {
    let ids = segmentation?.pointer(pointer)?.as_array()?;
    Some(
        ids.iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

/// Metrics for one subset of conversations.
fn subset_metrics(conversations: &[&Conversation]) -> Value {
    let closed: Vec<&&Conversation> = conversations.iter().filter(|c| c.is_closed()).collect();
    let reopened = closed.iter().filter(|c| c.reopen_count > 0).count();
    let hours: Vec<f64> = closed.iter().filter_map(|c| c.resolution_hours()).collect();
    let ratings: Vec<f64> = conversations
        .iter()
        .filter_map(|c| c.rating.map(f64::from))
        .collect();
    let avg_rating = if ratings.is_empty() {
        None
    } else {
        Some(round2(ratings.iter().sum::<f64>() / ratings.len() as f64))
    };

    json!({
        "conversations": conversations.len(),
        "resolution_rate": round2(ratio(closed.len(), conversations.len())),
        "reopen_rate": round2(ratio(reopened, closed.len())),
        "median_resolution_hours": median(hours).map(round2),
        "avg_rating": avg_rating,
        "rated": ratings.len(),
    })
}

/// FCR: closed with at most one admin reply and never reopened.
fn resolution_metrics(conversations: &[Conversation]) -> Option<Value> {
    let closed: Vec<&Conversation> = conversations.iter().filter(|c| c.is_closed()).collect();
    if closed.is_empty() {
        return None;
    }
    let first_contact = closed
        .iter()
        .filter(|c| c.admin_reply_count <= 1 && c.reopen_count == 0)
        .count();
    let reopened = closed.iter().filter(|c| c.reopen_count > 0).count();
    let hours: Vec<f64> = closed.iter().filter_map(|c| c.resolution_hours()).collect();

    Some(json!({
        "fcr_rate": ratio(first_contact, closed.len()),
        "median_resolution_hours": median(hours).unwrap_or(0.0),
        "reopen_rate": ratio(reopened, closed.len()),
    }))
}

#[async_trait]
impl Agent for TierPerformanceAgent {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self, ctx: &AgentContext) -> AgentResult {
        let segmentation = ctx.previous_data(SEGMENTATION_KEY);
        let mut limitations = Vec::new();

        let free_ids = id_set(segmentation, "/segments/free");
        let fin_resolved_ids = id_set(segmentation, "/fin_resolved_ids");
        if segmentation.is_none() {
            limitations.push(
                "Segmentation unavailable; free tier taken from raw tier field and Fin-resolved subset skipped"
                    .to_string(),
            );
        }

        let free: Vec<&Conversation> = ctx
            .conversations
            .iter()
            .filter(|c| match &free_ids {
                Some(ids) => ids.contains(&c.id),
                None => c.tier.as_deref().map_or(false, |t| t.eq_ignore_ascii_case("free")),
            })
            .collect();
        let paid_fin_resolved: Vec<&Conversation> = ctx
            .conversations
            .iter()
            .filter(|c| fin_resolved_ids.as_ref().map_or(false, |ids| ids.contains(&c.id)))
            .collect();

        let overall = resolution_metrics(&ctx.conversations);
        if overall.is_none() {
            limitations.push("No closed conversations; resolution metrics unavailable".to_string());
        }

        info!(
            free = free.len(),
            paid_fin_resolved = paid_fin_resolved.len(),
            "Tier performance computed"
        );

        let confidence = match (&overall, segmentation.is_some()) {
            (Some(_), true) => 0.85,
            (Some(_), false) => 0.65,
            (None, _) => 0.4,
        };

        AgentResult::success(
            NAME,
            json!({
                "free_tier": subset_metrics(&free),
                "paid_fin_resolved": subset_metrics(&paid_fin_resolved),
                "resolution_metrics": overall.unwrap_or_else(|| json!({})),
            }),
            confidence,
        )
        .with_source("conversation state, timestamps, reopen and reply counts")
        .with_limitations(limitations)
    }
}
