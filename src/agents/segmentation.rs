use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::{ratio, Agent, AgentContext, AgentResult};
use crate::config::SegmentationConfig;
use crate::models::Conversation;

const NAME: &str = "SegmentationAgent";

/// Customer segment by subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Paid,
    Free,
    Unknown,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Paid => "paid",
            Segment::Free => "free",
            Segment::Unknown => "unknown",
        }
    }
}

/// Who handled the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Escalated,
    Tier1VendorA,
    Tier1VendorB,
    FinAi,
    FinResolved,
    Unknown,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Escalated => "escalated",
            AgentType::Tier1VendorA => "tier1_vendor_a",
            AgentType::Tier1VendorB => "tier1_vendor_b",
            AgentType::FinAi => "fin_ai",
            AgentType::FinResolved => "fin_resolved",
            AgentType::Unknown => "unknown",
        }
    }
}

/// Classify one conversation, tier first.
///
/// Free-tier conversations are always `(Free, FinAi)`. Everything else goes
/// through the cascade: vendor email domain, escalation name, any human
/// admin, then AI-only.
pub fn classify_conversation(conv: &Conversation, config: &SegmentationConfig) -> (Segment, AgentType) {
    let segment = segment_of(conv);
    if segment == Segment::Free {
        return (Segment::Free, AgentType::FinAi);
    }

    let email = conv.assignee_email.as_deref().map(str::to_lowercase);
    let domain = email.as_deref().and_then(|e| e.rsplit_once('@')).map(|(_, d)| d);
    if let Some(domain) = domain {
        if config.vendor_a_domains.iter().any(|d| d == domain) {
            return (segment, AgentType::Tier1VendorA);
        }
        if config.vendor_b_domains.iter().any(|d| d == domain) {
            return (segment, AgentType::Tier1VendorB);
        }
    }

    let name = conv.assignee_name.as_deref().map(str::to_lowercase);
    let escalated = config.escalation_names.iter().any(|esc| {
        name.as_deref().map_or(false, |n| n.contains(esc.as_str()))
            || email.as_deref().map_or(false, |e| e.split('@').next() == Some(esc.as_str()))
    });
    if escalated {
        return (segment, AgentType::Escalated);
    }

    if conv.admin_assignee_id.is_some() {
        return (segment, AgentType::Unknown);
    }

    if conv.ai_agent_participated && conv.is_closed() && conv.admin_reply_count == 0 {
        (segment, AgentType::FinResolved)
    } else {
        (segment, AgentType::FinAi)
    }
}

fn segment_of(conv: &Conversation) -> Segment {
    match conv.tier.as_deref().map(|t| t.trim().to_lowercase()) {
        Some(t) if t == "free" => Segment::Free,
        Some(t) if t.is_empty() || t == "unknown" => Segment::Unknown,
        Some(_) => Segment::Paid,
        None => Segment::Unknown,
    }
}

/// Rule-based paid/free/agent-type classification. No LLM.
pub struct SegmentationAgent {
    config: SegmentationConfig,
}

impl SegmentationAgent {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Agent for SegmentationAgent {
    fn name(&self) -> &str {
        NAME
    }

    async fn execute(&self, ctx: &AgentContext) -> AgentResult {
        let total = ctx.conversations.len();
        let mut tier_distribution: BTreeMap<String, u64> = BTreeMap::new();
        let mut segment_distribution: BTreeMap<&str, u64> = BTreeMap::new();
        let mut agent_distribution: BTreeMap<&str, u64> = BTreeMap::new();
        let mut segments: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut fin_resolved_ids = Vec::new();
        let mut free_tier_anomalies = 0u64;

        for conv in ctx.conversations.iter() {
            let (segment, agent_type) = classify_conversation(conv, &self.config);

            if segment == Segment::Free && conv.admin_assignee_id.is_some() {
                free_tier_anomalies += 1;
                debug!(conversation_id = %conv.id, "Free-tier conversation has a human assignee");
            }

            let tier = conv
                .tier
                .as_deref()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "unknown".to_string());
            *tier_distribution.entry(tier).or_default() += 1;
            *segment_distribution.entry(segment.as_str()).or_default() += 1;
            *agent_distribution.entry(agent_type.as_str()).or_default() += 1;
            segments.entry(segment.as_str()).or_default().push(&conv.id);
            if agent_type == AgentType::FinResolved {
                fin_resolved_ids.push(conv.id.as_str());
            }
        }

        let unknown_agents = agent_distribution.get("unknown").copied().unwrap_or(0) as usize;
        let unknown_tiers = segment_distribution.get("unknown").copied().unwrap_or(0);
        let confidence = 1.0 - 0.5 * ratio(unknown_agents, total);

        info!(
            total = total,
            paid = segment_distribution.get("paid").copied().unwrap_or(0),
            free = segment_distribution.get("free").copied().unwrap_or(0),
            anomalies = free_tier_anomalies,
            "Segmentation complete"
        );

        let mut result = AgentResult::success(
            NAME,
            json!({
                "total_conversations": total,
                "tier_distribution": tier_distribution,
                "segment_distribution": segment_distribution,
                "agent_distribution": agent_distribution,
                "segments": segments,
                "fin_resolved_ids": fin_resolved_ids,
                "free_tier_anomalies": free_tier_anomalies,
            }),
            confidence,
        )
        .with_source("conversation tier and assignee fields");

        if unknown_tiers > 0 {
            result = result.with_limitation(format!(
                "{} conversations had no tier and were classified with paid-tier rules",
                unknown_tiers
            ));
        }
        if free_tier_anomalies > 0 {
            result = result.with_limitation(format!(
                "{} free-tier conversations had a human assignee; kept as fin_ai",
                free_tier_anomalies
            ));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::run_agent;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn config() -> SegmentationConfig {
        SegmentationConfig {
            vendor_a_domains: vec!["vendor-a.com".to_string()],
            vendor_b_domains: vec!["vendor-b.io".to_string()],
            escalation_names: vec!["dae-ho".to_string(), "max".to_string()],
        }
    }

    #[test]
    fn test_free_tier_overrides_admin_assignment() {
        let conv = Conversation::new("c1", "help")
            .with_tier("free")
            .with_admin("admin-9", Some("agent@vendor-a.com"), Some("Max"));
        assert_eq!(
            classify_conversation(&conv, &config()),
            (Segment::Free, AgentType::FinAi)
        );
    }

    #[test]
    fn test_paid_cascade_order() {
        let cfg = config();
        let vendor_a = Conversation::new("a", "")
            .with_tier("pro")
            .with_admin("1", Some("Jo@Vendor-A.com"), Some("Max"));
        assert_eq!(classify_conversation(&vendor_a, &cfg).1, AgentType::Tier1VendorA);

        let vendor_b = Conversation::new("b", "")
            .with_tier("plus")
            .with_admin("2", Some("jo@vendor-b.io"), None);
        assert_eq!(classify_conversation(&vendor_b, &cfg).1, AgentType::Tier1VendorB);

        let escalated = Conversation::new("c", "")
            .with_tier("ultra")
            .with_admin("3", Some("max@company.com"), Some("Max Power"));
        assert_eq!(classify_conversation(&escalated, &cfg).1, AgentType::Escalated);

        let generic = Conversation::new("d", "")
            .with_tier("pro")
            .with_admin("4", Some("someone@company.com"), Some("Someone"));
        assert_eq!(classify_conversation(&generic, &cfg).1, AgentType::Unknown);
    }

    #[test]
    fn test_ai_only_paid_conversations() {
        let cfg = config();
        let resolved = Conversation::new("e", "")
            .with_tier("pro")
            .with_ai_agent()
            .closed_after_hours(1);
        assert_eq!(
            classify_conversation(&resolved, &cfg),
            (Segment::Paid, AgentType::FinResolved)
        );

        let open = Conversation::new("f", "").with_tier("pro").with_ai_agent();
        assert_eq!(classify_conversation(&open, &cfg).1, AgentType::FinAi);
    }

    #[test]
    fn test_missing_tier_is_unknown_segment() {
        let conv = Conversation::new("g", "");
        assert_eq!(classify_conversation(&conv, &config()).0, Segment::Unknown);
    }

    #[tokio::test]
    async fn test_execute_distributions() {
        let conversations = vec![
            Conversation::new("1", "").with_tier("free").with_admin("x", None, None),
            Conversation::new("2", "").with_tier("Pro").with_ai_agent().closed_after_hours(2),
            Conversation::new("3", "").with_tier("pro"),
        ];
        let day = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let ctx = AgentContext::new("run", day, day, "2024_W23", Arc::new(conversations));

        let result = run_agent(&SegmentationAgent::new(config()), &ctx).await;
        assert!(result.success);
        assert_eq!(result.data["tier_distribution"]["pro"], 2);
        assert_eq!(result.data["segment_distribution"]["free"], 1);
        assert_eq!(result.data["agent_distribution"]["fin_ai"], 2);
        assert_eq!(result.data["fin_resolved_ids"], json!(["2"]));
        assert_eq!(result.data["segments"]["paid"], json!(["2", "3"]));
        assert_eq!(result.data["free_tier_anomalies"], 1);
        assert_eq!(result.limitations.len(), 1);
    }
}
