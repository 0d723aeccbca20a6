use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{round2, Agent, AgentContext, AgentResult, ConfidenceLevel};
use crate::error::{AgentError, AgentOutcome};
use crate::snapshot::DataCompleteness;

const NAME: &str = "ConfidenceMetaAgent";
/// Context key of the serialized [`DataCompleteness`] report.
pub const COMPLETENESS_KEY: &str = "data_completeness";

/// Reports how far the run's findings can be trusted.
///
/// Reads every earlier result in the context (groups such as per-topic
/// sentiment are flattened to `group.member`) plus the extraction
/// completeness report. Overall confidence is the mean agent confidence
/// scaled by completeness: `mean * (0.5 + 0.5 * ratio)`.
pub struct ConfidenceMetaAgent;

impl ConfidenceMetaAgent {
    fn is_agent_result(value: &Value) -> bool {
        value.get("success").map_or(false, Value::is_boolean) && value.get("confidence").is_some()
    }

    /// Agent results keyed by slot, groups flattened.
    fn collect_results(ctx: &AgentContext) -> BTreeMap<String, &Value> {
        let mut results = BTreeMap::new();
        for (key, value) in &ctx.previous_results {
            if key == COMPLETENESS_KEY {
                continue;
            }
            if Self::is_agent_result(value) {
                results.insert(key.clone(), value);
            } else if let Some(group) = value.as_object() {
                for (member, inner) in group {
                    if Self::is_agent_result(inner) {
                        results.insert(format!("{}.{}", key, member), inner);
                    }
                }
            }
        }
        results
    }
}

#[async_trait]
impl Agent for ConfidenceMetaAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn validate_input(&self, ctx: &AgentContext) -> AgentOutcome<()> {
        if ctx.previous_results.is_empty() {
            return Err(AgentError::InvalidInput {
                agent: NAME.to_string(),
                reason: "no earlier results to assess".to_string(),
            });
        }
        Ok(())
    }

    async fn execute(&self, ctx: &AgentContext) -> AgentResult {
        let results = Self::collect_results(ctx);

        let mut confidences = BTreeMap::new();
        let mut failed = Vec::new();
        let mut limitations = Vec::new();
        for (key, result) in &results {
            let succeeded = result.get("success").and_then(Value::as_bool).unwrap_or(false);
            if !succeeded {
                failed.push(key.clone());
                continue;
            }
            let confidence = result.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
            confidences.insert(key.clone(), round2(confidence));
            if let Some(items) = result.get("limitations").and_then(Value::as_array) {
                limitations.extend(
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|l| format!("{}: {}", key, l)),
                );
            }
        }

        let completeness: Option<DataCompleteness> = ctx
            .previous_results
            .get(COMPLETENESS_KEY)
            .and_then(|v| match serde_json::from_value(v.clone()) {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(error = %e, "Unreadable data completeness report");
                    None
                }
            });
        let completeness_ratio = completeness.as_ref().map_or(1.0, DataCompleteness::ratio);

        let mean = if confidences.is_empty() {
            0.0
        } else {
            confidences.values().sum::<f64>() / confidences.len() as f64
        };
        let overall = mean * (0.5 + 0.5 * completeness_ratio);

        info!(
            assessed = results.len(),
            failed = failed.len(),
            overall_confidence = overall,
            "Confidence assessed"
        );

        let mut result = AgentResult::success(
            NAME,
            json!({
                "overall_confidence": round2(overall),
                "overall_level": ConfidenceLevel::from_score(overall),
                "agent_confidences": confidences,
                "failed_agents": failed,
                "limitations": limitations,
                "data_completeness": {
                    "ratio": round2(completeness_ratio),
                    "issues": completeness.as_ref().map(DataCompleteness::issues).unwrap_or_default(),
                },
            }),
            if completeness.is_some() { 0.9 } else { 0.7 },
        )
        .with_source("earlier agent results");

        if completeness.is_none() {
            result = result.with_limitation("No data completeness report; extraction quality assumed");
        }
        result
    }
}
