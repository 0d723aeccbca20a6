//! Execution monitor for analysis runs.
//!
//! Every agent the orchestrator runs is recorded here with its phase,
//! duration and outcome. The monitor is constructed by the caller and
//! injected into the orchestrator; clones share the same record list, so
//! concurrent fan-out tasks can record into it directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::agents::AgentResult;

// ============================================================================
// Records
// ============================================================================

/// One agent execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub phase: String,
    pub agent: String,
    /// Topic for per-topic agents.
    pub topic: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
    pub confidence: f64,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Per-phase rollup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub executions: usize,
    pub failures: usize,
    pub total_duration_ms: u64,
}

/// Aggregate view of a run, attached to the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_executions: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
    /// Mean confidence over successful executions.
    pub average_confidence: f64,
    pub phases: BTreeMap<String, PhaseSummary>,
    /// `agent` or `agent[topic]` for every failed execution.
    pub failed_agents: Vec<String>,
}

// ============================================================================
// Monitor
// ============================================================================

/// Collects [`ExecutionRecord`]s for one or more runs.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMonitor {
    records: Arc<RwLock<Vec<ExecutionRecord>>>,
}

impl ExecutionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an agent result under `phase`.
    pub async fn record(&self, phase: &str, topic: Option<&str>, result: &AgentResult) {
        let record = ExecutionRecord {
            phase: phase.to_string(),
            agent: result.agent_name.clone(),
            topic: topic.map(str::to_string),
            duration_ms: (result.execution_time * 1000.0).max(0.0).round() as u64,
            success: result.success,
            confidence: result.confidence,
            error: result.error_message.clone(),
            recorded_at: Utc::now(),
        };
        debug!(
            phase = %record.phase,
            agent = %record.agent,
            success = record.success,
            duration_ms = record.duration_ms,
            "Execution recorded"
        );
        self.records.write().await.push(record);
    }

    /// All records so far, in recording order.
    pub async fn records(&self) -> Vec<ExecutionRecord> {
        self.records.read().await.clone()
    }

    /// Drop all records, e.g. between runs sharing one monitor.
    pub async fn reset(&self) {
        self.records.write().await.clear();
    }

    /// Roll the records up into a summary.
    pub async fn summary(&self) -> ExecutionSummary {
        let records = self.records.read().await;
        let mut summary = ExecutionSummary {
            total_executions: records.len(),
            ..Default::default()
        };
        let mut confidence_sum = 0.0;

        for record in records.iter() {
            let phase = summary.phases.entry(record.phase.clone()).or_default();
            phase.executions += 1;
            phase.total_duration_ms += record.duration_ms;
            summary.total_duration_ms += record.duration_ms;

            if record.success {
                summary.successful += 1;
                confidence_sum += record.confidence;
            } else {
                phase.failures += 1;
                summary.failed += 1;
                summary.failed_agents.push(match &record.topic {
                    Some(topic) => format!("{}[{}]", record.agent, topic),
                    None => record.agent.clone(),
                });
            }
        }

        if summary.successful > 0 {
            summary.average_confidence = confidence_sum / summary.successful as f64;
        }
        summary
    }
}
