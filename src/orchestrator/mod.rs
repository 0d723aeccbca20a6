//! Phase sequencing for one analysis run.
//!
//! ```text
//! segmentation → topic detection → sub-topics (paid) → per-topic fan-out
//!   → tier performance → insights fan-out (4) → trend → report → snapshot
//! ```
//!
//! Every phase writes one slot of the output; a failed phase leaves a failed
//! result in its slot and the run continues with whatever data is left.

mod fanout;
mod monitor;
mod report;

pub use fanout::{
    fan_out_topics, SentimentExamplesWorker, TopicEntry, TopicOutcome, TopicWorker, TOPIC_PHASE,
};
pub use monitor::{ExecutionMonitor, ExecutionRecord, ExecutionSummary, PhaseSummary};
pub use report::{build_output, AnalysisReport, ReportSection, SectionStatus, SLOTS};

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agents::{
    run_agent, standard_taxonomy, Agent, AgentContext, AgentResult, ChurnRiskAgent,
    ConfidenceMetaAgent, CorrelationAgent, ExampleExtractionAgent, QualityInsightsAgent,
    SegmentationAgent, SentimentAgent, SubTopicDetectionAgent, TierPerformanceAgent,
    TopicDetectionAgent, TrendAgent, ANALYSIS_OUTPUT_KEY, ANALYSIS_TYPE_KEY, COMPLETENESS_KEY,
    SEGMENTATION_KEY,
};
use crate::config::{Config, OrchestratorConfig};
use crate::error::{AgentError, AppResult};
use crate::langbase::CompletionProvider;
use crate::models::{Conversation, TopicAssignments};
use crate::snapshot::{extract_aggregates, week_id_for, AnalysisType, SnapshotService};

// ============================================================================
// Agents
// ============================================================================

/// The agents a run uses, one per phase role.
#[derive(Clone)]
pub struct AgentSet {
    pub segmentation: Arc<dyn Agent>,
    pub topic_detection: Arc<dyn Agent>,
    pub subtopic_detection: Arc<dyn Agent>,
    pub sentiment: Arc<dyn Agent>,
    pub examples: Arc<dyn Agent>,
    pub tier_performance: Arc<dyn Agent>,
    pub correlation: Arc<dyn Agent>,
    pub quality_insights: Arc<dyn Agent>,
    pub churn_risk: Arc<dyn Agent>,
    pub confidence_meta: Arc<dyn Agent>,
    pub trend: Arc<dyn Agent>,
}

impl AgentSet {
    /// Production agents over the standard taxonomy.
    pub fn standard(
        config: &Config,
        provider: Arc<dyn CompletionProvider>,
        snapshots: SnapshotService,
    ) -> AppResult<Self> {
        let taxonomy = standard_taxonomy();
        Ok(Self {
            segmentation: Arc::new(SegmentationAgent::new(config.segmentation.clone())),
            topic_detection: Arc::new(TopicDetectionAgent::new(&taxonomy)?),
            subtopic_detection: Arc::new(SubTopicDetectionAgent::new(
                &taxonomy,
                Arc::clone(&provider),
                config.pipes.subtopic_themes.clone(),
            )?),
            sentiment: Arc::new(SentimentAgent::new(
                Arc::clone(&provider),
                config.pipes.sentiment.clone(),
                config.orchestrator.sentiment_sample_size,
            )),
            examples: Arc::new(ExampleExtractionAgent::new(
                provider,
                config.pipes.examples.clone(),
                config.orchestrator.examples_per_topic,
            )),
            tier_performance: Arc::new(TierPerformanceAgent::new()),
            correlation: Arc::new(CorrelationAgent),
            quality_insights: Arc::new(QualityInsightsAgent),
            churn_risk: Arc::new(ChurnRiskAgent),
            confidence_meta: Arc::new(ConfidenceMetaAgent),
            trend: Arc::new(TrendAgent::new(snapshots)),
        })
    }
}

// ============================================================================
// Request
// ============================================================================

/// Input of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub conversations: Vec<Conversation>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Defaults to the ISO week of `start_date`.
    pub week_id: Option<String>,
    pub analysis_type: AnalysisType,
}

impl AnalysisRequest {
    pub fn new(conversations: Vec<Conversation>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            conversations,
            start_date,
            end_date,
            week_id: None,
            analysis_type: AnalysisType::Weekly,
        }
    }

    pub fn with_week_id(mut self, week_id: impl Into<String>) -> Self {
        self.week_id = Some(week_id.into());
        self
    }

    pub fn with_analysis_type(mut self, analysis_type: AnalysisType) -> Self {
        self.analysis_type = analysis_type;
        self
    }

    fn resolved_week_id(&self) -> String {
        self.week_id
            .clone()
            .unwrap_or_else(|| week_id_for(self.start_date))
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

const INSIGHTS_PHASE: &str = "insights";

/// Runs the analysis phases in order.
pub struct TopicOrchestrator {
    config: OrchestratorConfig,
    agents: AgentSet,
    snapshots: SnapshotService,
    monitor: ExecutionMonitor,
}

impl TopicOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        agents: AgentSet,
        snapshots: SnapshotService,
        monitor: ExecutionMonitor,
    ) -> Self {
        Self {
            config,
            agents,
            snapshots,
            monitor,
        }
    }

    pub fn monitor(&self) -> &ExecutionMonitor {
        &self.monitor
    }

    async fn run_phase(
        &self,
        phase: &str,
        agent: &Arc<dyn Agent>,
        ctx: AgentContext,
    ) -> AgentResult {
        info!(phase = %phase, agent = %agent.name(), "Phase started");
        let result = run_isolated(Arc::clone(agent), ctx).await;
        self.monitor.record(phase, None, &result).await;
        result
    }

    /// Run every phase and assemble the report. Never fails as a whole.
    ///
    /// The monitor is reset first, so its summary covers this run only.
    pub async fn analyze(&self, request: AnalysisRequest) -> AnalysisReport {
        self.monitor.reset().await;
        let analysis_id = Uuid::new_v4().to_string();
        let week_id = request.resolved_week_id();
        let analysis_type = request.analysis_type;
        let (start_date, end_date) = (request.start_date, request.end_date);
        let conversations = Arc::new(request.conversations);
        let total = conversations.len();

        info!(
            analysis_id = %analysis_id,
            week_id = %week_id,
            conversations = total,
            "Analysis started"
        );

        let mut ctx = AgentContext::new(
            analysis_id.clone(),
            start_date,
            end_date,
            week_id.clone(),
            Arc::clone(&conversations),
        )
        .with_metadata(ANALYSIS_TYPE_KEY, analysis_type.as_str());
        let mut results: BTreeMap<String, Value> = BTreeMap::new();

        // Phase 1: segmentation
        let segmentation = self
            .run_phase("segmentation", &self.agents.segmentation, ctx.clone())
            .await;
        results.insert("segmentation".to_string(), segmentation.to_json());
        let paid = paid_conversations(&conversations, &segmentation);

        // Phase 2: topic detection over every conversation
        let topic_detection = self
            .run_phase("topic_detection", &self.agents.topic_detection, ctx.clone())
            .await;
        results.insert("topic_detection".to_string(), topic_detection.to_json());
        let (assignments, volumes) = if topic_detection.success {
            (
                TopicAssignments::from_json(&topic_detection.data["assignments"]),
                normalize_distribution(topic_detection.data.get("topic_distribution")),
            )
        } else {
            warn!("Topic detection failed, continuing without topics");
            (TopicAssignments::new(), BTreeMap::new())
        };
        ctx = ctx.with_topics(Arc::new(assignments));

        // Phase 3: sub-topics over paid conversations
        let subtopics = self
            .run_phase(
                "subtopic_detection",
                &self.agents.subtopic_detection,
                ctx.with_conversations(paid),
            )
            .await;
        results.insert("subtopic_detection".to_string(), subtopics.to_json());

        // Phase 4: per-topic sentiment and examples
        let worker = Arc::new(SentimentExamplesWorker {
            sentiment: Arc::clone(&self.agents.sentiment),
            examples: Arc::clone(&self.agents.examples),
            context: ctx.clone(),
            monitor: self.monitor.clone(),
        });
        let (outcomes, skipped_topics) =
            fan_out_topics(&volumes, self.config.max_concurrent_topics, worker).await;
        let mut sentiments = serde_json::Map::new();
        let mut examples = serde_json::Map::new();
        let mut topics = Vec::with_capacity(outcomes.len());
        for outcome in &outcomes {
            topics.push(TopicEntry::classify(outcome));
            match &outcome.sentiment {
                Some(Ok(result)) => {
                    sentiments.insert(outcome.topic.clone(), result.to_json());
                }
                Some(Err(e)) => {
                    let failed = AgentResult::failure(self.agents.sentiment.name(), e);
                    self.monitor
                        .record(TOPIC_PHASE, Some(outcome.topic.as_str()), &failed)
                        .await;
                    sentiments.insert(outcome.topic.clone(), failed.to_json());
                }
                None => {}
            }
            if let Some(result) = &outcome.examples {
                examples.insert(outcome.topic.clone(), result.to_json());
            }
        }
        results.insert("topic_sentiments".to_string(), Value::Object(sentiments));
        results.insert("topic_examples".to_string(), Value::Object(examples));

        // Phase 5: tier performance
        let tier_ctx = ctx.clone().with_result(SEGMENTATION_KEY, &segmentation);
        let tier = self
            .run_phase("tier_performance", &self.agents.tier_performance, tier_ctx)
            .await;
        results.insert("tier_performance".to_string(), tier.to_json());

        // Phase 6: analytical insights, always four entries
        let partial = build_output(&analysis_id, &week_id, start_date, end_date, total, &results);
        let completeness = extract_aggregates(&partial).completeness;
        let mut meta_ctx = ctx.clone();
        meta_ctx.previous_results = results.clone();
        let meta_ctx = meta_ctx.with_value(
            COMPLETENESS_KEY,
            serde_json::to_value(&completeness).unwrap_or(Value::Null),
        );
        let insight_jobs = [
            ("correlation", Arc::clone(&self.agents.correlation), ctx.clone()),
            ("quality_insights", Arc::clone(&self.agents.quality_insights), ctx.clone()),
            ("churn_risk", Arc::clone(&self.agents.churn_risk), ctx.clone()),
            ("confidence_meta", Arc::clone(&self.agents.confidence_meta), meta_ctx),
        ];
        for (slot, result) in self.run_insights(insight_jobs).await {
            results.insert(slot.to_string(), result.to_json());
        }

        // Phase 7: trend against snapshot history
        let partial = build_output(&analysis_id, &week_id, start_date, end_date, total, &results);
        let trend_ctx = ctx.clone().with_value(ANALYSIS_OUTPUT_KEY, partial);
        let trend = self.run_phase("trend", &self.agents.trend, trend_ctx).await;
        results.insert("trend".to_string(), trend.to_json());

        // Phase 8: output
        let output = build_output(&analysis_id, &week_id, start_date, end_date, total, &results);
        let sections = AnalysisReport::sections_from_output(&output);

        // Phase 9: snapshot
        let snapshot_id = if self.config.auto_save_snapshot {
            match self.snapshots.try_save_snapshot(&output, analysis_type).await {
                Ok(id) => Some(id),
                Err(e) => {
                    error!(analysis_id = %analysis_id, error = %e, "Snapshot auto-save failed");
                    None
                }
            }
        } else {
            None
        };

        let execution = self.monitor.summary().await;
        info!(
            analysis_id = %analysis_id,
            executions = execution.total_executions,
            failed = execution.failed,
            snapshot_id = snapshot_id.as_deref().unwrap_or("-"),
            "Analysis complete"
        );

        AnalysisReport {
            analysis_id,
            week_id,
            period_start: start_date,
            period_end: end_date,
            total_conversations: total,
            sections,
            topics,
            skipped_topics,
            execution,
            snapshot_id,
            output,
        }
    }

    /// Run the insight agents concurrently. A task that dies becomes a failed result.
    async fn run_insights(
        &self,
        jobs: [(&'static str, Arc<dyn Agent>, AgentContext); 4],
    ) -> Vec<(&'static str, AgentResult)> {
        let runs = jobs
            .into_iter()
            .map(|(slot, agent, ctx)| async move { (slot, run_isolated(agent, ctx).await) });

        let results = join_all(runs).await;
        for (_, result) in &results {
            self.monitor.record(INSIGHTS_PHASE, None, result).await;
        }
        results
    }
}

/// Run an agent on its own task so a panic surfaces as a failed result.
async fn run_isolated(agent: Arc<dyn Agent>, ctx: AgentContext) -> AgentResult {
    let name = agent.name().to_string();
    match tokio::spawn(async move { run_agent(agent.as_ref(), &ctx).await }).await {
        Ok(result) => result,
        Err(e) => {
            warn!(agent = %name, error = %e, "Agent task did not complete");
            AgentResult::failure(
                name.clone(),
                AgentError::Aborted {
                    agent: name,
                    message: e.to_string(),
                },
            )
        }
    }
}

/// Paid conversations per segmentation, or all of them if segmentation failed.
fn paid_conversations(conversations: &[Conversation], segmentation: &AgentResult) -> Vec<Conversation> {
    let paid_ids: Option<HashSet<&str>> = segmentation
        .success
        .then(|| segmentation.data.pointer("/segments/paid"))
        .flatten()
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_str).collect());

    match paid_ids {
        Some(ids) => conversations
            .iter()
            .filter(|c| ids.contains(c.id.as_str()))
            .cloned()
            .collect(),
        None => {
            warn!("Segmentation unavailable, treating every conversation as paid");
            conversations.to_vec()
        }
    }
}

/// `{topic: volume}` from a distribution of raw counts or `{volume}` objects.
///
/// Unknown shapes count as zero volume.
pub fn normalize_distribution(distribution: Option<&Value>) -> BTreeMap<String, u64> {
    let Some(entries) = distribution.and_then(Value::as_object) else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .map(|(topic, stats)| {
            let volume = match stats {
                Value::Number(n) => n.as_u64(),
                Value::Object(obj) => obj.get("volume").and_then(Value::as_u64),
                _ => None,
            };
            let volume = volume.unwrap_or_else(|| {
                warn!(topic = %topic, shape = %stats, "Unrecognised topic volume, treating as 0");
                0
            });
            (topic.clone(), volume)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_distribution_shapes() {
        let volumes = normalize_distribution(Some(&json!({
            "Billing": {"volume": 12, "percentage": 40.0},
            "API": 4,
            "Bug": "lots",
            "Export": {"count": 3}
        })));
        assert_eq!(volumes["Billing"], 12);
        assert_eq!(volumes["API"], 4);
        assert_eq!(volumes["Bug"], 0);
        assert_eq!(volumes["Export"], 0);
        assert!(normalize_distribution(None).is_empty());
    }

    #[test]
    fn test_paid_conversations_fallback() {
        let conversations = vec![Conversation::new("1", ""), Conversation::new("2", "")];
        let segmentation = AgentResult::success(
            "SegmentationAgent",
            json!({"segments": {"paid": ["2"], "free": ["1"]}}),
            1.0,
        );
        let paid = paid_conversations(&conversations, &segmentation);
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].id, "2");

        let failed = AgentResult::failure("SegmentationAgent", "boom");
        assert_eq!(paid_conversations(&conversations, &failed).len(), 2);
    }

    #[test]
    fn test_request_week_id_default() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
        let request = AnalysisRequest::new(Vec::new(), day, day);
        assert_eq!(request.resolved_week_id(), "2024_W23");
        assert_eq!(request.with_week_id("2024_W01").resolved_week_id(), "2024_W01");
    }
}
