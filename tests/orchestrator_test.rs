//! Integration tests for the topic orchestrator
//!
//! Tests bounded fan-out, per-topic failure isolation and a full run with
//! scripted pipe completions and an in-memory snapshot store.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use support_insights::agents::{Agent, AgentContext, AgentResult};
use support_insights::config::{
    Config, DatabaseConfig, LangbaseConfig, LogFormat, LoggingConfig, OrchestratorConfig,
    PipeConfig, RequestConfig, SegmentationConfig,
};
use support_insights::error::LangbaseResult;
use support_insights::langbase::{CompletionProvider, Message};
use support_insights::models::Conversation;
use support_insights::orchestrator::{
    fan_out_topics, AgentSet, AnalysisRequest, ExecutionMonitor, SectionStatus, TopicEntry,
    TopicOrchestrator, TopicOutcome, TopicWorker, SLOTS,
};
use support_insights::snapshot::SnapshotService;
use support_insights::storage::SqliteStorage;

// ============================================================================
// Fan-out
// ============================================================================

/// Sleeps while tracking how many topics are in flight.
#[derive(Default)]
struct CountingWorker {
    current: AtomicUsize,
    max_seen: AtomicUsize,
}

#[async_trait]
impl TopicWorker for CountingWorker {
    async fn analyze_topic(&self, topic: &str) -> TopicOutcome {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);

        TopicOutcome {
            topic: topic.to_string(),
            sentiment: Some(Ok(AgentResult::success("SentimentAgent", json!({}), 0.8))),
            examples: None,
        }
    }
}

/// Panics on one topic and fails sentiment on another.
struct FlakyWorker;

#[async_trait]
impl TopicWorker for FlakyWorker {
    async fn analyze_topic(&self, topic: &str) -> TopicOutcome {
        match topic {
            "Bug" => panic!("worker blew up"),
            "API" => TopicOutcome {
                topic: topic.to_string(),
                sentiment: Some(Ok(AgentResult::failure("SentimentAgent", "bad json"))),
                examples: None,
            },
            _ => TopicOutcome {
                topic: topic.to_string(),
                sentiment: Some(Ok(AgentResult::success("SentimentAgent", json!({}), 0.8))),
                examples: Some(AgentResult::success(
                    "ExampleExtractionAgent",
                    json!({"example_count": 1}),
                    0.7,
                )),
            },
        }
    }
}

fn volumes(entries: &[(&str, u64)]) -> BTreeMap<String, u64> {
    entries.iter().map(|(t, v)| (t.to_string(), *v)).collect()
}

#[tokio::test]
async fn test_fan_out_respects_width() {
    let worker = Arc::new(CountingWorker::default());
    let topics = volumes(&[
        ("A", 3),
        ("B", 1),
        ("C", 7),
        ("D", 2),
        ("E", 9),
        ("F", 4),
        ("Quiet", 0),
    ]);

    let (outcomes, skipped) = fan_out_topics(&topics, 2, worker.clone()).await;

    assert_eq!(outcomes.len(), 6);
    assert_eq!(skipped, vec!["Quiet".to_string()]);
    assert!(worker.max_seen.load(Ordering::SeqCst) <= 2);
    assert!(worker.max_seen.load(Ordering::SeqCst) >= 1);

    let names: Vec<&str> = outcomes.iter().map(|o| o.topic.as_str()).collect();
    assert_eq!(names, vec!["A", "B", "C", "D", "E", "F"]);
}

#[tokio::test]
async fn test_fan_out_zero_width_still_runs() {
    let worker = Arc::new(CountingWorker::default());
    let (outcomes, _) = fan_out_topics(&volumes(&[("A", 1), ("B", 1)]), 0, worker.clone()).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(worker.max_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fan_out_isolates_failures() {
    let topics = volumes(&[("API", 2), ("Billing", 5), ("Bug", 3), ("Export", 1)]);

    let (outcomes, skipped) = fan_out_topics(&topics, 4, Arc::new(FlakyWorker)).await;

    assert!(skipped.is_empty());
    assert_eq!(outcomes.len(), 4);

    let entries: Vec<TopicEntry> = outcomes.iter().map(TopicEntry::classify).collect();
    assert!(matches!(entries[0], TopicEntry::Failed { ref error, .. } if error == "bad json"));
    assert!(matches!(entries[1], TopicEntry::Analyzed { example_count: 1, .. }));
    assert!(matches!(entries[2], TopicEntry::Failed { .. }));
    assert!(matches!(entries[3], TopicEntry::Analyzed { .. }));
    assert_eq!(entries[2].topic(), "Bug");
}

// ============================================================================
// Full run
// ============================================================================

/// Answers each pipe with a canned completion and counts calls.
#[derive(Default)]
struct ScriptedProvider {
    calls: Mutex<BTreeMap<String, usize>>,
}

impl ScriptedProvider {
    fn calls(&self, pipe: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(pipe).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// First `[id]` listed in the user message.
    fn first_listed_id(messages: &[Message]) -> String {
        let content = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        content
            .split("- [")
            .nth(1)
            .and_then(|rest| rest.split(']').next())
            .unwrap_or("none")
            .to_string()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, pipe: &str, messages: Vec<Message>) -> LangbaseResult<String> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(pipe.to_string()).or_default() += 1;
        }

        let body = match pipe {
            "topic-sentiment-v1" => json!({
                "sentiment_insight": "Customers are frustrated by slow refunds",
                "positive": 0.2,
                "negative": 0.6,
                "neutral": 0.2,
                "confidence": 0.8
            }),
            "example-extraction-v1" => json!({
                "examples": [{
                    "conversation_id": Self::first_listed_id(&messages),
                    "summary": "Waiting on a refund",
                    "why_representative": "Typical complaint"
                }],
                "confidence": 0.75
            }),
            _ => json!({
                "themes": [{"name": "Delayed refunds", "description": "Refund not received", "conversation_count": 3}]
            }),
        };
        Ok(format!("```json\n{}\n```", body))
    }
}

fn test_config() -> Config {
    Config {
        langbase: LangbaseConfig {
            api_key: "test-key".to_string(),
            base_url: "http://localhost".to_string(),
        },
        database: DatabaseConfig {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        },
        request: RequestConfig::default(),
        pipes: PipeConfig::default(),
        orchestrator: OrchestratorConfig {
            max_concurrent_topics: 2,
            ..OrchestratorConfig::default()
        },
        segmentation: SegmentationConfig {
            vendor_a_domains: vec!["vendor-a.com".to_string()],
            vendor_b_domains: vec!["vendor-b.com".to_string()],
            escalation_names: vec!["dana".to_string()],
        },
    }
}

fn conversations(billing: usize) -> Vec<Conversation> {
    let mut all = Vec::new();
    for i in 0..billing {
        let mut conv = Conversation::new(
            format!("b{}", i),
            "I was charged twice and want a refund for this invoice",
        )
        .with_tier("pro")
        .closed_after_hours(4);
        conv.rating = Some(if i % 2 == 0 { 2 } else { 4 });
        all.push(conv);
    }
    for i in 0..4 {
        all.push(
            Conversation::new(format!("a{}", i), "I cannot log in, password reset is broken")
                .with_tier("free")
                .with_ai_agent()
                .closed_after_hours(1),
        );
    }
    all.push(Conversation::new("x0", "hello there").with_tier("pro"));
    all
}

async fn orchestrator() -> (TopicOrchestrator, SnapshotService, Arc<ScriptedProvider>) {
    orchestrator_with(|_| {}).await
}

/// Standard agents with `adjust` applied before the orchestrator is built.
async fn orchestrator_with(
    adjust: impl FnOnce(&mut AgentSet),
) -> (TopicOrchestrator, SnapshotService, Arc<ScriptedProvider>) {
    let config = test_config();
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let snapshots = SnapshotService::new(Arc::new(storage));
    let provider = Arc::new(ScriptedProvider::default());
    let mut agents = AgentSet::standard(&config, provider.clone(), snapshots.clone()).unwrap();
    adjust(&mut agents);
    let orchestrator = TopicOrchestrator::new(
        config.orchestrator.clone(),
        agents,
        snapshots.clone(),
        ExecutionMonitor::new(),
    );
    (orchestrator, snapshots, provider)
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn test_full_run_fills_every_section() {
    let (orchestrator, snapshots, provider) = orchestrator().await;
    let request = AnalysisRequest::new(conversations(6), day(2024, 6, 3), day(2024, 6, 9));

    let report = orchestrator.analyze(request).await;

    assert_eq!(report.week_id, "2024_W23");
    assert_eq!(report.total_conversations, 11);
    assert_eq!(report.sections.len(), SLOTS.len());
    for (key, _, _) in SLOTS {
        assert!(report.section(key).is_some(), "missing section {}", key);
        assert!(report.output["results"].get(key).is_some(), "missing slot {}", key);
    }

    for key in ["segmentation", "topic_detection", "topic_sentiments", "topic_examples", "trend"] {
        let section = report.section(key).unwrap();
        assert_eq!(section.status, SectionStatus::Complete, "{} was {:?}", key, section);
    }

    let topic_names: Vec<&str> = report.topics.iter().map(TopicEntry::topic).collect();
    assert!(topic_names.contains(&"Billing"));
    assert!(topic_names.contains(&"Account"));
    assert!(report
        .topics
        .iter()
        .all(|t| matches!(t, TopicEntry::Analyzed { .. })));

    // One sentiment and one examples call per analysed topic
    assert_eq!(provider.calls("topic-sentiment-v1"), report.topics.len());
    assert_eq!(provider.calls("example-extraction-v1"), report.topics.len());

    assert_eq!(report.snapshot_id.as_deref(), Some("weekly_20240603"));
    let saved = snapshots.get_snapshot("weekly_20240603").await.unwrap().unwrap();
    assert_eq!(saved.topic_volumes.get("Billing"), Some(&6));
    assert_eq!(saved.total_conversations, 11);

    assert_eq!(report.output["results"]["trend"]["data"]["prior_lookup"], "none");
    assert!(report.execution.total_executions > 0);

    let markdown = report.render_markdown();
    assert!(markdown.contains("# Support Analysis 2024_W23"));
    assert!(markdown.contains("Snapshot: weekly_20240603"));
}

#[tokio::test]
async fn test_second_week_compares_with_first() {
    let (orchestrator, _snapshots, _provider) = orchestrator().await;

    orchestrator
        .analyze(AnalysisRequest::new(conversations(6), day(2024, 6, 3), day(2024, 6, 9)))
        .await;
    let report = orchestrator
        .analyze(AnalysisRequest::new(conversations(20), day(2024, 6, 10), day(2024, 6, 16)))
        .await;

    assert_eq!(report.snapshot_id.as_deref(), Some("weekly_20240610"));
    let trend = &report.output["results"]["trend"]["data"];
    assert_eq!(trend["prior_lookup"], "fixed_offset");
    assert_eq!(trend["prior_snapshot_id"], "weekly_20240603");
    assert_eq!(trend["comparison"]["volume_changes"]["Billing"]["change"], 14);
}

#[tokio::test]
async fn test_empty_run_degrades_without_panicking() {
    let (orchestrator, _snapshots, provider) = orchestrator().await;

    let report = orchestrator
        .analyze(AnalysisRequest::new(Vec::new(), day(2024, 6, 3), day(2024, 6, 9)))
        .await;

    assert_eq!(report.total_conversations, 0);
    assert_eq!(report.sections.len(), SLOTS.len());
    assert!(report.topics.is_empty());
    assert_eq!(
        report.section("segmentation").unwrap().status,
        SectionStatus::Failed
    );
    assert_eq!(provider.calls("topic-sentiment-v1"), 0);
    assert!(report.execution.failed > 0);
}

#[tokio::test]
async fn test_auto_save_can_be_disabled() {
    let mut config = test_config();
    config.orchestrator.auto_save_snapshot = false;
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let snapshots = SnapshotService::new(Arc::new(storage));
    let agents =
        AgentSet::standard(&config, Arc::new(ScriptedProvider::default()), snapshots.clone()).unwrap();
    let orchestrator = TopicOrchestrator::new(
        config.orchestrator.clone(),
        agents,
        snapshots.clone(),
        ExecutionMonitor::new(),
    );

    let report = orchestrator
        .analyze(AnalysisRequest::new(conversations(3), day(2024, 6, 3), day(2024, 6, 9)))
        .await;

    assert!(report.snapshot_id.is_none());
    assert!(snapshots.get_snapshot("weekly_20240603").await.unwrap().is_none());
}

/// Agent whose `execute` panics.
struct PanickingAgent(&'static str);

#[async_trait]
impl Agent for PanickingAgent {
    fn name(&self) -> &str {
        self.0
    }

    async fn execute(&self, _ctx: &AgentContext) -> AgentResult {
        panic!("{} crashed", self.0)
    }
}

#[tokio::test]
async fn test_panicking_phase_becomes_failed_section() {
    let (orchestrator, snapshots, _provider) = orchestrator_with(|agents| {
        agents.tier_performance = Arc::new(PanickingAgent("TierPerformanceAgent"));
    })
    .await;

    let report = orchestrator
        .analyze(AnalysisRequest::new(conversations(6), day(2024, 6, 3), day(2024, 6, 9)))
        .await;

    assert_eq!(report.sections.len(), SLOTS.len());
    for (key, _, _) in SLOTS {
        assert!(report.output["results"].get(key).is_some(), "missing slot {}", key);
    }
    assert_eq!(
        report.section("tier_performance").unwrap().status,
        SectionStatus::Failed
    );
    let tier = &report.output["results"]["tier_performance"];
    assert_eq!(tier["success"], false);
    assert!(tier["error_message"]
        .as_str()
        .unwrap()
        .contains("TierPerformanceAgent task aborted"));

    // Later phases still ran
    assert_eq!(report.section("trend").unwrap().status, SectionStatus::Complete);
    assert_eq!(report.snapshot_id.as_deref(), Some("weekly_20240603"));
    assert!(snapshots.get_snapshot("weekly_20240603").await.unwrap().is_some());
}

#[tokio::test]
async fn test_insights_fan_out_isolates_panicking_agent() {
    let (orchestrator, _snapshots, _provider) = orchestrator_with(|agents| {
        agents.churn_risk = Arc::new(PanickingAgent("ChurnRiskAgent"));
    })
    .await;

    let report = orchestrator
        .analyze(AnalysisRequest::new(conversations(6), day(2024, 6, 3), day(2024, 6, 9)))
        .await;

    let results = &report.output["results"];
    for key in ["correlation", "quality_insights", "confidence_meta"] {
        assert_eq!(results[key]["success"], true, "{} should succeed", key);
    }
    assert_eq!(results["churn_risk"]["success"], false);
    assert!(results["churn_risk"]["error_message"]
        .as_str()
        .unwrap()
        .contains("ChurnRiskAgent task aborted"));
    assert_eq!(report.section("churn_risk").unwrap().status, SectionStatus::Failed);
}
