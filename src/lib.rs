//! # Support Insights
//!
//! A multi-agent analysis pipeline for customer-support conversations with
//! persisted point-in-time snapshots for week-over-week comparison.
//!
//! ## Features
//!
//! - **Segmentation**: tier-first paid/free split and agent-type attribution
//! - **Topic Detection**: keyword taxonomy with sub-topics and LLM themes
//! - **Per-topic Fan-out**: sentiment and example extraction under a semaphore
//! - **Insights**: Fin performance, correlations, quality anomalies, churn signals
//! - **Snapshots**: deterministic per-period snapshots, comparisons and history
//!
//! ## Architecture
//!
//! ```text
//! Conversations → TopicOrchestrator → Agents → Langbase Pipes (HTTP)
//!                        ↓
//!                 SnapshotService → SQLite
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use support_insights::langbase::LangbaseClient;
//! use support_insights::orchestrator::{AgentSet, AnalysisRequest, ExecutionMonitor, TopicOrchestrator};
//! use support_insights::snapshot::SnapshotService;
//! use support_insights::storage::SqliteStorage;
//! use support_insights::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let snapshots = SnapshotService::new(Arc::new(storage));
//!     let client = LangbaseClient::new(&config.langbase, config.request.clone())?;
//!     let agents = AgentSet::standard(&config, Arc::new(client), snapshots.clone())?;
//!     let orchestrator = TopicOrchestrator::new(
//!         config.orchestrator.clone(),
//!         agents,
//!         snapshots,
//!         ExecutionMonitor::new(),
//!     );
//!     let report = orchestrator.analyze(AnalysisRequest::new(conversations, start, end)).await;
//!     println!("{}", report.render_markdown());
//!     Ok(())
//! }
//! ```

/// Analysis agents and their execution contract.
pub mod agents;
/// Command-line interface.
pub mod cli;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Langbase API client and types for pipe communication.
pub mod langbase;
/// Conversation records and the topic side-table.
pub mod models;
/// Phase sequencing, fan-out and reporting.
pub mod orchestrator;
/// System prompts for Langbase pipes.
pub mod prompts;
/// Snapshots, extraction and comparison.
pub mod snapshot;
/// Snapshot persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
