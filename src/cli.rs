//! Command-line interface.
//!
//! Each subcommand produces a [`CliResult`]; `main` prints the message and
//! exits with the code.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, AppResult, SnapshotError};
use crate::langbase::LangbaseClient;
use crate::models::Conversation;
use crate::orchestrator::{AgentSet, AnalysisRequest, ExecutionMonitor, TopicOrchestrator};
use crate::snapshot::{
    comparison_json_schema, migrate_legacy_snapshots, parse_snapshot_date, snapshot_json_schema,
    AnalysisType, SnapshotService,
};
use crate::storage::SqliteStorage;

/// Support conversation analysis with week-over-week snapshots.
#[derive(Parser, Debug)]
#[command(name = "support-insights", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a full analysis over exported conversations
    Analyze {
        /// JSON file holding an array of conversations
        #[arg(long)]
        input: PathBuf,

        /// First day of the period (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last day of the period (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// ISO week id (YYYY_Www); defaults to the week of --start
        #[arg(long)]
        week_id: Option<String>,

        /// Snapshot period type
        #[arg(long = "type", default_value = "weekly")]
        analysis_type: AnalysisType,

        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
    },

    /// Show how much weekly snapshot history exists
    Context,

    /// Compare a stored snapshot with the one a period earlier
    Compare {
        /// Snapshot id, e.g. weekly_20240603
        #[arg(long)]
        current: String,

        #[arg(long = "type", default_value = "weekly")]
        analysis_type: AnalysisType,
    },

    /// Mark a snapshot as reviewed
    Review {
        snapshot_id: String,

        #[arg(long)]
        reviewer: String,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Import legacy flat-file snapshots from a directory
    Migrate {
        #[arg(long)]
        dir: PathBuf,

        /// Type used for files that do not name one
        #[arg(long = "type", default_value = "weekly")]
        analysis_type: AnalysisType,
    },

    /// Print a JSON schema
    Schema {
        #[arg(value_enum, default_value_t = SchemaKind::Snapshot)]
        kind: SchemaKind,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Markdown,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Snapshot,
    Comparison,
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    pub message: String,
}

impl CliResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

impl From<AppResult<String>> for CliResult {
    fn from(result: AppResult<String>) -> Self {
        match result {
            Ok(message) => CliResult::success(message),
            Err(e) => CliResult::error(format!("Error: {}", e)),
        }
    }
}

/// Execute a CLI command.
pub async fn execute_command(command: Commands, config: &Config) -> CliResult {
    if let Commands::Schema { kind } = command {
        return execute_schema(kind).into();
    }

    let storage = match SqliteStorage::new(&config.database).await {
        Ok(storage) => storage,
        Err(e) => return CliResult::error(format!("Error: failed to open database: {}", e)),
    };
    let snapshots = SnapshotService::new(Arc::new(storage));

    let result = match command {
        Commands::Analyze {
            input,
            start,
            end,
            week_id,
            analysis_type,
            format,
        } => {
            let request = match load_conversations(&input) {
                Ok(conversations) => {
                    let request = AnalysisRequest::new(conversations, start, end)
                        .with_analysis_type(analysis_type);
                    match week_id {
                        Some(week_id) => request.with_week_id(week_id),
                        None => request,
                    }
                }
                Err(e) => return CliResult::error(format!("Error: {}", e)),
            };
            execute_analyze(config, snapshots, request, format).await
        }
        Commands::Context => execute_context(&snapshots).await,
        Commands::Compare {
            current,
            analysis_type,
        } => execute_compare(&snapshots, &current, analysis_type).await,
        Commands::Review {
            snapshot_id,
            reviewer,
            notes,
        } => snapshots
            .review_snapshot(&snapshot_id, &reviewer, notes)
            .await
            .map(|review| format!("{} reviewed by {} at {}", snapshot_id, review.reviewed_by, review.reviewed_at))
            .map_err(AppError::from),
        Commands::Migrate { dir, analysis_type } => {
            execute_migrate(&snapshots, &dir, analysis_type).await
        }
        Commands::Schema { kind } => execute_schema(kind),
    };
    result.into()
}

fn load_conversations(path: &Path) -> AppResult<Vec<Conversation>> {
    let raw = std::fs::read_to_string(path).map_err(|e| AppError::Config {
        message: format!("Cannot read {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&raw).map_err(|e| AppError::Config {
        message: format!("Invalid conversations file {}: {}", path.display(), e),
    })
}

async fn execute_analyze(
    config: &Config,
    snapshots: SnapshotService,
    request: AnalysisRequest,
    format: OutputFormat,
) -> AppResult<String> {
    let client = LangbaseClient::new(&config.langbase, config.request.clone())?;
    let agents = AgentSet::standard(config, Arc::new(client), snapshots.clone())?;
    let orchestrator = TopicOrchestrator::new(
        config.orchestrator.clone(),
        agents,
        snapshots,
        ExecutionMonitor::new(),
    );

    let report = orchestrator.analyze(request).await;
    info!(analysis_id = %report.analysis_id, "Report ready");

    match format {
        OutputFormat::Markdown => Ok(report.render_markdown()),
        OutputFormat::Json => serde_json::to_string_pretty(&report).map_err(|e| AppError::Internal {
            message: format!("Failed to serialize report: {}", e),
        }),
    }
}

async fn execute_context(snapshots: &SnapshotService) -> AppResult<String> {
    let context = snapshots.get_historical_context().await;
    let baseline = context
        .baseline_date
        .map(|d| d.to_string())
        .unwrap_or_else(|| "none".to_string());
    Ok(format!(
        "Weekly snapshots: {}\nBaseline: {} (since {})\nTrends: {}\nSeasonality: {}",
        context.weeks_available,
        if context.has_baseline { "yes" } else { "no" },
        baseline,
        if context.can_do_trends { "available" } else { "not enough history" },
        if context.can_do_seasonality { "available" } else { "not enough history" },
    ))
}

async fn execute_compare(
    snapshots: &SnapshotService,
    current_id: &str,
    analysis_type: AnalysisType,
) -> AppResult<String> {
    if parse_snapshot_date(current_id).is_none() {
        return Err(SnapshotError::InvalidSnapshotId {
            snapshot_id: current_id.to_string(),
        }
        .into());
    }
    let Some(current) = snapshots.get_snapshot(current_id).await? else {
        return Ok(format!("No snapshot {}", current_id));
    };
    let Some(prior) = snapshots.get_prior_snapshot(current_id, analysis_type).await else {
        return Ok(format!(
            "No {} snapshot {} days before {}",
            analysis_type,
            analysis_type.prior_offset_days(),
            current_id
        ));
    };

    let comparison = snapshots.calculate_comparison(&current, &prior).await;
    serde_json::to_string_pretty(&comparison)
        .map_err(SnapshotError::from)
        .map_err(AppError::from)
}

async fn execute_migrate(
    snapshots: &SnapshotService,
    dir: &Path,
    analysis_type: AnalysisType,
) -> AppResult<String> {
    let report = migrate_legacy_snapshots(snapshots, dir, analysis_type).await?;
    let mut message = format!(
        "Migrated {} of {} files",
        report.migrated.len(),
        report.total()
    );
    for failure in &report.failed {
        message.push_str(&format!("\n  failed {}: {}", failure.path.display(), failure.reason));
    }
    Ok(message)
}

fn execute_schema(kind: SchemaKind) -> AppResult<String> {
    let schema = match kind {
        SchemaKind::Snapshot => serde_json::to_string_pretty(&snapshot_json_schema()),
        SchemaKind::Comparison => serde_json::to_string_pretty(&comparison_json_schema()),
    };
    schema.map_err(|e| AppError::Internal {
        message: format!("Failed to render schema: {}", e),
    })
}
