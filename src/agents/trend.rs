use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{Agent, AgentContext, AgentResult, ANALYSIS_TYPE_KEY};
use crate::error::{AgentError, AgentOutcome};
use crate::snapshot::{AnalysisType, SnapshotService};

const NAME: &str = "TrendAgent";
/// Context key of the partial analysis output the current snapshot is built from.
pub const ANALYSIS_OUTPUT_KEY: &str = "analysis_output";

/// Compares this run's aggregates against snapshot history.
///
/// The prior snapshot is looked up at the fixed period offset first; if that
/// exact period was never saved, the latest earlier snapshot is used and the
/// result says so.
pub struct TrendAgent {
    snapshots: SnapshotService,
}

impl TrendAgent {
    pub fn new(snapshots: SnapshotService) -> Self {
        Self { snapshots }
    }

    fn analysis_type(ctx: &AgentContext) -> AnalysisType {
        ctx.metadata(ANALYSIS_TYPE_KEY)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Agent for TrendAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn validate_input(&self, ctx: &AgentContext) -> AgentOutcome<()> {
        if !ctx.previous_results.contains_key(ANALYSIS_OUTPUT_KEY) {
            return Err(AgentError::InvalidInput {
                agent: NAME.to_string(),
                reason: "analysis output required".to_string(),
            });
        }
        Ok(())
    }

    async fn execute(&self, ctx: &AgentContext) -> AgentResult {
        let output = ctx
            .previous_results
            .get(ANALYSIS_OUTPUT_KEY)
            .cloned()
            .unwrap_or(Value::Null);
        let analysis_type = Self::analysis_type(ctx);
        let built = self.snapshots.build_snapshot(&output, analysis_type);
        let current = &built.snapshot;
        let mut limitations = Vec::new();

        let history = self.snapshots.get_historical_context().await;
        if !history.has_baseline {
            limitations.push(format!(
                "Only {} weekly snapshots stored; trend baselines need more history",
                history.weeks_available
            ));
        }

        let (prior, lookup) = match self
            .snapshots
            .get_prior_snapshot(&current.snapshot_id, analysis_type)
            .await
        {
            Some(prior) => (Some(prior), "fixed_offset"),
            None => match self
                .snapshots
                .find_latest_prior_snapshot(&current.snapshot_id, analysis_type)
                .await
            {
                Some(prior) => {
                    limitations.push(format!(
                        "No snapshot exactly one period earlier; compared against {}",
                        prior.snapshot_id
                    ));
                    (Some(prior), "latest_earlier")
                }
                None => {
                    limitations.push("No earlier snapshot to compare against".to_string());
                    (None, "none")
                }
            },
        };
        debug!(current = %current.snapshot_id, lookup = lookup, "Prior snapshot resolved");

        let comparison = match &prior {
            Some(prior) => {
                let comparison = self.snapshots.calculate_comparison(current, prior).await;
                if let Some(error) = &comparison.error {
                    limitations.push(format!("Comparison could not be derived: {}", error));
                }
                Some(comparison)
            }
            None => None,
        };
        if let Some(reason) = &built.validation_error {
            limitations.push(format!("Current aggregates failed validation: {}", reason));
        }

        let confidence = match (&comparison, history.has_baseline) {
            (Some(c), true) if !c.is_error() => 0.85,
            (Some(c), false) if !c.is_error() => 0.7,
            _ => 0.5,
        };

        info!(
            current = %current.snapshot_id,
            prior = prior.as_ref().map(|p| p.snapshot_id.as_str()).unwrap_or("-"),
            weeks_available = history.weeks_available,
            "Trend analysis complete"
        );

        AgentResult::success(
            NAME,
            json!({
                "historical_context": history,
                "current_snapshot_id": current.snapshot_id,
                "prior_snapshot_id": prior.as_ref().map(|p| p.snapshot_id.clone()),
                "prior_lookup": lookup,
                "comparison": comparison,
            }),
            confidence,
        )
        .with_source("snapshot history")
        .with_limitations(limitations)
    }
}
