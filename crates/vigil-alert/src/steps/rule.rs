use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;

use vigil_common::types::{AlertStatus, Label};
use vigil_state::StateStore;

use crate::context::EvaluationContext;
use crate::{AlertError, EvaluationStep};

/// Margin added to the counter TTL on top of the rule's interval, absorbing
/// scheduler jitter. A label not re-matched within roughly one interval has
/// its counter expire silently instead of persisting forever.
const COUNTER_TTL_MARGIN: Duration = Duration::from_secs(30);

/// Debounce state machine: turns the boolean expression outcome into
/// per-series PENDING/ALERTING/RESOLVED decisions backed by the
/// successive-match counters in the state store.
pub struct RuleEvaluationStep;

impl RuleEvaluationStep {
    /// Labels produced by MATCHED sub-expressions this cycle, deduplicated.
    fn matched_labels(ctx: &EvaluationContext) -> BTreeSet<Label> {
        ctx.results
            .values()
            .filter(|r| r.matched())
            .flat_map(|r| r.outputs.iter())
            .filter(|o| o.matched)
            .map(|o| o.label.clone())
            .collect()
    }
}

#[async_trait]
impl EvaluationStep for RuleEvaluationStep {
    fn name(&self) -> &str {
        "rule-evaluation"
    }

    async fn evaluate(
        &self,
        store: &dyn StateStore,
        ctx: &mut EvaluationContext,
    ) -> Result<(), AlertError> {
        if !ctx.expression_evaluated_as_true {
            // A false evaluation clears every previously tracked series.
            // Counters are left to expire via TTL.
            let tracked: Vec<Label> = ctx
                .prev
                .as_ref()
                .map(|p| p.series.keys().cloned().collect())
                .unwrap_or_default();
            for label in tracked {
                ctx.series_status.insert(label.clone(), AlertStatus::Resolved);
                ctx.log(format!("label {label}: rule evaluated false -> RESOLVED"));
            }
            return Ok(());
        }

        let ttl = Duration::from_secs(ctx.rule.every_secs) + COUNTER_TTL_MARGIN;
        let threshold = ctx.rule.expected_match_count();

        for label in Self::matched_labels(ctx) {
            let count = store
                .incr_successive_count(&ctx.rule.id, &label, ttl)
                .await?;
            let status = if count >= threshold {
                AlertStatus::Alerting
            } else {
                AlertStatus::Pending
            };
            ctx.log(format!(
                "label {label}: successive match {count}/{threshold} -> {status}"
            ));
            ctx.successive_counts.insert(label.clone(), count);
            ctx.series_status.insert(label, status);
        }
        Ok(())
    }
}
