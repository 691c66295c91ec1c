use chrono::{DateTime, Utc};
use std::sync::Arc;

use vigil_common::types::{AlertRule, ExpressionResults};
use vigil_state::StateStore;

use crate::context::EvaluationContext;
use crate::message::ChannelInvoker;
use crate::record::RecordSink;
use crate::steps::{
    ExpressionEvaluationStep, InhibitionStep, NotificationStep, RuleEvaluationStep,
};
use crate::{AlertError, EvaluationStep};

/// The evaluation pipeline: four steps in fixed order, one run per rule per
/// interval. Safe to share across worker tasks; each run owns its context.
pub struct Pipeline {
    steps: Vec<Box<dyn EvaluationStep>>,
}

impl Pipeline {
    pub fn new(sink: Arc<dyn RecordSink>, invoker: Arc<dyn ChannelInvoker>) -> Self {
        Self {
            steps: vec![
                Box::new(ExpressionEvaluationStep),
                Box::new(RuleEvaluationStep),
                Box::new(InhibitionStep),
                Box::new(NotificationStep::new(sink, invoker)),
            ],
        }
    }

    /// Runs one evaluation cycle for `rule` against the supplied raw
    /// per-expression results, then persists the updated state.
    ///
    /// The returned context carries the final `series_status` and the
    /// per-cycle log, the externally observable outputs of the cycle.
    pub async fn run(
        &self,
        rule: AlertRule,
        results: ExpressionResults,
        store: &dyn StateStore,
    ) -> Result<EvaluationContext, AlertError> {
        self.run_at(rule, results, store, Utc::now()).await
    }

    /// [`Pipeline::run`] with an explicit cycle-end timestamp.
    pub async fn run_at(
        &self,
        rule: AlertRule,
        results: ExpressionResults,
        store: &dyn StateStore,
        now: DateTime<Utc>,
    ) -> Result<EvaluationContext, AlertError> {
        let prev = store.load_state(&rule.id).await?;
        let mut ctx = EvaluationContext::new(rule, prev, results, now);

        for step in &self.steps {
            tracing::debug!(rule_id = %ctx.rule.id, step = step.name(), "running pipeline step");
            step.evaluate(store, &mut ctx).await?;
        }

        // Merge this cycle's decisions over the previous baseline. Labels
        // untouched this cycle keep their old entries; stale series are
        // pruned by an external collaborator, not here.
        let mut next = ctx.prev.clone().unwrap_or_default();
        for (label, status) in &ctx.series_status {
            let count = ctx.successive_counts.get(label).copied().unwrap_or(0);
            next.set_status(label.clone(), *status, count);
        }
        next.last_alert_at = ctx.last_alert_at;
        next.last_record_id = ctx.last_record_id.clone();
        store.save_state(&ctx.rule.id, &next).await?;

        Ok(ctx)
    }
}
