use async_trait::async_trait;

use vigil_state::StateStore;

use crate::context::EvaluationContext;
use crate::{AlertError, EvaluationStep};

/// Evaluates the rule's combining boolean expression over the raw
/// sub-expression results already present in the context.
///
/// Touches no persisted state. An evaluation error propagates to the caller
/// and aborts the remaining steps for this cycle.
pub struct ExpressionEvaluationStep;

#[async_trait]
impl EvaluationStep for ExpressionEvaluationStep {
    fn name(&self) -> &str {
        "expression-evaluation"
    }

    async fn evaluate(
        &self,
        _store: &dyn StateStore,
        ctx: &mut EvaluationContext,
    ) -> Result<(), AlertError> {
        let outcome = ctx.rule.alert_expression.evaluate(&ctx.results)?;
        ctx.expression_evaluated_as_true = outcome;
        ctx.log(format!(
            "rule '{}': expression {} evaluated as {}",
            ctx.rule.name, ctx.rule.alert_expression, outcome
        ));
        Ok(())
    }
}
