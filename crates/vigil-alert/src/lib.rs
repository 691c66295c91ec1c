//! Rule-evaluation pipeline and per-series alert state machine.
//!
//! An external scheduler invokes [`Pipeline::run`] once per rule per
//! interval. The pipeline runs four steps in fixed order — expression
//! evaluation, rule evaluation (debounce), inhibition (silence), and
//! notification — over a single-owner [`context::EvaluationContext`],
//! then persists the resulting per-series state for the next cycle.

pub mod context;
pub mod message;
pub mod pipeline;
pub mod record;
pub mod steps;

#[cfg(test)]
mod tests;

use async_trait::async_trait;

use vigil_common::expr::ExprError;
use vigil_state::{StateError, StateStore};

use crate::context::EvaluationContext;

pub use crate::pipeline::Pipeline;

/// Errors that abort an evaluation cycle.
///
/// Notification-channel and audit-record failures are recovered inside the
/// notification step and never surface here; expression and state-store
/// failures are fatal because debounce correctness depends on them.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// The combining boolean expression could not be evaluated. Fail-closed:
    /// no notifications are produced from a half-evaluated rule.
    #[error("expression evaluation failed: {0}")]
    Expression(#[from] ExprError),

    /// A state-store operation failed.
    #[error("state store operation failed: {0}")]
    State(#[from] StateError),
}

/// One step of the evaluation pipeline. Steps are composed as an ordered
/// list of boxed trait objects and iterated in sequence; each reads and
/// writes the shared per-cycle context and the injected state store.
#[async_trait]
pub trait EvaluationStep: Send + Sync {
    /// Step name used in logs.
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        store: &dyn StateStore,
        ctx: &mut EvaluationContext,
    ) -> Result<(), AlertError>;
}
