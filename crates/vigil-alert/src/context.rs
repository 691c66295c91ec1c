use chrono::{DateTime, Utc};
use std::collections::HashMap;

use vigil_common::types::{AlertRule, AlertStatus, ExpressionResults, Label};
use vigil_state::AlertState;

/// Per-cycle, per-rule mutable scratch space.
///
/// Owned by exactly one pipeline run; never shared across concurrent cycles.
/// Each step progressively overwrites `series_status`, and the final map plus
/// the accumulated log are the externally observable outputs of the cycle.
#[derive(Debug)]
pub struct EvaluationContext {
    /// Rule definition, read-only during evaluation.
    pub rule: AlertRule,
    /// State persisted by the previous cycle; `None` for a brand-new rule.
    pub prev: Option<AlertState>,
    /// Raw per-expression results supplied by the query engine.
    pub results: ExpressionResults,
    /// Derived status per label, overwritten step by step.
    pub series_status: HashMap<Label, AlertStatus>,
    /// Outcome of the combining boolean expression.
    pub expression_evaluated_as_true: bool,
    /// Successive-match counts observed this cycle, for state persistence.
    pub successive_counts: HashMap<Label, u64>,
    /// End timestamp of this evaluation cycle.
    pub now: DateTime<Utc>,
    /// Timestamp of the most recent fire, updated when a record is persisted.
    pub last_alert_at: Option<DateTime<Utc>>,
    /// Record id of the most recent fire, updated when a record is persisted.
    pub last_record_id: Option<String>,
    log: Vec<String>,
}

impl EvaluationContext {
    pub fn new(
        rule: AlertRule,
        prev: Option<AlertState>,
        results: ExpressionResults,
        now: DateTime<Utc>,
    ) -> Self {
        let last_alert_at = prev.as_ref().and_then(|p| p.last_alert_at);
        let last_record_id = prev.as_ref().and_then(|p| p.last_record_id.clone());
        Self {
            rule,
            prev,
            results,
            series_status: HashMap::new(),
            expression_evaluated_as_true: false,
            successive_counts: HashMap::new(),
            now,
            last_alert_at,
            last_record_id,
            log: Vec::new(),
        }
    }

    /// Status the label held at the end of the previous cycle, defaulting to
    /// the implicit READY for labels never seen before.
    pub fn prev_status(&self, label: &Label) -> AlertStatus {
        self.prev
            .as_ref()
            .map(|p| p.status_of(label))
            .unwrap_or(AlertStatus::Ready)
    }

    /// Appends one line to the per-cycle audit log and mirrors it to the
    /// process log.
    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(rule_id = %self.rule.id, "{line}");
        self.log.push(line);
    }

    /// The structured per-cycle narration, in append order.
    pub fn log_lines(&self) -> &[String] {
        &self.log
    }
}
