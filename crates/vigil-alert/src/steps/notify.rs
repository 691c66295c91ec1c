use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use vigil_common::types::{AlertStatus, Label};
use vigil_state::StateStore;

use crate::context::EvaluationContext;
use crate::message::{ChannelInvoker, NotificationMessage};
use crate::record::{next_record_id, AlertRecord, RecordSink, RECORD_STATUS_UNCHECKED};
use crate::{AlertError, EvaluationStep};

/// Commits legal status transitions, reverts illegal ones, and dispatches
/// fire/resolve notification batches.
///
/// The fire path persists an audit record before any channel is invoked; a
/// record-sink failure aborts the whole fire batch so the system never pages
/// without a corresponding record. Channel failures are isolated per channel.
pub struct NotificationStep {
    sink: Arc<dyn RecordSink>,
    invoker: Arc<dyn ChannelInvoker>,
}

impl NotificationStep {
    pub fn new(sink: Arc<dyn RecordSink>, invoker: Arc<dyn ChannelInvoker>) -> Self {
        Self { sink, invoker }
    }

    /// Start and end of the window the fire record covers.
    ///
    /// The end is the earliest start among matched outputs moved forward by
    /// one interval, capped at the current cycle end; the start reaches back
    /// `(for_times - 1) * every` from that base to cover the full debounce
    /// window. Assumes `every` was constant across the debounce window; if
    /// the interval changed between cycles the window is approximate.
    fn record_window(ctx: &EvaluationContext) -> (DateTime<Utc>, DateTime<Utc>) {
        let every = ctx.rule.every();
        let base = ctx
            .results
            .values()
            .filter(|r| r.matched())
            .flat_map(|r| r.outputs.iter())
            .filter(|o| o.matched)
            .map(|o| o.start)
            .min()
            .unwrap_or(ctx.now - every);
        let start = base - every * (ctx.rule.for_times.saturating_sub(1) as i32);
        let end = (base + every).min(ctx.now);
        (start, end)
    }

    async fn dispatch(&self, ctx: &mut EvaluationContext, message: &NotificationMessage) {
        let channels = ctx.rule.channels.clone();
        for channel in &channels {
            match self.invoker.notify(channel, message).await {
                Ok(()) => ctx.log(format!(
                    "sent {} notification to channel '{channel}'",
                    message.status
                )),
                Err(e) => {
                    // One channel failing must not stop the others.
                    tracing::error!(
                        rule_id = %ctx.rule.id,
                        channel = %channel,
                        error = %e,
                        "notification channel failed"
                    );
                    ctx.log(format!("channel '{channel}' failed: {e}"));
                }
            }
        }
    }

    async fn fire(&self, ctx: &mut EvaluationContext, labels: Vec<Label>) {
        let (window_start, window_end) = Self::record_window(ctx);
        let record = AlertRecord {
            id: next_record_id(),
            rule_id: ctx.rule.id.clone(),
            rule_name: ctx.rule.name.clone(),
            app: ctx.rule.app.clone(),
            created_at: ctx.now,
            payload: serde_json::json!({
                "expression": ctx.rule.alert_expression.to_string(),
                "window_start": window_start,
                "window_end": window_end,
                "labels": labels,
                "conditions": ctx.results,
            }),
            status: RECORD_STATUS_UNCHECKED,
        };

        if let Err(e) = self.sink.add_record(&record).await {
            // Consistency over availability: without a durable record there
            // is no paging this cycle.
            tracing::error!(
                rule_id = %ctx.rule.id,
                error = %e,
                "failed to persist alert record, skipping fire notification"
            );
            ctx.log(format!(
                "failed to persist alert record, fire notification skipped: {e}"
            ));
            return;
        }

        let message = NotificationMessage {
            status: AlertStatus::Alerting,
            end: ctx.now,
            rule: ctx.rule.clone(),
            labels,
            results: ctx.results.clone(),
            last_alert_at: ctx.prev.as_ref().and_then(|p| p.last_alert_at),
            record_id: Some(record.id.clone()),
        };
        ctx.last_record_id = Some(record.id);
        ctx.last_alert_at = Some(ctx.now);
        self.dispatch(ctx, &message).await;
    }

    async fn resolve(&self, ctx: &mut EvaluationContext, labels: Vec<Label>) {
        // No new record: the resolve links back to the record opened by the
        // most recent fire.
        let message = NotificationMessage {
            status: AlertStatus::Resolved,
            end: ctx.now,
            rule: ctx.rule.clone(),
            labels,
            results: ctx.results.clone(),
            last_alert_at: ctx.prev.as_ref().and_then(|p| p.last_alert_at),
            record_id: ctx.prev.as_ref().and_then(|p| p.last_record_id.clone()),
        };
        self.dispatch(ctx, &message).await;
    }
}

#[async_trait]
impl EvaluationStep for NotificationStep {
    fn name(&self) -> &str {
        "notification"
    }

    async fn evaluate(
        &self,
        _store: &dyn StateStore,
        ctx: &mut EvaluationContext,
    ) -> Result<(), AlertError> {
        let mut entries: Vec<(Label, AlertStatus)> = ctx
            .series_status
            .iter()
            .map(|(label, status)| (label.clone(), *status))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut fire_labels = Vec::new();
        let mut resolve_labels = Vec::new();

        for (label, new_status) in entries {
            let prev_status = ctx.prev_status(&label);
            if !prev_status.can_transit_to(new_status) {
                ctx.series_status.insert(label.clone(), prev_status);
                ctx.log(format!(
                    "label {label}: stays in {prev_status} (transition to {new_status} not allowed)"
                ));
                continue;
            }

            if new_status == AlertStatus::Alerting {
                fire_labels.push(label.clone());
            } else if new_status == AlertStatus::Resolved
                && matches!(
                    prev_status,
                    AlertStatus::Alerting | AlertStatus::Suppressing
                )
            {
                resolve_labels.push(label.clone());
            }
            ctx.log(format!("label {label}: {prev_status} -> {new_status}"));
        }

        // One batch per notification kind, not one message per label.
        if !fire_labels.is_empty() {
            self.fire(ctx, fire_labels).await;
        }
        if !resolve_labels.is_empty() {
            self.resolve(ctx, resolve_labels).await;
        }
        Ok(())
    }
}
