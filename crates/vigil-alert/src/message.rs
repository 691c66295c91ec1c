use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use vigil_common::types::{AlertRule, AlertStatus, ExpressionResults, Label};

/// Transient message assembled for delivery to notification channels.
///
/// One message is built per notification kind per rule per cycle; a batch
/// may report multiple labels.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationMessage {
    /// Target status: ALERTING for fire, RESOLVED for resolve.
    pub status: AlertStatus,
    /// End timestamp of the evaluation cycle that produced the message.
    pub end: DateTime<Utc>,
    pub rule: AlertRule,
    /// Labels covered by this batch, sorted.
    pub labels: Vec<Label>,
    /// Snapshot of the per-expression evaluation results.
    pub results: ExpressionResults,
    /// Timestamp of the previous fire, if any.
    pub last_alert_at: Option<DateTime<Utc>>,
    /// For ALERTING, the newly created record id; for RESOLVED, the record
    /// id carried over from the previous state.
    pub record_id: Option<String>,
}

/// Invokes one named external channel per configured channel name.
/// Each invocation fails independently.
#[async_trait]
pub trait ChannelInvoker: Send + Sync {
    async fn notify(&self, channel: &str, message: &NotificationMessage) -> Result<()>;
}
