use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::expr::BoolExpr;

/// An ordered set of dimension key/value pairs identifying one time series
/// within a rule's output. Two labels are equal iff their key/value sets are
/// equal; rules with no grouping dimensions produce the empty label.
///
/// # Examples
///
/// ```
/// use vigil_common::types::Label;
///
/// let a = Label::from_pairs([("host", "a"), ("disk", "sda")]);
/// let b = Label::from_pairs([("disk", "sda"), ("host", "a")]);
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "disk=sda, host=a");
/// assert!(Label::empty().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(Vec<(String, String)>);

impl Label {
    pub fn empty() -> Self {
        Label(Vec::new())
    }

    /// Builds a label from key/value pairs. Pairs are sorted by key so that
    /// insertion order never affects equality or hashing.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        pairs.sort();
        pairs.dedup_by(|a, b| a.0 == b.0);
        Label(pairs)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "{{}}");
        }
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

/// Per-series alert status.
///
/// `READY` is the implicit state for a label never seen before. Transitions
/// are constrained by [`AlertStatus::can_transit_to`]; illegal transitions
/// are rejected by the notification step and the series keeps its previous
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Ready,
    Pending,
    Alerting,
    Suppressing,
    Resolved,
}

impl AlertStatus {
    /// Legality lookup for the per-series state machine. Never panics and
    /// never throws; callers revert to the previous status on `false`.
    pub fn can_transit_to(self, to: AlertStatus) -> bool {
        use AlertStatus::*;
        matches!(
            (self, to),
            (Ready | Resolved, Pending)
                | (Pending, Pending)
                | (Pending | Ready, Alerting)
                | (Alerting, Suppressing)
                | (Suppressing, Suppressing)
                // A suppressed series whose silence window has lapsed is
                // allowed to alert (and page) again.
                | (Suppressing, Alerting)
                | (Pending | Alerting | Suppressing, Resolved)
                | (Resolved, Resolved)
        )
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Ready => write!(f, "READY"),
            AlertStatus::Pending => write!(f, "PENDING"),
            AlertStatus::Alerting => write!(f, "ALERTING"),
            AlertStatus::Suppressing => write!(f, "SUPPRESSING"),
            AlertStatus::Resolved => write!(f, "RESOLVED"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "READY" => Ok(AlertStatus::Ready),
            "PENDING" => Ok(AlertStatus::Pending),
            "ALERTING" => Ok(AlertStatus::Alerting),
            "SUPPRESSING" => Ok(AlertStatus::Suppressing),
            "RESOLVED" => Ok(AlertStatus::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// A user-defined alert rule, immutable for the duration of one evaluation
/// cycle. Loaded from configuration before the cycle begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    /// Application the rule belongs to.
    pub app: String,
    /// Combining boolean expression over named sub-expression results.
    pub alert_expression: BoolExpr,
    /// Evaluation interval in seconds.
    pub every_secs: u64,
    /// Required consecutive true evaluations before firing.
    pub for_times: u32,
    /// Ordered list of notification channel names.
    pub channels: Vec<String>,
    /// Silence duration in seconds after a fire notification.
    pub silence_secs: u64,
}

impl AlertRule {
    pub fn every(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.every_secs as i64)
    }

    /// Threshold the successive-match counter is compared against.
    /// Alias of `for_times`.
    pub fn expected_match_count(&self) -> u64 {
        self.for_times as u64
    }
}

/// Outcome of one sub-expression evaluation, supplied by the query engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpressionStatus {
    Matched,
    NotMatched,
}

/// One output series of a sub-expression evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationOutput {
    pub label: Label,
    /// Start of the window the sub-expression was evaluated over.
    pub start: DateTime<Utc>,
    pub matched: bool,
}

/// Result object for one named sub-expression, as produced by the external
/// query/metrics engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionResult {
    pub status: ExpressionStatus,
    pub outputs: Vec<EvaluationOutput>,
}

impl ExpressionResult {
    pub fn matched(&self) -> bool {
        self.status == ExpressionStatus::Matched
    }
}

/// Raw per-expression evaluation results for one cycle, keyed by
/// sub-expression name.
pub type ExpressionResults = HashMap<String, ExpressionResult>;
