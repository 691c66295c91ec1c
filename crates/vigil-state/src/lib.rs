//! Evaluation state shared across cycles.
//!
//! The [`StateStore`] is the only mutable resource shared between concurrent
//! rule evaluations: successive-match counters and silence flags with TTL
//! expiry, plus the persisted per-rule [`AlertState`] baseline read at the
//! start of every cycle.

pub mod memory;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use vigil_common::types::{AlertStatus, Label};

/// Errors raised by state-store operations. Debounce correctness depends on
/// the store, so these are fatal to the pipeline step that needed them.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The backing store rejected or failed the operation.
    #[error("state store backend error: {0}")]
    Backend(String),

    /// A persisted state payload could not be decoded.
    #[error("corrupt persisted state for rule '{rule_id}': {reason}")]
    Corrupt { rule_id: String, reason: String },
}

/// Per-series persisted state: the last committed status plus the
/// successive-match count observed when it was committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesState {
    pub status: AlertStatus,
    pub successive_count: u64,
}

/// Persisted state for one rule, created on the first successful evaluation
/// and mutated at the end of every cycle. Stale labels persist at
/// RESOLVED/READY until pruned by an external collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertState {
    /// Status per label, serialized as an entry list since labels are
    /// structured map keys.
    #[serde(with = "series_map")]
    pub series: HashMap<Label, SeriesState>,
    /// Timestamp of the most recent fire notification.
    pub last_alert_at: Option<DateTime<Utc>>,
    /// Audit record id of the most recent ALERTING event, needed to close
    /// out a RESOLVED notification.
    pub last_record_id: Option<String>,
}

impl AlertState {
    /// Status a label held at the end of the previous cycle, or the implicit
    /// READY for a label never seen before.
    pub fn status_of(&self, label: &Label) -> AlertStatus {
        self.series
            .get(label)
            .map(|s| s.status)
            .unwrap_or(AlertStatus::Ready)
    }

    pub fn set_status(&mut self, label: Label, status: AlertStatus, successive_count: u64) {
        self.series.insert(
            label,
            SeriesState {
                status,
                successive_count,
            },
        );
    }
}

mod series_map {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(map: &HashMap<Label, SeriesState>, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let entries: Vec<(&Label, &SeriesState)> = map.iter().collect();
        entries.serialize(ser)
    }

    pub fn deserialize<'de, D>(de: D) -> Result<HashMap<Label, SeriesState>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries: Vec<(Label, SeriesState)> = Vec::deserialize(de)?;
        Ok(entries.into_iter().collect())
    }
}

/// Shared, injectable key-value store backing the evaluation pipeline.
///
/// Implementations must make `incr_successive_count` and `try_enter_silence`
/// atomic under concurrent access from different rules and from concurrent
/// re-entrant evaluation of the same rule.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Atomically increments the successive-match counter for
    /// `(rule_id, label)` and returns the new count. The TTL is refreshed on
    /// every call, not just on creation; an expired counter restarts at 1.
    async fn incr_successive_count(
        &self,
        rule_id: &str,
        label: &Label,
        ttl: Duration,
    ) -> Result<u64, StateError>;

    /// Set-if-absent with TTL. Returns `true` if no active silence existed
    /// and one was armed, `false` if a silence is already active.
    async fn try_enter_silence(
        &self,
        rule_id: &str,
        label: &Label,
        ttl: Duration,
    ) -> Result<bool, StateError>;

    /// Remaining time of an active silence, or `None` if no silence is
    /// active for `(rule_id, label)`.
    async fn silence_remaining(
        &self,
        rule_id: &str,
        label: &Label,
    ) -> Result<Option<Duration>, StateError>;

    /// Loads the previous cycle's state, or `None` for a brand-new rule.
    async fn load_state(&self, rule_id: &str) -> Result<Option<AlertState>, StateError>;

    /// Persists the state produced by the cycle that just finished.
    async fn save_state(&self, rule_id: &str, state: &AlertState) -> Result<(), StateError>;
}
