use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use vigil_common::types::Label;

use crate::{AlertState, StateError, StateStore};

/// Key: (rule_id, label)
type SeriesKey = (String, Label);

struct Counter {
    count: u64,
    deadline: Instant,
}

/// In-memory [`StateStore`] for tests and single-node deployments.
///
/// TTL bookkeeping uses `tokio::time::Instant`, so tests can drive expiry
/// deterministically under a paused runtime clock.
#[derive(Default)]
pub struct MemoryStateStore {
    counters: Mutex<HashMap<SeriesKey, Counter>>,
    silences: Mutex<HashMap<SeriesKey, Instant>>,
    states: Mutex<HashMap<String, AlertState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(rule_id: &str, label: &Label) -> SeriesKey {
        (rule_id.to_string(), label.clone())
    }
}

#[cfg(test)]
impl MemoryStateStore {
    pub(crate) async fn counter_entries(&self) -> usize {
        self.counters.lock().await.len()
    }

    pub(crate) async fn silence_entries(&self) -> usize {
        self.silences.lock().await.len()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn incr_successive_count(
        &self,
        rule_id: &str,
        label: &Label,
        ttl: Duration,
    ) -> Result<u64, StateError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        // Drop every expired counter, not just the one being touched, so the
        // map holds only series that re-matched within their TTL window.
        counters.retain(|_, counter| counter.deadline > now);
        let entry = counters
            .entry(Self::key(rule_id, label))
            .or_insert(Counter {
                count: 0,
                deadline: now + ttl,
            });
        entry.count += 1;
        entry.deadline = now + ttl;
        Ok(entry.count)
    }

    async fn try_enter_silence(
        &self,
        rule_id: &str,
        label: &Label,
        ttl: Duration,
    ) -> Result<bool, StateError> {
        let now = Instant::now();
        let mut silences = self.silences.lock().await;
        silences.retain(|_, deadline| *deadline > now);
        let key = Self::key(rule_id, label);
        if silences.contains_key(&key) {
            Ok(false)
        } else {
            silences.insert(key, now + ttl);
            Ok(true)
        }
    }

    async fn silence_remaining(
        &self,
        rule_id: &str,
        label: &Label,
    ) -> Result<Option<Duration>, StateError> {
        let now = Instant::now();
        let silences = self.silences.lock().await;
        Ok(silences
            .get(&Self::key(rule_id, label))
            .and_then(|deadline| deadline.checked_duration_since(now)))
    }

    async fn load_state(&self, rule_id: &str) -> Result<Option<AlertState>, StateError> {
        let states = self.states.lock().await;
        Ok(states.get(rule_id).cloned())
    }

    async fn save_state(&self, rule_id: &str, state: &AlertState) -> Result<(), StateError> {
        let mut states = self.states.lock().await;
        states.insert(rule_id.to_string(), state.clone());
        Ok(())
    }
}
