use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use vigil_common::expr::BoolExpr;
use vigil_common::types::{
    AlertRule, AlertStatus, EvaluationOutput, ExpressionResult, ExpressionResults,
    ExpressionStatus, Label,
};
use vigil_state::memory::MemoryStateStore;
use vigil_state::{AlertState, StateStore};

use crate::message::{ChannelInvoker, NotificationMessage};
use crate::record::{AlertRecord, MemoryRecordSink, RecordSink};
use crate::{AlertError, Pipeline};

struct MockInvoker {
    calls: Mutex<Vec<(String, NotificationMessage)>>,
    failing: HashSet<String>,
}

impl MockInvoker {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: HashSet::new(),
        }
    }

    fn failing_on(channels: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: channels.iter().map(|c| c.to_string()).collect(),
        }
    }

    async fn calls(&self) -> Vec<(String, NotificationMessage)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ChannelInvoker for MockInvoker {
    async fn notify(&self, channel: &str, message: &NotificationMessage) -> Result<()> {
        self.calls
            .lock()
            .await
            .push((channel.to_string(), message.clone()));
        if self.failing.contains(channel) {
            anyhow::bail!("channel '{channel}' unreachable");
        }
        Ok(())
    }
}

struct FailingSink;

#[async_trait]
impl RecordSink for FailingSink {
    async fn add_record(&self, _record: &AlertRecord) -> Result<()> {
        anyhow::bail!("record store unavailable")
    }
}

fn rule(for_times: u32, every_secs: u64, silence_secs: u64) -> AlertRule {
    AlertRule {
        id: "rule-1".to_string(),
        name: "high cpu".to_string(),
        app: "web".to_string(),
        alert_expression: BoolExpr::reference("cpu"),
        every_secs,
        for_times,
        channels: vec!["chan-1".to_string()],
        silence_secs,
    }
}

fn label(host: &str) -> Label {
    Label::from_pairs([("host", host)])
}

fn matched(labels: &[Label], start: DateTime<Utc>) -> ExpressionResults {
    let outputs = labels
        .iter()
        .map(|l| EvaluationOutput {
            label: l.clone(),
            start,
            matched: true,
        })
        .collect();
    [(
        "cpu".to_string(),
        ExpressionResult {
            status: ExpressionStatus::Matched,
            outputs,
        },
    )]
    .into_iter()
    .collect()
}

fn not_matched() -> ExpressionResults {
    [(
        "cpu".to_string(),
        ExpressionResult {
            status: ExpressionStatus::NotMatched,
            outputs: Vec::new(),
        },
    )]
    .into_iter()
    .collect()
}

struct Harness {
    pipeline: Pipeline,
    store: MemoryStateStore,
    sink: Arc<MemoryRecordSink>,
    invoker: Arc<MockInvoker>,
}

impl Harness {
    fn new() -> Self {
        Self::with_invoker(MockInvoker::new())
    }

    fn with_invoker(invoker: MockInvoker) -> Self {
        let sink = Arc::new(MemoryRecordSink::new());
        let invoker = Arc::new(invoker);
        Self {
            pipeline: Pipeline::new(sink.clone(), invoker.clone()),
            store: MemoryStateStore::new(),
            sink,
            invoker,
        }
    }
}

// Scenario: for_times=3, every=60s, matched on cycles 1,2,3.
// Status sequence READY -> PENDING -> PENDING -> ALERTING, one fire on cycle 3.
#[tokio::test(start_paused = true)]
async fn debounce_fires_after_n_consecutive_matches() {
    let h = Harness::new();
    let r = rule(3, 60, 300);
    let l = label("a");

    for expected in [AlertStatus::Pending, AlertStatus::Pending, AlertStatus::Alerting] {
        let now = Utc::now();
        let ctx = h
            .pipeline
            .run_at(r.clone(), matched(&[l.clone()], now - ChronoDuration::seconds(60)), &h.store, now)
            .await
            .unwrap();
        assert_eq!(ctx.series_status[&l], expected);
        tokio::time::advance(Duration::from_secs(60)).await;
    }

    let calls = h.invoker.calls().await;
    assert_eq!(calls.len(), 1, "fire notification emitted only on cycle 3");
    let (channel, message) = &calls[0];
    assert_eq!(channel, "chan-1");
    assert_eq!(message.status, AlertStatus::Alerting);
    assert_eq!(message.labels, vec![l.clone()]);

    let records = h.sink.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(message.record_id.as_deref(), Some(records[0].id.as_str()));
}

// Scenario: matched on cycles 1,2, not matched on cycle 3. The counter
// expires via TTL, the series resolves without ever firing, and a fresh
// streak starts from 1.
#[tokio::test(start_paused = true)]
async fn false_cycle_resets_debounce_and_resolves() {
    let h = Harness::new();
    let r = rule(3, 60, 300);
    let l = label("a");

    for _ in 0..2 {
        let now = Utc::now();
        let ctx = h
            .pipeline
            .run_at(r.clone(), matched(&[l.clone()], now), &h.store, now)
            .await
            .unwrap();
        assert_eq!(ctx.series_status[&l], AlertStatus::Pending);
        tokio::time::advance(Duration::from_secs(60)).await;
    }

    let ctx = h
        .pipeline
        .run_at(r.clone(), not_matched(), &h.store, Utc::now())
        .await
        .unwrap();
    assert_eq!(ctx.series_status[&l], AlertStatus::Resolved);
    tokio::time::advance(Duration::from_secs(60)).await;

    // PENDING -> RESOLVED carries no notification and no record was created.
    assert!(h.invoker.calls().await.is_empty());
    assert!(h.sink.records().await.is_empty());

    // Counter deadline (cycle 2 + 90s) has passed: the streak restarts at 1.
    let now = Utc::now();
    let ctx = h
        .pipeline
        .run_at(r.clone(), matched(&[l.clone()], now), &h.store, now)
        .await
        .unwrap();
    assert_eq!(ctx.series_status[&l], AlertStatus::Pending);
    assert_eq!(ctx.successive_counts[&l], 1);
}

// Scenario: silence=300s. A second ALERTING evaluation inside the window is
// suppressed; the eventual resolve reuses the fire's record id.
#[tokio::test(start_paused = true)]
async fn silence_suppresses_repeat_and_resolve_links_to_fire_record() {
    let h = Harness::new();
    let r = rule(1, 60, 300);
    let l = label("a");

    let now = Utc::now();
    let ctx = h
        .pipeline
        .run_at(r.clone(), matched(&[l.clone()], now), &h.store, now)
        .await
        .unwrap();
    assert_eq!(ctx.series_status[&l], AlertStatus::Alerting);
    assert_eq!(h.invoker.calls().await.len(), 1);

    tokio::time::advance(Duration::from_secs(60)).await;

    // One minute later the condition still holds: suppressed, no second fire.
    let now = Utc::now();
    let ctx = h
        .pipeline
        .run_at(r.clone(), matched(&[l.clone()], now), &h.store, now)
        .await
        .unwrap();
    assert_eq!(ctx.series_status[&l], AlertStatus::Suppressing);
    assert_eq!(h.invoker.calls().await.len(), 1);

    tokio::time::advance(Duration::from_secs(400)).await;

    // Condition clears after silence expiry: one resolve, linked to the
    // record opened by the fire.
    let ctx = h
        .pipeline
        .run_at(r.clone(), not_matched(), &h.store, Utc::now())
        .await
        .unwrap();
    assert_eq!(ctx.series_status[&l], AlertStatus::Resolved);

    let calls = h.invoker.calls().await;
    assert_eq!(calls.len(), 2);
    let (_, resolve) = &calls[1];
    assert_eq!(resolve.status, AlertStatus::Resolved);
    let records = h.sink.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(resolve.record_id.as_deref(), Some(records[0].id.as_str()));
}

// A continuously true condition pages again once the silence window lapses,
// with a fresh audit record.
#[tokio::test(start_paused = true)]
async fn refires_after_silence_expiry() {
    let h = Harness::new();
    let r = rule(1, 60, 300);
    let l = label("a");

    let now = Utc::now();
    h.pipeline
        .run_at(r.clone(), matched(&[l.clone()], now), &h.store, now)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(60)).await;

    let now = Utc::now();
    let ctx = h
        .pipeline
        .run_at(r.clone(), matched(&[l.clone()], now), &h.store, now)
        .await
        .unwrap();
    assert_eq!(ctx.series_status[&l], AlertStatus::Suppressing);

    tokio::time::advance(Duration::from_secs(400)).await;

    let now = Utc::now();
    let ctx = h
        .pipeline
        .run_at(r.clone(), matched(&[l.clone()], now), &h.store, now)
        .await
        .unwrap();
    assert_eq!(ctx.series_status[&l], AlertStatus::Alerting);

    let calls = h.invoker.calls().await;
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|(_, m)| m.status == AlertStatus::Alerting));

    let records = h.sink.records().await;
    assert_eq!(records.len(), 2);
    assert_ne!(records[0].id, records[1].id);
}

// An illegal transition leaves the series at its previous status and sends
// nothing.
#[tokio::test]
async fn illegal_transition_keeps_previous_status() {
    let h = Harness::new();
    let r = rule(3, 60, 300);
    let l = label("a");

    // Stale series at READY; a false evaluation proposes RESOLVED, which is
    // not reachable from READY.
    let mut seeded = AlertState::default();
    seeded.set_status(l.clone(), AlertStatus::Ready, 0);
    h.store.save_state(&r.id, &seeded).await.unwrap();

    let ctx = h
        .pipeline
        .run_at(r.clone(), not_matched(), &h.store, Utc::now())
        .await
        .unwrap();
    assert_eq!(ctx.series_status[&l], AlertStatus::Ready);
    assert!(h.invoker.calls().await.is_empty());

    let persisted = h.store.load_state(&r.id).await.unwrap().unwrap();
    assert_eq!(persisted.status_of(&l), AlertStatus::Ready);
}

// Channel 2 of 3 fails; 1 and 3 still receive the batch and the cycle
// completes without error.
#[tokio::test]
async fn channel_failure_does_not_stop_other_channels() {
    let h = Harness::with_invoker(MockInvoker::failing_on(&["two"]));
    let mut r = rule(1, 60, 300);
    r.channels = vec!["one".to_string(), "two".to_string(), "three".to_string()];
    let l = label("a");

    let now = Utc::now();
    h.pipeline
        .run_at(r, matched(&[l], now), &h.store, now)
        .await
        .expect("channel failure must not fail the cycle");

    let calls = h.invoker.calls().await;
    let channels: Vec<&str> = calls.iter().map(|(c, _)| c.as_str()).collect();
    assert_eq!(channels, vec!["one", "two", "three"]);
}

// A record-sink failure aborts the whole fire batch: no channel is invoked
// and no record id is committed, but the cycle itself succeeds.
#[tokio::test]
async fn record_sink_failure_skips_fire_notification() {
    let invoker = Arc::new(MockInvoker::new());
    let pipeline = Pipeline::new(Arc::new(FailingSink), invoker.clone());
    let store = MemoryStateStore::new();
    let r = rule(1, 60, 300);
    let l = label("a");

    let now = Utc::now();
    let ctx = pipeline
        .run_at(r.clone(), matched(&[l.clone()], now), &store, now)
        .await
        .unwrap();

    assert_eq!(ctx.series_status[&l], AlertStatus::Alerting);
    assert!(invoker.calls().await.is_empty());

    let persisted = store.load_state(&r.id).await.unwrap().unwrap();
    assert!(persisted.last_record_id.is_none());
}

// An expression error is fatal to the cycle: nothing is notified and no
// state is persisted.
#[tokio::test]
async fn expression_error_aborts_cycle() {
    let h = Harness::new();
    let mut r = rule(1, 60, 300);
    r.alert_expression = BoolExpr::reference("no-such-expression");

    let err = h
        .pipeline
        .run_at(r.clone(), not_matched(), &h.store, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AlertError::Expression(_)));
    assert!(h.invoker.calls().await.is_empty());
    assert!(h.store.load_state(&r.id).await.unwrap().is_none());
}

// Fire-record window: start reaches back (for_times - 1) * every from the
// earliest matched output start; end is that start plus one interval, capped
// at the cycle end.
#[tokio::test(start_paused = true)]
async fn fire_record_covers_the_debounce_window() {
    let h = Harness::new();
    let r = rule(3, 60, 300);
    let l = label("a");

    let mut now = Utc::now();
    for _ in 0..3 {
        let start = now - ChronoDuration::seconds(60);
        h.pipeline
            .run_at(r.clone(), matched(&[l.clone()], start), &h.store, now)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        now += ChronoDuration::seconds(60);
    }

    let records = h.sink.records().await;
    assert_eq!(records.len(), 1);
    let payload = &records[0].payload;

    let fire_now = now - ChronoDuration::seconds(60);
    let base = fire_now - ChronoDuration::seconds(60);
    let expected_start = base - ChronoDuration::seconds(120);
    assert_eq!(payload["window_start"], serde_json::json!(expected_start));
    assert_eq!(payload["window_end"], serde_json::json!(fire_now));
}

// Labels reaching ALERTING in the same cycle are batched into one message.
#[tokio::test]
async fn fire_batches_all_alerting_labels() {
    let h = Harness::new();
    let r = rule(1, 60, 300);
    let a = label("a");
    let b = label("b");

    let now = Utc::now();
    h.pipeline
        .run_at(r, matched(&[a.clone(), b.clone()], now), &h.store, now)
        .await
        .unwrap();

    let calls = h.invoker.calls().await;
    assert_eq!(calls.len(), 1, "one batch per kind per rule, not per label");
    assert_eq!(calls[0].1.labels, vec![a, b]);
    assert_eq!(h.sink.records().await.len(), 1);
}

// A rule without grouping dimensions tracks exactly one series: the empty
// label.
#[tokio::test]
async fn ungrouped_rule_uses_the_empty_label() {
    let h = Harness::new();
    let r = rule(1, 60, 300);
    let l = Label::empty();

    let now = Utc::now();
    let ctx = h
        .pipeline
        .run_at(r, matched(&[l.clone()], now), &h.store, now)
        .await
        .unwrap();
    assert_eq!(ctx.series_status[&l], AlertStatus::Alerting);
    assert_eq!(h.invoker.calls().await.len(), 1);
}

// The per-cycle log narrates every decision for the audit trail.
#[tokio::test]
async fn context_log_narrates_decisions() {
    let h = Harness::new();
    let r = rule(1, 60, 300);
    let l = label("a");

    let now = Utc::now();
    let ctx = h
        .pipeline
        .run_at(r, matched(&[l], now), &h.store, now)
        .await
        .unwrap();

    let log = ctx.log_lines().join("\n");
    assert!(log.contains("evaluated as true"));
    assert!(log.contains("successive match 1/1"));
    assert!(log.contains("silence armed"));
    assert!(log.contains("READY -> ALERTING"));
}

#[test]
fn record_ids_are_unique() {
    let mut seen = HashSet::new();
    for _ in 0..1000 {
        let id = crate::record::next_record_id();
        assert!(!id.is_empty());
        assert!(seen.insert(id), "duplicate record id minted");
    }
}
