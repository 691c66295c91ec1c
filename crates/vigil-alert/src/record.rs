use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snowflake::SnowflakeIdBucket;
use tokio::sync::Mutex;

/// Notification-processing status: not yet processed. Acknowledgement flows
/// live in the sink backing store, outside this crate.
pub const RECORD_STATUS_UNCHECKED: u8 = 0;

static RECORD_IDS: std::sync::Mutex<Option<SnowflakeIdBucket>> = std::sync::Mutex::new(None);

/// Mints the opaque unique token assigned to a new audit record.
pub(crate) fn next_record_id() -> String {
    let mut bucket = RECORD_IDS.lock().unwrap();
    bucket
        .get_or_insert_with(|| SnowflakeIdBucket::new(1, 1))
        .get_id()
        .to_string()
}

/// Durable audit row, one per fired alert occurrence.
///
/// Created only on transition into ALERTING, before any channel is invoked;
/// read back on RESOLVED to link the closing notification to its opening
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Opaque unique token.
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub app: String,
    pub created_at: DateTime<Utc>,
    /// JSON snapshot of the evaluation window and the condition that fired.
    pub payload: serde_json::Value,
    /// Notification-processing status code, starts unchecked.
    pub status: u8,
}

/// Sink persisting audit records. A failure here aborts the entire fire
/// notification for the cycle: the core never pages without a corresponding
/// record.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn add_record(&self, record: &AlertRecord) -> Result<()>;
}

/// In-memory [`RecordSink`] for tests and embedded use.
#[derive(Default)]
pub struct MemoryRecordSink {
    records: Mutex<Vec<AlertRecord>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<AlertRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn add_record(&self, record: &AlertRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}
