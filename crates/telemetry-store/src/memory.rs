//! In-memory sink used for dry runs and tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use probe_common::{ProbeError, Result};

use crate::records::TelemetryRecord;
use crate::sink::{TelemetrySink, WriteOutcome};

type FailurePredicate = Box<dyn Fn(&TelemetryRecord) -> bool + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    records: Vec<TelemetryRecord>,
    keys: HashSet<String>,
}

/// Keeps written records in memory, applying the same idempotence rule as the
/// database: records with a run id are deduplicated, others are always added.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
    fail_when: Option<FailurePredicate>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every record matching `predicate` with a database error.
    pub fn failing_when<F>(predicate: F) -> Self
    where
        F: Fn(&TelemetryRecord) -> bool + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(MemoryState::default()),
            fail_when: Some(Box::new(predicate)),
        }
    }

    /// Snapshot of everything written so far, in write order.
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.state
            .lock()
            .map(|state| state.records.clone())
            .unwrap_or_default()
    }

    /// Number of records written to a table.
    pub fn count(&self, table: &str) -> usize {
        self.state
            .lock()
            .map(|state| state.records.iter().filter(|r| r.table() == table).count())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn write(&self, record: &TelemetryRecord) -> Result<WriteOutcome> {
        if let Some(predicate) = &self.fail_when {
            if predicate(record) {
                return Err(ProbeError::Database(format!(
                    "Insert failed: rejected {}",
                    record.describe()
                )));
            }
        }

        let mut state = self
            .state
            .lock()
            .map_err(|e| ProbeError::Internal(format!("Memory sink poisoned: {}", e)))?;

        if let Some(key) = record.dedup_key() {
            if !state.keys.insert(key) {
                return Ok(WriteOutcome::Duplicate);
            }
        }
        state.records.push(record.clone());
        Ok(WriteOutcome::Inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::SummaryRecord;
    use crate::schema::SUMMARY_TABLE;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn summary(run_id: Option<Uuid>) -> TelemetryRecord {
        TelemetryRecord::Summary(SummaryRecord {
            timestamp: Utc::now(),
            run_id,
            total_tests: 1,
            duration_ns: 0,
            total_requests: 10,
            total_success: 10,
            total_limited: 0,
            total_errors: 0,
            auth_methods: json!({}),
            extension: json!({}),
        })
    }

    #[tokio::test]
    async fn test_dedup_with_run_id() {
        let sink = MemorySink::new();
        let record = summary(Some(Uuid::new_v4()));
        assert_eq!(sink.write(&record).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(sink.write(&record).await.unwrap(), WriteOutcome::Duplicate);
        assert_eq!(sink.count(SUMMARY_TABLE), 1);
    }

    #[tokio::test]
    async fn test_no_run_id_duplicates() {
        let sink = MemorySink::new();
        let record = summary(None);
        sink.write(&record).await.unwrap();
        sink.write(&record).await.unwrap();
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let sink = MemorySink::failing_when(|r| r.table() == SUMMARY_TABLE);
        let err = sink.write(&summary(None)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Database(_)));
        assert!(sink.is_empty());
    }
}
