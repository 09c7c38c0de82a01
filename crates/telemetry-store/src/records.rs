//! Storage projection of run summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::schema::{RESULTS_TABLE, SUMMARY_TABLE, THROTTLE_EVENTS_TABLE};

/// One row of `test_summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: Option<Uuid>,
    pub total_tests: i64,
    pub duration_ns: i64,
    pub total_requests: i64,
    pub total_success: i64,
    pub total_limited: i64,
    pub total_errors: i64,
    pub auth_methods: Value,
    pub extension: Value,
}

/// One row of `test_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: Option<Uuid>,
    pub test_group: String,
    pub api_key: String,
    pub method: String,
    pub requests_sent: i64,
    pub success: i64,
    pub rate_limited: i64,
    pub errors: i64,
    pub avg_latency_ms: f64,
    pub auth_scheme: String,
    pub detected_group: String,
    pub burst_hits: i64,
    pub minute_hits: i64,
    pub effective_limit: i64,
    pub observed_bursts: i64,
    pub success_rate: f64,
    /// The group exactly as it appeared in the export document
    pub raw_data: Value,
    pub extension: Value,
}

/// One row of `throttle_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleEventRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: Option<Uuid>,
    pub event_index: i32,
    pub test_group: String,
    pub method: String,
    pub remaining_requests: i64,
    pub reset_in_seconds: i64,
    pub extension: Value,
}

/// A normalized record ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Summary(SummaryRecord),
    Result(ResultRecord),
    ThrottleEvent(ThrottleEventRecord),
}

impl TelemetryRecord {
    /// Table this record is written to.
    pub fn table(&self) -> &'static str {
        match self {
            TelemetryRecord::Summary(_) => SUMMARY_TABLE,
            TelemetryRecord::Result(_) => RESULTS_TABLE,
            TelemetryRecord::ThrottleEvent(_) => THROTTLE_EVENTS_TABLE,
        }
    }

    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            TelemetryRecord::Summary(r) => r.run_id,
            TelemetryRecord::Result(r) => r.run_id,
            TelemetryRecord::ThrottleEvent(r) => r.run_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TelemetryRecord::Summary(r) => r.timestamp,
            TelemetryRecord::Result(r) => r.timestamp,
            TelemetryRecord::ThrottleEvent(r) => r.timestamp,
        }
    }

    /// Key matching the table's unique index, `None` without a run id.
    pub fn dedup_key(&self) -> Option<String> {
        let run_id = self.run_id()?;
        let ts = self.timestamp().timestamp_micros();
        Some(match self {
            TelemetryRecord::Summary(_) => format!("{}|{}|{}", SUMMARY_TABLE, run_id, ts),
            TelemetryRecord::Result(r) => format!(
                "{}|{}|{}|{}|{}|{}",
                RESULTS_TABLE, run_id, r.test_group, r.method, r.auth_scheme, ts
            ),
            TelemetryRecord::ThrottleEvent(r) => format!(
                "{}|{}|{}|{}|{}",
                THROTTLE_EVENTS_TABLE, run_id, r.test_group, r.event_index, ts
            ),
        })
    }

    /// Short description for log lines.
    pub fn describe(&self) -> String {
        match self {
            TelemetryRecord::Summary(_) => SUMMARY_TABLE.to_string(),
            TelemetryRecord::Result(r) => format!("{}[{}]", RESULTS_TABLE, r.test_group),
            TelemetryRecord::ThrottleEvent(r) => {
                format!("{}[{}#{}]", THROTTLE_EVENTS_TABLE, r.test_group, r.event_index)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(run_id: Option<Uuid>, index: i32) -> TelemetryRecord {
        TelemetryRecord::ThrottleEvent(ThrottleEventRecord {
            timestamp: Utc::now(),
            run_id,
            event_index: index,
            test_group: "basic".into(),
            method: "GET".into(),
            remaining_requests: 0,
            reset_in_seconds: 30,
            extension: json!({}),
        })
    }

    #[test]
    fn test_dedup_key_requires_run_id() {
        assert!(event(None, 0).dedup_key().is_none());

        let run = Uuid::new_v4();
        let a = event(Some(run), 0);
        let b = event(Some(run), 1);
        assert_ne!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key(), a.clone().dedup_key());
    }

    #[test]
    fn test_table_and_describe() {
        let record = event(None, 3);
        assert_eq!(record.table(), THROTTLE_EVENTS_TABLE);
        assert_eq!(record.describe(), "throttle_events[basic#3]");
    }
}
