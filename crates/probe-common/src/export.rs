//! JSON export document consumed by ingestion.
//!
//! Field names follow the export layout older tooling already produces, so
//! files written by either side can be ingested. Every field is optional on
//! input; unrecognised fields are kept in `extra`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use crate::error::{ProbeError, Result};
use crate::summary::{GroupSummary, RunSummary, ThrottleEvent};

pub const EXPORT_VERSION: &str = "1.0.0";

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// One exported throttle event. `ResetIn` is a duration in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportThrottleEvent {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub remaining_reqs: i64,
    #[serde(default)]
    pub reset_in: u64,
    #[serde(rename = "APIKey", default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExportThrottleEvent {
    pub fn reset_in_seconds(&self) -> u64 {
        self.reset_in / NANOS_PER_SECOND
    }
}

impl From<&ThrottleEvent> for ExportThrottleEvent {
    fn from(event: &ThrottleEvent) -> Self {
        Self {
            timestamp: Some(event.timestamp),
            group: event.group.clone(),
            method: event.method.to_string(),
            remaining_reqs: i64::try_from(event.remaining).unwrap_or(i64::MAX),
            reset_in: event.reset_seconds.saturating_mul(NANOS_PER_SECOND),
            api_key: Some(event.access_key.clone()),
            window: Some(event.window.to_string()),
            extra: Map::new(),
        }
    }
}

/// Throttle analysis for one group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportAnalysis {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub effective_limit: i64,
    #[serde(default)]
    pub observed_bursts: u64,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub throttle_events: Vec<ExportThrottleEvent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A sample error as exported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportErrorExample {
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub method: String,
}

/// Per-group result as exported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportGroup {
    #[serde(rename = "APIKey", default)]
    pub api_key: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub method: String,
    /// Auth scheme the requests were sent with
    #[serde(default)]
    pub auth_method: String,
    /// Auth method the gateway reported back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_auth_method: Option<String>,
    #[serde(default)]
    pub requests_sent: u64,
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub rate_limited: u64,
    #[serde(default)]
    pub errors: u64,
    #[serde(default)]
    pub avg_latency_ms: f64,
    #[serde(default)]
    pub rate_limit_group: String,
    #[serde(default)]
    pub burst_hits: u64,
    #[serde(default)]
    pub minute_hits: u64,
    #[serde(default)]
    pub error_details: BTreeMap<String, u64>,
    #[serde(default)]
    pub error_examples: Vec<ExportErrorExample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_analysis: Option<ExportAnalysis>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExportGroup {
    fn from_group(group: &GroupSummary, run: &RunSummary) -> Self {
        let mut error_details = BTreeMap::new();
        for (status, count) in &group.status_errors {
            error_details.insert(format!("HTTP {status}"), *count);
        }
        for (kind, count) in &group.transport_errors {
            error_details.insert(kind.to_string(), *count);
        }

        let events: Vec<ExportThrottleEvent> = run
            .events_for(&group.key.group)
            .map(ExportThrottleEvent::from)
            .collect();

        Self {
            api_key: group.api_key_list(),
            group: group.key.group.clone(),
            method: group.key.method.to_string(),
            auth_method: group.key.scheme.to_string(),
            detected_auth_method: group.observed_auth_method.clone(),
            requests_sent: group.total(),
            success: group.counts.success,
            rate_limited: group.counts.throttled,
            errors: group.counts.errors,
            avg_latency_ms: group.avg_latency_ms(),
            rate_limit_group: group.detected_group.clone().unwrap_or_default(),
            burst_hits: group.burst_hits,
            minute_hits: group.minute_hits,
            error_details,
            error_examples: group
                .error_examples
                .iter()
                .map(|example| ExportErrorExample {
                    status_code: example.status.unwrap_or(0),
                    error: example.message.clone(),
                    timestamp: Some(example.timestamp),
                    method: example.method.to_string(),
                })
                .collect(),
            rate_limit_analysis: Some(ExportAnalysis {
                group: group.key.group.clone(),
                effective_limit: group.effective_limit() as i64,
                observed_bursts: group.counts.throttled,
                success_rate: group.counts.success_rate(),
                throttle_events: events,
                extra: Map::new(),
            }),
            extra: Map::new(),
        }
    }
}

/// Run-level summary as exported. `Duration` is in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportSummary {
    #[serde(default)]
    pub total_tests: u64,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub total_requests: u64,
    #[serde(default)]
    pub total_success: u64,
    #[serde(default)]
    pub total_limited: u64,
    #[serde(default)]
    pub total_errors: u64,
    #[serde(default)]
    pub auth_methods: BTreeMap<String, u64>,
    #[serde(default)]
    pub by_group: BTreeMap<String, ExportGroup>,
    #[serde(default)]
    pub rate_limit_analysis: BTreeMap<String, ExportAnalysis>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExportSummary {
    /// Analysis for a group, preferring the summary-level map.
    pub fn analysis_for(&self, group: &str) -> Option<&ExportAnalysis> {
        self.rate_limit_analysis.get(group).or_else(|| {
            self.by_group
                .get(group)
                .and_then(|g| g.rate_limit_analysis.as_ref())
        })
    }
}

/// Top-level export document for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    #[serde(default)]
    pub summary: ExportSummary,
    #[serde(default)]
    pub detailed_results: Vec<ExportGroup>,
    #[serde(default)]
    pub export_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExportDocument {
    pub fn from_run(run: &RunSummary) -> Self {
        let by_group: BTreeMap<String, ExportGroup> = run
            .groups
            .iter()
            .map(|(name, group)| (name.clone(), ExportGroup::from_group(group, run)))
            .collect();

        let rate_limit_analysis = by_group
            .iter()
            .filter_map(|(name, group)| {
                group
                    .rate_limit_analysis
                    .clone()
                    .map(|analysis| (name.clone(), analysis))
            })
            .collect();

        let detailed_results = by_group.values().cloned().collect();

        Self {
            summary: ExportSummary {
                total_tests: run.groups.len() as u64,
                duration: u64::try_from(run.duration.as_nanos()).unwrap_or(u64::MAX),
                total_requests: run.total(),
                total_success: run.totals.success,
                total_limited: run.totals.throttled,
                total_errors: run.totals.errors,
                auth_methods: run.auth_methods.clone(),
                by_group,
                rate_limit_analysis,
                extra: Map::new(),
            },
            detailed_results,
            export_time: Some(Utc::now()),
            version: EXPORT_VERSION.to_string(),
            run_id: Some(run.run_id),
            extra: Map::new(),
        }
    }
}

/// An export file: a single document or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportFile {
    Batch(Vec<ExportDocument>),
    Single(Box<ExportDocument>),
}

impl ExportFile {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ProbeError::ExportFormat(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn into_documents(self) -> Vec<ExportDocument> {
        match self {
            ExportFile::Batch(docs) => docs,
            ExportFile::Single(doc) => vec![*doc],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{AuthScheme, HttpMethod};
    use crate::summary::{GroupKey, ThrottleWindow};
    use std::time::Duration;

    fn run() -> RunSummary {
        let mut run = RunSummary::new("premium-test", Utc::now());
        run.duration = Duration::from_secs(5);
        let mut group = GroupSummary::new(GroupKey {
            group: "premium".into(),
            scheme: AuthScheme::HeaderV4,
            method: HttpMethod::Get,
        });
        group.counts.success = 8;
        group.counts.throttled = 2;
        group.api_keys.insert("AK1".into());
        run.totals = group.counts;
        run.groups.insert("premium".into(), group);
        run.throttle_events.push(ThrottleEvent {
            timestamp: Utc::now(),
            group: "premium".into(),
            method: HttpMethod::Get,
            access_key: "AK1".into(),
            remaining: 0,
            reset_seconds: 30,
            window: ThrottleWindow::Minute,
        });
        run
    }

    #[test]
    fn test_remaining_saturates_instead_of_wrapping() {
        let mut run = run();
        run.throttle_events[0].remaining = u64::MAX;
        let event = ExportThrottleEvent::from(&run.throttle_events[0]);
        assert_eq!(event.remaining_reqs, i64::MAX);

        run.throttle_events[0].remaining = 42;
        assert_eq!(ExportThrottleEvent::from(&run.throttle_events[0]).remaining_reqs, 42);
    }

    #[test]
    fn test_from_run_layout() {
        let doc = ExportDocument::from_run(&run());
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["summary"]["TotalRequests"], 10);
        assert_eq!(value["summary"]["Duration"], 5_000_000_000u64);
        assert_eq!(value["summary"]["ByGroup"]["premium"]["APIKey"], "AK1");
        assert_eq!(value["summary"]["ByGroup"]["premium"]["AuthMethod"], "header-v4");
        let analysis = &value["summary"]["RateLimitAnalysis"]["premium"];
        assert_eq!(analysis["ObservedBursts"], 2);
        assert_eq!(analysis["ThrottleEvents"][0]["ResetIn"], 30_000_000_000u64);
        assert_eq!(value["version"], EXPORT_VERSION);
    }

    #[test]
    fn test_legacy_document_with_missing_fields() {
        let json = r#"{
            "summary": {
                "TotalTests": 1,
                "ByGroup": {
                    "basic": {"APIKey": "AK2", "Method": "PUT", "RequestsSent": 4, "HeaderCaptures": []}
                },
                "HeaderAnalysis": {"UniqueAuthMethods": ["V4"]}
            },
            "export_time": "2025-01-08T10:00:00.123+05:30",
            "version": "1.0.0"
        }"#;
        let docs = ExportFile::from_json(json).unwrap().into_documents();
        assert_eq!(docs.len(), 1);

        let doc = &docs[0];
        assert!(doc.run_id.is_none());
        let basic = &doc.summary.by_group["basic"];
        assert_eq!(basic.requests_sent, 4);
        assert_eq!(basic.avg_latency_ms, 0.0);
        assert!(basic.rate_limit_analysis.is_none());
        assert!(basic.extra.contains_key("HeaderCaptures"));
        assert!(doc.summary.extra.contains_key("HeaderAnalysis"));
        assert!(doc.summary.analysis_for("basic").is_none());
    }

    #[test]
    fn test_batch_file() {
        let json = r#"[{"summary": {"TotalTests": 1}}, {"summary": {"TotalTests": 2}}]"#;
        let docs = ExportFile::from_json(json).unwrap().into_documents();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].summary.total_tests, 2);
    }

    #[test]
    fn test_invalid_json_is_export_format_error() {
        let err = ExportFile::from_json("{not json").unwrap_err();
        assert!(matches!(err, ProbeError::ExportFormat(_)));
    }
}
