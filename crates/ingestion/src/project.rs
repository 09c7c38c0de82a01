//! Projection of export documents onto telemetry records.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

use probe_common::export::{ExportAnalysis, ExportDocument, ExportGroup, ExportSummary};
use telemetry_store::{ResultRecord, SummaryRecord, TelemetryRecord, ThrottleEventRecord};

use crate::error::Result;

/// Method label used when a group did not record one.
const COMBINED_METHOD: &str = "Combined";

/// Run id and timestamp applied to every record of one document.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionContext {
    pub run_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl ProjectionContext {
    /// Resolve from overrides, falling back to the document itself.
    ///
    /// Without an export time the current time is used, which means the
    /// document will not deduplicate on re-ingestion.
    pub fn resolve(
        doc: &ExportDocument,
        run_id: Option<Uuid>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            run_id: run_id.or(doc.run_id),
            timestamp: timestamp.or(doc.export_time).unwrap_or_else(Utc::now),
        }
    }
}

/// Map one document to its summary, result and throttle-event records.
pub fn project_document(doc: &ExportDocument, ctx: ProjectionContext) -> Result<Vec<TelemetryRecord>> {
    let mut records = Vec::with_capacity(1 + doc.summary.by_group.len());

    records.push(TelemetryRecord::Summary(summary_record(doc, ctx)?));

    for (name, group) in &doc.summary.by_group {
        let analysis = doc.summary.analysis_for(name);
        records.push(TelemetryRecord::Result(result_record(name, group, analysis, ctx)?));
    }

    records.extend(
        throttle_records(&doc.summary, ctx)
            .into_iter()
            .map(TelemetryRecord::ThrottleEvent),
    );

    Ok(records)
}

fn summary_record(doc: &ExportDocument, ctx: ProjectionContext) -> Result<SummaryRecord> {
    let summary = &doc.summary;

    let mut extension = summary.extra.clone();
    if !doc.version.is_empty() {
        extension.insert("version".to_string(), Value::String(doc.version.clone()));
    }
    if !doc.extra.is_empty() {
        extension.insert("document".to_string(), Value::Object(doc.extra.clone()));
    }

    Ok(SummaryRecord {
        timestamp: ctx.timestamp,
        run_id: ctx.run_id,
        total_tests: to_i64(summary.total_tests),
        duration_ns: to_i64(summary.duration),
        total_requests: to_i64(summary.total_requests),
        total_success: to_i64(summary.total_success),
        total_limited: to_i64(summary.total_limited),
        total_errors: to_i64(summary.total_errors),
        auth_methods: serde_json::to_value(&summary.auth_methods)?,
        extension: Value::Object(extension),
    })
}

fn result_record(
    name: &str,
    group: &ExportGroup,
    analysis: Option<&ExportAnalysis>,
    ctx: ProjectionContext,
) -> Result<ResultRecord> {
    let raw_data = serde_json::to_value(group)?;

    let mut extension = Map::new();
    if !group.error_details.is_empty() {
        extension.insert(
            "error_details".to_string(),
            serde_json::to_value(&group.error_details)?,
        );
    }
    if !group.error_examples.is_empty() {
        extension.insert(
            "error_examples".to_string(),
            serde_json::to_value(&group.error_examples)?,
        );
    }
    if let Some(detected) = &group.detected_auth_method {
        extension.insert(
            "detected_auth_method".to_string(),
            Value::String(detected.clone()),
        );
    }

    let method = if group.method.is_empty() {
        COMBINED_METHOD.to_string()
    } else {
        group.method.clone()
    };

    Ok(ResultRecord {
        timestamp: ctx.timestamp,
        run_id: ctx.run_id,
        test_group: name.to_string(),
        api_key: group.api_key.clone(),
        method,
        requests_sent: to_i64(group.requests_sent),
        success: to_i64(group.success),
        rate_limited: to_i64(group.rate_limited),
        errors: to_i64(group.errors),
        avg_latency_ms: group.avg_latency_ms,
        auth_scheme: group.auth_method.clone(),
        detected_group: group.rate_limit_group.clone(),
        burst_hits: to_i64(group.burst_hits),
        minute_hits: to_i64(group.minute_hits),
        effective_limit: analysis.map(|a| a.effective_limit).unwrap_or(0),
        observed_bursts: analysis.map(|a| to_i64(a.observed_bursts)).unwrap_or(0),
        success_rate: analysis.map(|a| a.success_rate).unwrap_or(0.0),
        raw_data,
        extension: Value::Object(extension),
    })
}

fn throttle_records(summary: &ExportSummary, ctx: ProjectionContext) -> Vec<ThrottleEventRecord> {
    let names: BTreeSet<&str> = summary
        .rate_limit_analysis
        .keys()
        .chain(summary.by_group.keys())
        .map(String::as_str)
        .collect();

    let mut records = Vec::new();
    for name in names {
        let Some(analysis) = summary.analysis_for(name) else {
            continue;
        };

        for (index, event) in analysis.throttle_events.iter().enumerate() {
            let mut extension = event.extra.clone();
            if let Some(api_key) = &event.api_key {
                extension.insert("api_key".to_string(), Value::String(api_key.clone()));
            }
            if let Some(window) = &event.window {
                extension.insert("window".to_string(), Value::String(window.clone()));
            }

            let test_group = if event.group.is_empty() {
                name.to_string()
            } else {
                event.group.clone()
            };

            records.push(ThrottleEventRecord {
                timestamp: event.timestamp.unwrap_or(ctx.timestamp),
                run_id: ctx.run_id,
                event_index: i32::try_from(index).unwrap_or(i32::MAX),
                test_group,
                method: event.method.clone(),
                remaining_requests: event.remaining_reqs,
                reset_in_seconds: to_i64(event.reset_in_seconds()),
                extension: Value::Object(extension),
            });
        }
    }
    records
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
