//! Results reporting and formatting.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};

use probe_common::{AuthScheme, ExportDocument, Result, RunSummary};
use telemetry_store::{HourlyTrendRow, PerformanceRow, RateLimitRankRow};

use crate::aggregator::ComparisonRow;
use crate::engine::SingleProbe;

/// Formats run results for output.
pub struct RunReport;

impl RunReport {
    /// Format a run summary as console tables.
    pub fn format_table(summary: &RunSummary) -> String {
        let mut table = new_table();
        table.set_header(vec![format!("Rate Limit Test: {}", summary.label)]);

        table.add_row(vec![
            "Duration:".to_string(),
            format!("{:.1}s", summary.duration.as_secs_f64()),
        ]);
        table.add_row(vec!["Total Requests:".to_string(), summary.total().to_string()]);
        table.add_row(vec![
            "Success:".to_string(),
            format!(
                "{} ({:.1}%)",
                summary.totals.success,
                summary.totals.success_rate()
            ),
        ]);
        table.add_row(vec![
            "Throttled:".to_string(),
            format!(
                "{} ({:.1}%)",
                summary.totals.throttled,
                summary.totals.throttle_rate()
            ),
        ]);
        table.add_row(vec!["Errors:".to_string(), summary.totals.errors.to_string()]);
        if summary.unissued > 0 {
            table.add_row(vec!["Unissued:".to_string(), summary.unissued.to_string()]);
        }
        table.add_row(vec![
            "Throttle Events:".to_string(),
            summary.throttle_events.len().to_string(),
        ]);

        format!("{}\n{}", table, Self::format_groups(summary))
    }

    /// One row per group.
    pub fn format_groups(summary: &RunSummary) -> String {
        let mut table = new_table();
        table.set_header(vec![
            "Group",
            "Scheme",
            "Method",
            "Requests",
            "Success",
            "Throttled",
            "Errors",
            "Avg ms",
            "Burst/Minute",
            "Detected",
        ]);

        for group in summary.groups.values() {
            let detected = match &group.detected_group {
                Some(detected) if group.group_mismatch() => format!("{} (!)", detected),
                Some(detected) => detected.clone(),
                None => "-".to_string(),
            };
            table.add_row(vec![
                group.key.group.clone(),
                group.key.scheme.to_string(),
                group.key.method.to_string(),
                group.total().to_string(),
                group.counts.success.to_string(),
                group.counts.throttled.to_string(),
                group.counts.errors.to_string(),
                format!("{:.1}", group.avg_latency_ms()),
                format!("{}/{}", group.burst_hits, group.minute_hits),
                detected,
            ]);
        }

        table.to_string()
    }

    /// Groups of several runs side by side.
    pub fn format_comparison(rows: &[ComparisonRow]) -> String {
        let mut table = new_table();
        table.set_header(vec![
            "Run",
            "Expected",
            "Detected",
            "Requests",
            "Success %",
            "Throttled %",
            "Avg ms",
            "Limit/sec",
        ]);

        for row in rows {
            let detected = match (&row.detected_group, row.mismatch) {
                (Some(detected), true) => format!("{} (mismatch)", detected),
                (Some(detected), false) => detected.clone(),
                (None, _) => "-".to_string(),
            };
            table.add_row(vec![
                row.run.clone(),
                row.group.clone(),
                detected,
                row.requests.to_string(),
                format!("{:.1}", row.success_rate),
                format!("{:.1}", row.throttle_rate),
                format!("{:.1}", row.avg_latency_ms),
                limit(Some(row.effective_limit).filter(|l| *l > 0)),
            ]);
        }

        table.to_string()
    }

    /// Current quota as reported by a single probe.
    pub fn format_status(probe: &SingleProbe) -> String {
        let mut table = new_table();
        table.set_header(vec![format!(
            "Rate Limit Status: {}",
            probe.result.tenant.short_key()
        )]);

        table.add_row(vec!["Status:".to_string(), status(probe)]);
        let headers = probe.headers().cloned().unwrap_or_default();
        table.add_row(vec![
            "Group:".to_string(),
            headers.group.unwrap_or_else(|| "-".to_string()),
        ]);
        table.add_row(vec!["Limit/min:".to_string(), limit(headers.limit_per_minute)]);
        table.add_row(vec![
            "Current/min:".to_string(),
            limit(headers.current_per_minute),
        ]);
        table.add_row(vec![
            "Remaining/min:".to_string(),
            limit(headers.remaining_per_minute),
        ]);
        table.add_row(vec![
            "Burst limit/sec:".to_string(),
            limit(headers.limit_per_second),
        ]);

        table.to_string()
    }

    /// One row per auth scheme.
    pub fn format_auth_methods(probes: &[(AuthScheme, SingleProbe)]) -> String {
        let mut table = new_table();
        table.set_header(vec![
            "Scheme",
            "Status",
            "X-Auth-Method",
            "X-RateLimit-Group",
            "Limit-Per-Minute",
        ]);

        for (scheme, probe) in probes {
            let headers = probe.headers();
            table.add_row(vec![
                scheme.to_string(),
                status(probe),
                headers
                    .and_then(|h| h.auth_method.clone())
                    .unwrap_or_else(|| "-".to_string()),
                headers
                    .and_then(|h| h.group.clone())
                    .unwrap_or_else(|| "-".to_string()),
                limit(headers.and_then(|h| h.limit_per_minute)),
            ]);
        }

        table.to_string()
    }

    /// Format a run as an export document.
    pub fn format_json(summary: &RunSummary) -> Result<String> {
        Ok(serde_json::to_string_pretty(&ExportDocument::from_run(
            summary,
        ))?)
    }

    /// Several runs as a batch export.
    pub fn format_json_batch(summaries: &[RunSummary]) -> Result<String> {
        let documents: Vec<_> = summaries.iter().map(ExportDocument::from_run).collect();
        Ok(serde_json::to_string_pretty(&documents)?)
    }
}

/// Formats rollups read back from the telemetry store.
pub struct StoreReport;

impl StoreReport {
    pub fn format_performance(rows: &[PerformanceRow]) -> String {
        let mut table = new_table();
        table.set_header(vec![
            "Group", "Runs", "Requests", "Success", "Limited", "Errors", "Avg ms", "Success %",
        ]);
        for row in rows {
            table.add_row(vec![
                row.test_group.clone(),
                row.runs.to_string(),
                row.total_requests.to_string(),
                row.total_success.to_string(),
                row.total_limited.to_string(),
                row.total_errors.to_string(),
                format!("{:.1}", row.avg_latency_ms),
                format!("{:.1}", row.success_rate),
            ]);
        }
        table.to_string()
    }

    pub fn format_trends(rows: &[HourlyTrendRow]) -> String {
        let mut table = new_table();
        table.set_header(vec!["Hour", "Group", "Requests", "Success", "Limited", "Avg ms"]);
        for row in rows {
            table.add_row(vec![
                row.hour.format("%Y-%m-%d %H:00").to_string(),
                row.test_group.clone(),
                row.total_requests.to_string(),
                row.total_success.to_string(),
                row.total_limited.to_string(),
                format!("{:.1}", row.avg_latency_ms),
            ]);
        }
        table.to_string()
    }

    pub fn format_ranking(rows: &[RateLimitRankRow]) -> String {
        let mut table = new_table();
        table.set_header(vec![
            "Rank", "API Key", "Group", "Requests", "Limited", "Burst/Minute", "Throttle %",
        ]);
        for row in rows {
            table.add_row(vec![
                row.throttle_rank.to_string(),
                row.api_key.clone(),
                row.test_group.clone(),
                row.total_requests.to_string(),
                row.total_limited.to_string(),
                format!("{}/{}", row.burst_hits, row.minute_hits),
                format!("{:.1}", row.throttle_rate),
            ]);
        }
        table.to_string()
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS);
    table
}

fn limit(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn status(probe: &SingleProbe) -> String {
    match &probe.result.outcome {
        probe_common::ProbeOutcome::Http { status, .. } => status.to_string(),
        probe_common::ProbeOutcome::Transport { kind, .. } => format!("failed ({})", kind),
    }
}
