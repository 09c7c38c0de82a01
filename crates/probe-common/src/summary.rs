//! Aggregated statistics for a run and the groups inside it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::headers::RateLimitHeaders;
use crate::result::TransportErrorKind;
use crate::scheme::{AuthScheme, HttpMethod};

/// Maximum number of error examples kept per group.
pub const MAX_ERROR_EXAMPLES: usize = 5;

/// Outcome bucket a classified result falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Success,
    Throttled,
    Error,
}

/// Success, throttled and error counters. The total is always derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub success: u64,
    pub throttled: u64,
    pub errors: u64,
}

impl OutcomeCounts {
    pub fn total(&self) -> u64 {
        self.success + self.throttled + self.errors
    }

    pub fn record(&mut self, bucket: Bucket) {
        match bucket {
            Bucket::Success => self.success += 1,
            Bucket::Throttled => self.throttled += 1,
            Bucket::Error => self.errors += 1,
        }
    }

    pub fn merge(&mut self, other: &OutcomeCounts) {
        self.success += other.success;
        self.throttled += other.throttled;
        self.errors += other.errors;
    }

    /// Percentage of requests that succeeded, 0 when nothing was counted.
    pub fn success_rate(&self) -> f64 {
        percentage(self.success, self.total())
    }

    /// Percentage of requests that were throttled, 0 when nothing was counted.
    pub fn throttle_rate(&self) -> f64 {
        percentage(self.throttled, self.total())
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

/// Aggregation key for a group summary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub group: String,
    pub scheme: AuthScheme,
    pub method: HttpMethod,
}

/// Which limiter a throttle response is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleWindow {
    Burst,
    Minute,
    Unknown,
}

impl ThrottleWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleWindow::Burst => "burst",
            ThrottleWindow::Minute => "minute",
            ThrottleWindow::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ThrottleWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single throttled response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleEvent {
    pub timestamp: DateTime<Utc>,
    pub group: String,
    pub method: HttpMethod,
    pub access_key: String,
    pub remaining: u64,
    pub reset_seconds: u64,
    pub window: ThrottleWindow,
}

/// A sample error kept for debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorExample {
    /// HTTP status, absent for transport failures
    pub status: Option<u16>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub method: HttpMethod,
}

/// Running aggregate for one (group, scheme, method).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub key: GroupKey,
    pub counts: OutcomeCounts,
    pub latency_sum_ms: f64,
    pub latency_samples: u64,
    pub detected_group: Option<String>,
    pub observed_auth_method: Option<String>,
    pub last_quota: Option<RateLimitHeaders>,
    pub status_errors: BTreeMap<u16, u64>,
    pub transport_errors: BTreeMap<TransportErrorKind, u64>,
    pub error_examples: Vec<ErrorExample>,
    pub burst_hits: u64,
    pub minute_hits: u64,
    pub api_keys: BTreeSet<String>,
}

impl GroupSummary {
    pub fn new(key: GroupKey) -> Self {
        Self {
            key,
            counts: OutcomeCounts::default(),
            latency_sum_ms: 0.0,
            latency_samples: 0,
            detected_group: None,
            observed_auth_method: None,
            last_quota: None,
            status_errors: BTreeMap::new(),
            transport_errors: BTreeMap::new(),
            error_examples: Vec::new(),
            burst_hits: 0,
            minute_hits: 0,
            api_keys: BTreeSet::new(),
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.total()
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.latency_samples == 0 {
            0.0
        } else {
            self.latency_sum_ms / self.latency_samples as f64
        }
    }

    pub fn add_latency(&mut self, latency_ms: f64) {
        self.latency_sum_ms += latency_ms;
        self.latency_samples += 1;
    }

    /// Keep an error example unless the cap is already reached.
    pub fn push_example(&mut self, example: ErrorExample) {
        if self.error_examples.len() < MAX_ERROR_EXAMPLES {
            self.error_examples.push(example);
        }
    }

    /// Per-second limit reported by the gateway, 0 when never seen.
    pub fn effective_limit(&self) -> u64 {
        self.last_quota
            .as_ref()
            .and_then(|quota| quota.limit_per_second)
            .unwrap_or(0)
    }

    /// Whether the gateway put this tenant in a different group than expected.
    pub fn group_mismatch(&self) -> bool {
        match &self.detected_group {
            Some(detected) => !detected.eq_ignore_ascii_case(&self.key.group),
            None => false,
        }
    }

    /// Comma-joined access keys, used as a single column value.
    pub fn api_key_list(&self) -> String {
        self.api_keys.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

/// Aggregate of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub totals: OutcomeCounts,
    pub groups: BTreeMap<String, GroupSummary>,
    pub throttle_events: Vec<ThrottleEvent>,
    pub auth_methods: BTreeMap<String, u64>,
    pub unissued: u64,
}

impl RunSummary {
    pub fn new(label: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            label: label.into(),
            started_at,
            duration: Duration::ZERO,
            totals: OutcomeCounts::default(),
            groups: BTreeMap::new(),
            throttle_events: Vec::new(),
            auth_methods: BTreeMap::new(),
            unissued: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.totals.total()
    }

    /// Throttle events recorded for one group, in processing order.
    pub fn events_for<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a ThrottleEvent> {
        self.throttle_events
            .iter()
            .filter(move |event| event.group == group)
    }

    /// Outcome totals across several runs.
    pub fn combined_totals(runs: &[RunSummary]) -> OutcomeCounts {
        runs.iter().fold(OutcomeCounts::default(), |mut acc, run| {
            acc.merge(&run.totals);
            acc
        })
    }
}
