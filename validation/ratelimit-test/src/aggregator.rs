//! Single-owner aggregation of probe results.
//!
//! An [`Aggregator`] folds results into a [`RunSummary`]. [`spawn`] moves it
//! into its own task: workers deliver results over one channel and callers
//! ask for snapshots or the final summary over a control channel. Nothing
//! else ever touches the summary while a run is live.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use probe_common::{
    Bucket, ErrorExample, GroupKey, GroupSummary, ProbeError, ProbeOutcome, ProbeResult, Result,
    RunSummary, ThrottleEvent, ThrottleWindow,
};

use crate::classifier::{classify, ErrorCause};
use crate::config::ClassifierConfig;

const CONTROL_CHANNEL_CAPACITY: usize = 16;

/// Folds results into a run summary.
#[derive(Debug, Clone)]
pub struct Aggregator {
    summary: RunSummary,
    classifier: ClassifierConfig,
    last_event_at: Option<DateTime<Utc>>,
}

impl Aggregator {
    pub fn new(label: impl Into<String>, started_at: DateTime<Utc>, classifier: ClassifierConfig) -> Self {
        Self {
            summary: RunSummary::new(label, started_at),
            classifier,
            last_event_at: None,
        }
    }

    pub fn run_id(&self) -> uuid::Uuid {
        self.summary.run_id
    }

    /// Apply one result. Updates exactly one group and appends at most one
    /// throttle event.
    pub fn fold(&mut self, result: ProbeResult) {
        let classification = classify(&result.outcome, result.method, &self.classifier);
        let bucket = classification.bucket;

        if let Some(method) = &classification.auth_method {
            *self.summary.auth_methods.entry(method.clone()).or_insert(0) += 1;
        }
        self.summary.totals.record(bucket);

        let group = self
            .summary
            .groups
            .entry(result.group().to_string())
            .or_insert_with(|| {
                GroupSummary::new(GroupKey {
                    group: result.group().to_string(),
                    scheme: result.scheme,
                    method: result.method,
                })
            });

        group.counts.record(bucket);
        group.add_latency(result.latency_ms());
        group
            .api_keys
            .insert(result.tenant.access_key().to_string());

        if let Some(headers) = result.outcome.headers() {
            if headers.has_quota() {
                group.last_quota = Some(headers.clone());
            }
        }
        if let Some(detected) = classification.detected_group {
            group.detected_group = Some(detected);
        }
        if let Some(method) = classification.auth_method {
            group.observed_auth_method = Some(method);
        }

        match (bucket, classification.cause) {
            (Bucket::Error, Some(ErrorCause::Status(status))) => {
                *group.status_errors.entry(status).or_insert(0) += 1;
                group.push_example(ErrorExample {
                    status: Some(status),
                    message: format!("HTTP {}", status),
                    timestamp: result.completed_at,
                    method: result.method,
                });
            }
            (Bucket::Error, Some(ErrorCause::Transport(kind))) => {
                *group.transport_errors.entry(kind).or_insert(0) += 1;
                let message = match &result.outcome {
                    ProbeOutcome::Transport { error, .. } => error.clone(),
                    ProbeOutcome::Http { .. } => kind.to_string(),
                };
                group.push_example(ErrorExample {
                    status: None,
                    message,
                    timestamp: result.completed_at,
                    method: result.method,
                });
            }
            (Bucket::Throttled, _) => {
                let window = classification.window.unwrap_or(ThrottleWindow::Unknown);
                match window {
                    ThrottleWindow::Burst => group.burst_hits += 1,
                    ThrottleWindow::Minute => group.minute_hits += 1,
                    ThrottleWindow::Unknown => {}
                }

                let (remaining, reset_seconds) = result
                    .outcome
                    .headers()
                    .map(|h| (h.remaining_or_zero(), h.reset_or_zero()))
                    .unwrap_or((0, 0));
                let timestamp = self.next_event_timestamp(result.completed_at);
                self.summary.throttle_events.push(ThrottleEvent {
                    timestamp,
                    group: result.group().to_string(),
                    method: result.method,
                    access_key: result.tenant.access_key().to_string(),
                    remaining,
                    reset_seconds,
                    window,
                });
            }
            _ => {}
        }
    }

    /// Event timestamps never go backwards within a run.
    fn next_event_timestamp(&mut self, completed_at: DateTime<Utc>) -> DateTime<Utc> {
        let timestamp = match self.last_event_at {
            Some(previous) if completed_at < previous => previous,
            _ => completed_at,
        };
        self.last_event_at = Some(timestamp);
        timestamp
    }

    /// Copy of the summary as of the last fold.
    pub fn snapshot(&self) -> RunSummary {
        self.summary.clone()
    }

    pub fn finish(mut self, duration: Duration, unissued: u64) -> RunSummary {
        self.summary.duration = duration;
        self.summary.unissued = unissued;
        self.summary
    }
}

enum Control {
    Snapshot(oneshot::Sender<RunSummary>),
    Finish {
        duration: Duration,
        unissued: u64,
        reply: oneshot::Sender<RunSummary>,
    },
}

/// Handle to an aggregator running in its own task.
pub struct AggregatorHandle {
    control: mpsc::Sender<Control>,
    task: JoinHandle<()>,
}

/// Start an aggregator task reading from `results`.
pub fn spawn(aggregator: Aggregator, results: mpsc::Receiver<ProbeResult>) -> AggregatorHandle {
    let (control, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    let task = tokio::spawn(aggregate(aggregator, results, control_rx));
    AggregatorHandle { control, task }
}

async fn aggregate(
    mut aggregator: Aggregator,
    mut results: mpsc::Receiver<ProbeResult>,
    mut control: mpsc::Receiver<Control>,
) {
    let mut results_open = true;
    loop {
        tokio::select! {
            biased;

            command = control.recv() => match command {
                Some(Control::Snapshot(reply)) => {
                    let _ = reply.send(aggregator.snapshot());
                }
                Some(Control::Finish { duration, unissued, reply }) => {
                    // Refuse new results, then take everything already queued
                    results.close();
                    let mut drained = 0u64;
                    while let Some(result) = results.recv().await {
                        aggregator.fold(result);
                        drained += 1;
                    }
                    debug!(drained, "Aggregator drained pending results");

                    let summary = aggregator.finish(duration, unissued);
                    info!(
                        run = %summary.label,
                        total = summary.total(),
                        throttled = summary.totals.throttled,
                        errors = summary.totals.errors,
                        "Run finalized"
                    );
                    let _ = reply.send(summary);
                    return;
                }
                None => return,
            },

            result = results.recv(), if results_open => match result {
                Some(result) => aggregator.fold(result),
                None => results_open = false,
            },
        }
    }
}

impl AggregatorHandle {
    /// Summary reflecting every result folded so far.
    pub async fn snapshot(&self) -> Result<RunSummary> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(Control::Snapshot(reply))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Drain delivered results and return the final summary. Results sent
    /// after this are rejected by the channel.
    pub async fn finish(self, duration: Duration, unissued: u64) -> Result<RunSummary> {
        let (reply, rx) = oneshot::channel();
        self.control
            .send(Control::Finish {
                duration,
                unissued,
                reply,
            })
            .await
            .map_err(|_| stopped())?;
        let summary = rx.await.map_err(|_| stopped())?;
        self.task
            .await
            .map_err(|e| ProbeError::Internal(format!("aggregator task failed: {}", e)))?;
        Ok(summary)
    }
}

fn stopped() -> ProbeError {
    ProbeError::Internal("aggregator is no longer running".to_string())
}

/// One group of one run, laid out for side-by-side comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub run: String,
    pub group: String,
    pub detected_group: Option<String>,
    pub access_keys: String,
    pub requests: u64,
    pub success_rate: f64,
    pub throttle_rate: f64,
    pub avg_latency_ms: f64,
    pub effective_limit: u64,
    pub mismatch: bool,
}

/// Put the groups of several runs side by side, in run order.
pub fn compare_runs(runs: &[RunSummary]) -> Vec<ComparisonRow> {
    runs.iter()
        .flat_map(|run| {
            run.groups.values().map(move |group| ComparisonRow {
                run: run.label.clone(),
                group: group.key.group.clone(),
                detected_group: group.detected_group.clone(),
                access_keys: group.api_key_list(),
                requests: group.total(),
                success_rate: group.counts.success_rate(),
                throttle_rate: group.counts.throttle_rate(),
                avg_latency_ms: group.avg_latency_ms(),
                effective_limit: group.effective_limit(),
                mismatch: group.group_mismatch(),
            })
        })
        .collect()
}
