//! Rate-controlled probe engine.
//!
//! Time is cut into one-second windows. Each window starts `rate` requests
//! (round-robin over the targets), waits for them, then sleeps out the rest
//! of the second. A slow window is not compensated by the next one.
//! Concurrency is bounded by a semaphore with `workers` permits, independent
//! of the rate.

use chrono::Utc;
use std::error::Error as StdError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

use probe_common::{
    HttpMethod, ProbeError, ProbeOutcome, ProbeRequest, ProbeResult, ProbeTarget,
    RateLimitHeaders, Result, RunSummary, TransportErrorKind,
};

use crate::aggregator::{self, Aggregator, AggregatorHandle};
use crate::auth::AuthSimulator;
use crate::classifier::{classify, Classification};
use crate::config::RunConfig;
use crate::generator::{request_body, PathGenerator};

const WINDOW: Duration = Duration::from_secs(1);
const RESULT_CHANNEL_CAPACITY: usize = 1024;

/// A single request together with its classification.
#[derive(Debug, Clone)]
pub struct SingleProbe {
    pub result: ProbeResult,
    pub classification: Classification,
}

impl SingleProbe {
    pub fn headers(&self) -> Option<&RateLimitHeaders> {
        self.result.outcome.headers()
    }
}

/// Sends one request and turns the response into a [`ProbeResult`].
#[derive(Debug, Clone)]
struct Dispatcher {
    client: reqwest::Client,
    auth: AuthSimulator,
}

impl Dispatcher {
    async fn execute(&self, request: ProbeRequest) -> ProbeResult {
        let credentials =
            self.auth
                .credentials(&request.tenant, request.scheme, request.method, &request.path);

        let mut builder = self
            .client
            .request(reqwest_method(request.method), request.url());
        for (name, value) in &credentials.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !credentials.query.is_empty() {
            builder = builder.query(&credentials.query);
        }
        if request.method.has_body() {
            builder = builder
                .header("Content-Type", "text/plain")
                .body(request_body(&request));
        }

        let start = Instant::now();
        let outcome = match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let headers = RateLimitHeaders::from_pairs(
                    response
                        .headers()
                        .iter()
                        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
                );
                // Read the body so the connection can be reused
                match response.bytes().await {
                    Ok(_) => ProbeOutcome::Http { status, headers },
                    Err(e) => transport_outcome(&e),
                }
            }
            Err(e) => transport_outcome(&e),
        };
        let latency = start.elapsed();

        ProbeResult {
            tenant: request.tenant,
            scheme: request.scheme,
            method: request.method,
            sequence: request.sequence,
            outcome,
            latency,
            completed_at: Utc::now(),
        }
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
    }
}

/// Describe a reqwest error with its whole source chain.
fn transport_outcome(err: &reqwest::Error) -> ProbeOutcome {
    let mut error = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        error.push_str(": ");
        error.push_str(&cause.to_string());
        source = cause.source();
    }

    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else {
        TransportErrorKind::categorize(&error)
    };
    ProbeOutcome::Transport { error, kind }
}

/// Drives one run. Engines share nothing with each other.
#[derive(Debug)]
pub struct ProbeEngine {
    config: Arc<RunConfig>,
    dispatcher: Dispatcher,
}

impl ProbeEngine {
    /// Validate the configuration and build the HTTP client.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.workers)
            .build()
            .map_err(|e| ProbeError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let dispatcher = Dispatcher {
            client,
            auth: AuthSimulator::new(config.auth.clone()),
        };

        Ok(Self {
            config: Arc::new(config),
            dispatcher,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Send one request to `target` and classify the response.
    pub async fn probe_once(&self, target: &ProbeTarget) -> SingleProbe {
        let path = PathGenerator::new(self.config.paths.clone()).path_for(&target.tenant, 1);
        let request = ProbeRequest::new(&self.config.base_url, target, path, 1);
        let result = self.dispatcher.execute(request).await;
        let classification = classify(&result.outcome, result.method, &self.config.classifier);
        SingleProbe {
            result,
            classification,
        }
    }

    /// Start the run in the background.
    pub fn start(&self) -> RunHandle {
        let (results_tx, results_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        let aggregator = aggregator::spawn(
            Aggregator::new(
                self.config.label.clone(),
                Utc::now(),
                self.config.classifier.clone(),
            ),
            results_rx,
        );

        info!(
            run = %self.config.label,
            rate = self.config.rate,
            workers = self.config.workers,
            targets = self.config.targets.len(),
            duration_secs = self.config.duration.map(|d| d.as_secs()),
            max_requests = self.config.max_requests,
            "Starting run"
        );

        let driver = tokio::spawn(drive(
            self.config.clone(),
            self.dispatcher.clone(),
            results_tx,
        ));

        RunHandle {
            aggregator,
            driver,
            started: Instant::now(),
        }
    }

    /// Run to completion and return the final summary.
    pub async fn run(&self) -> Result<RunSummary> {
        self.start().finish().await
    }
}

/// What the pacing loop did.
#[derive(Debug, Clone, Copy, Default)]
struct DriveReport {
    windows: u64,
    enqueued: u64,
    issued: u64,
}

/// A run in progress.
pub struct RunHandle {
    aggregator: AggregatorHandle,
    driver: JoinHandle<DriveReport>,
    started: Instant,
}

impl RunHandle {
    /// Live view of the run without stopping it.
    pub async fn snapshot(&self) -> Result<RunSummary> {
        self.aggregator.snapshot().await
    }

    /// Whether the pacing loop has stopped.
    pub fn is_finished(&self) -> bool {
        self.driver.is_finished()
    }

    /// Wait for the run to end, then finalize the aggregate.
    pub async fn finish(self) -> Result<RunSummary> {
        let report = self
            .driver
            .await
            .map_err(|e| ProbeError::Internal(format!("probe driver failed: {}", e)))?;
        let unissued = report.enqueued.saturating_sub(report.issued);
        debug!(
            windows = report.windows,
            enqueued = report.enqueued,
            issued = report.issued,
            "Pacing loop finished"
        );
        self.aggregator.finish(self.started.elapsed(), unissued).await
    }
}

async fn drive(
    config: Arc<RunConfig>,
    dispatcher: Dispatcher,
    results: mpsc::Sender<ProbeResult>,
) -> DriveReport {
    let semaphore = Arc::new(Semaphore::new(config.workers));
    let issued = Arc::new(AtomicU64::new(0));
    let started = Instant::now();
    let deadline = config.duration.and_then(|d| started.checked_add(d));
    let wait_limit = deadline.and_then(|d| d.checked_add(config.grace_period));

    let mut paths = PathGenerator::new(config.paths.clone());
    let mut report = DriveReport::default();
    let rate = u64::from(config.rate);

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        let count = match config.max_requests {
            Some(max) => rate.min(max.saturating_sub(report.enqueued)),
            None => rate,
        };
        if count == 0 {
            break;
        }

        let window_start = Instant::now();
        let mut tasks = JoinSet::new();
        for _ in 0..count {
            let sequence = report.enqueued + 1;
            let target = &config.targets[(report.enqueued % config.targets.len() as u64) as usize];
            let path = paths.path_for(&target.tenant, sequence);
            let request = ProbeRequest::new(&config.base_url, target, path, sequence);
            report.enqueued += 1;

            let semaphore = semaphore.clone();
            let dispatcher = dispatcher.clone();
            let results = results.clone();
            let issued = issued.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                // Queued past the deadline: never sent, counted as unissued
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    return;
                }
                issued.fetch_add(1, Ordering::SeqCst);
                let result = dispatcher.execute(request).await;
                if results.send(result).await.is_err() {
                    debug!(sequence, "Result arrived after finalization, dropped");
                }
            });
        }
        report.windows += 1;

        if !wait_for_window(&mut tasks, wait_limit).await {
            warn!(
                run = %config.label,
                stragglers = tasks.len(),
                "Grace period elapsed, detaching in-flight requests"
            );
            tasks.detach_all();
            break;
        }

        if config
            .max_requests
            .is_some_and(|max| report.enqueued >= max)
        {
            break;
        }

        let next = window_start + WINDOW;
        sleep_until(deadline.map_or(next, |d| next.min(d))).await;
    }

    report.issued = issued.load(Ordering::SeqCst);
    report
}

/// Wait for every task of a window. Returns false if `limit` passed first.
async fn wait_for_window(tasks: &mut JoinSet<()>, limit: Option<Instant>) -> bool {
    let drain = async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Probe task failed");
            }
        }
    };
    match limit {
        Some(limit) => timeout_at(limit, drain).await.is_ok(),
        None => {
            drain.await;
            true
        }
    }
}
