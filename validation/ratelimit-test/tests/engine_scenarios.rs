//! End-to-end runs of the probe engine against the in-process fake gateway.

use std::time::{Duration, Instant};

use probe_common::{
    AuthScheme, Bucket, HttpMethod, ProbeOutcome, ProbeTarget, ThrottleWindow, TransportErrorKind,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use ratelimit_test::{ProbeEngine, RunConfig, ScenarioConfig, TenantRegistry};
use test_utils::{
    assert_within, basic_tenant, closed_port_url, fixtures, premium_tenant, FakeGateway,
    GatewayBehavior, QuotaHeaders,
};

fn target(scheme: AuthScheme, method: HttpMethod) -> ProbeTarget {
    ProbeTarget::new(premium_tenant(), scheme, method)
}

fn run_config(label: &str, url: String, targets: Vec<ProbeTarget>) -> RunConfig {
    RunConfig::new(label, url, targets).with_timeout(Duration::from_secs(5))
}

// ============================================================================
// Outcome accounting
// ============================================================================

#[tokio::test]
async fn test_all_success_within_budget() {
    let gateway = FakeGateway::start(GatewayBehavior::ok().with_group("premium"))
        .await
        .unwrap();
    let config = run_config(
        "premium-ok",
        gateway.url(),
        vec![target(AuthScheme::HeaderV4, HttpMethod::Get)],
    )
    .with_rate(20)
    .with_max_requests(100)
    .with_duration(Duration::from_secs(10));

    let summary = ProbeEngine::new(config).unwrap().run().await.unwrap();

    assert_eq!(summary.total(), 100);
    assert_eq!(summary.totals.success, 100);
    assert_eq!(summary.totals.throttled, 0);
    assert_eq!(summary.totals.errors, 0);
    assert_eq!(summary.unissued, 0);
    assert!(summary.throttle_events.is_empty());
    assert_eq!(gateway.request_count(), 100);

    let group = &summary.groups["premium"];
    assert_eq!(group.detected_group.as_deref(), Some("premium"));
    assert!(!group.group_mismatch());
    assert_eq!(summary.auth_methods.get("sigv4"), Some(&100));
}

#[tokio::test]
async fn test_throttled_responses_become_events() {
    let quota = QuotaHeaders {
        limit_per_second: 100,
        current_per_second: 1,
        limit_per_minute: 1000,
        current_per_minute: 10,
        remaining_per_minute: 0,
        reset_seconds: 42,
    };
    let gateway = FakeGateway::start(
        GatewayBehavior::ok()
            .throttle_every(6)
            .with_group("basic")
            .with_quota(quota),
    )
    .await
    .unwrap();
    let config = run_config(
        "basic-throttle",
        gateway.url(),
        vec![ProbeTarget::new(
            basic_tenant(),
            AuthScheme::HeaderV4,
            HttpMethod::Get,
        )],
    )
    .with_rate(20)
    .with_max_requests(60)
    .with_duration(Duration::from_secs(10));

    let summary = ProbeEngine::new(config).unwrap().run().await.unwrap();

    assert_eq!(summary.total(), 60);
    assert_eq!(summary.totals.throttled, 10);
    assert_eq!(summary.totals.success, 50);
    assert_eq!(summary.throttle_events.len(), 10);

    for event in &summary.throttle_events {
        assert_eq!(event.group, "basic");
        assert_eq!(event.window, ThrottleWindow::Minute);
        assert_eq!(event.remaining, 0);
        assert_eq!(event.reset_seconds, 42);
        assert_eq!(event.access_key, fixtures::keys::BASIC);
    }
    assert!(summary
        .throttle_events
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));

    let group = &summary.groups["basic"];
    assert_eq!(group.minute_hits, 10);
    assert_eq!(group.burst_hits, 0);
    assert_eq!(group.effective_limit(), 100);
    for group in summary.groups.values() {
        assert_eq!(
            group.total(),
            group.counts.success + group.counts.throttled + group.counts.errors
        );
    }
}

#[tokio::test]
async fn test_unreachable_gateway_counts_transport_errors() {
    let config = run_config(
        "unreachable",
        closed_port_url(),
        vec![target(AuthScheme::HeaderV4, HttpMethod::Get)],
    )
    .with_rate(10)
    .with_max_requests(10)
    .with_timeout(Duration::from_secs(2));

    let summary = ProbeEngine::new(config).unwrap().run().await.unwrap();

    assert_eq!(summary.total(), 10);
    assert_eq!(summary.totals.errors, 10);
    assert_eq!(summary.totals.success, 0);

    let group = &summary.groups["premium"];
    let transport: u64 = group.transport_errors.values().sum();
    assert_eq!(transport, 10);
    assert!(group.status_errors.is_empty());
    assert!(!group.error_examples.is_empty());
    assert!(group.error_examples.iter().all(|e| e.status.is_none()));
    assert!(summary.auth_methods.is_empty());
}

#[tokio::test]
async fn test_error_status_is_recorded_by_code() {
    let gateway = FakeGateway::start(GatewayBehavior::ok().with_status(403))
        .await
        .unwrap();
    let config = run_config(
        "forbidden",
        gateway.url(),
        vec![target(AuthScheme::CustomHeader, HttpMethod::Get)],
    )
    .with_rate(10)
    .with_max_requests(10);

    let summary = ProbeEngine::new(config).unwrap().run().await.unwrap();

    let group = &summary.groups["premium"];
    assert_eq!(group.counts.errors, 10);
    assert_eq!(group.status_errors.get(&403), Some(&10));
    assert!(group.error_examples.len() <= probe_common::summary::MAX_ERROR_EXAMPLES);
    // Auth method is reported even on rejected requests
    assert_eq!(group.observed_auth_method.as_deref(), Some("api-key"));
    assert_eq!(group.detected_group, None);
}

#[tokio::test]
async fn test_group_mismatch_is_detected() {
    let gateway = FakeGateway::start(
        GatewayBehavior::ok().with_key_group(fixtures::keys::PREMIUM, "basic"),
    )
    .await
    .unwrap();
    let config = run_config(
        "mismatch",
        gateway.url(),
        vec![target(AuthScheme::HeaderV2, HttpMethod::Get)],
    )
    .with_rate(5)
    .with_max_requests(5);

    let summary = ProbeEngine::new(config).unwrap().run().await.unwrap();

    let group = &summary.groups["premium"];
    assert_eq!(group.detected_group.as_deref(), Some("basic"));
    assert!(group.group_mismatch());
}

// ============================================================================
// Pacing
// ============================================================================

#[tokio::test]
async fn test_rate_is_held_per_window() {
    let gateway = FakeGateway::start(GatewayBehavior::ok()).await.unwrap();
    let config = run_config(
        "rate",
        gateway.url(),
        vec![target(AuthScheme::HeaderV4, HttpMethod::Get)],
    )
    .with_rate(10)
    .with_duration(Duration::from_secs(3));

    let started = Instant::now();
    let summary = ProbeEngine::new(config).unwrap().run().await.unwrap();

    assert_within!(summary.total(), 30, 10);
    assert!(started.elapsed() >= Duration::from_millis(2500));
    assert!(summary.duration >= Duration::from_millis(2500));
}

#[tokio::test]
async fn test_requests_past_deadline_are_unissued() {
    let gateway = FakeGateway::start(GatewayBehavior::ok().with_latency(Duration::from_millis(300)))
        .await
        .unwrap();
    let config = run_config(
        "unissued",
        gateway.url(),
        vec![target(AuthScheme::HeaderV4, HttpMethod::Get)],
    )
    .with_rate(10)
    .with_workers(1)
    .with_duration(Duration::from_secs(1));

    let summary = ProbeEngine::new(config).unwrap().run().await.unwrap();

    assert_eq!(summary.total() + summary.unissued, 10);
    assert!(summary.unissued > 0);
    assert!(summary.total() > 0);
}

#[tokio::test]
async fn test_responses_landing_inside_grace_are_counted() {
    let gateway = FakeGateway::start(GatewayBehavior::ok().with_latency(Duration::from_millis(1500)))
        .await
        .unwrap();
    let config = run_config(
        "grace-counted",
        gateway.url(),
        vec![target(AuthScheme::HeaderV4, HttpMethod::Get)],
    )
    .with_rate(5)
    .with_workers(5)
    .with_duration(Duration::from_secs(1))
    .with_grace_period(Duration::from_secs(2));

    let summary = ProbeEngine::new(config).unwrap().run().await.unwrap();

    // Issued in the first window, answered after the deadline
    assert_eq!(summary.total(), 5);
    assert_eq!(summary.totals.success, 5);
    assert_eq!(summary.unissued, 0);
    assert_eq!(gateway.request_count(), 5);
}

#[tokio::test]
async fn test_unrepresentable_duration_is_rejected() {
    let config = run_config(
        "forever",
        closed_port_url(),
        vec![target(AuthScheme::HeaderV4, HttpMethod::Get)],
    )
    .with_duration(Duration::from_secs(u64::MAX));
    let err = ProbeEngine::new(config).unwrap_err();
    assert!(err.is_configuration());

    let config = run_config(
        "long-grace",
        closed_port_url(),
        vec![target(AuthScheme::HeaderV4, HttpMethod::Get)],
    )
    .with_duration(Duration::from_secs(1))
    .with_grace_period(Duration::MAX);
    assert!(ProbeEngine::new(config).unwrap_err().is_configuration());
}

#[tokio::test]
async fn test_stragglers_are_detached_after_grace() {
    let gateway = FakeGateway::start(GatewayBehavior::ok().with_latency(Duration::from_secs(3)))
        .await
        .unwrap();
    let config = run_config(
        "grace",
        gateway.url(),
        vec![target(AuthScheme::HeaderV4, HttpMethod::Get)],
    )
    .with_rate(5)
    .with_duration(Duration::from_secs(1))
    .with_grace_period(Duration::from_millis(500));

    let started = Instant::now();
    let summary = ProbeEngine::new(config).unwrap().run().await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(2900));
    // Nothing completed before finalization
    assert_eq!(summary.total(), 0);
}

#[tokio::test]
async fn test_snapshot_while_running() {
    let gateway = FakeGateway::start(GatewayBehavior::ok()).await.unwrap();
    let config = run_config(
        "snapshot",
        gateway.url(),
        vec![target(AuthScheme::HeaderV4, HttpMethod::Get)],
    )
    .with_rate(10)
    .with_duration(Duration::from_secs(3));

    let engine = ProbeEngine::new(config).unwrap();
    let handle = engine.start();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert!(!handle.is_finished());
    assert!(snapshot.total() > 0);

    let summary = handle.finish().await.unwrap();
    assert!(summary.total() >= snapshot.total());
    assert_eq!(summary.run_id, snapshot.run_id);
}

// ============================================================================
// Independent runs
// ============================================================================

#[tokio::test]
async fn test_concurrent_runs_share_nothing() {
    let gateway = FakeGateway::start(GatewayBehavior::ok().with_group("premium"))
        .await
        .unwrap();

    let first = ProbeEngine::new(
        run_config(
            "first",
            gateway.url(),
            vec![target(AuthScheme::HeaderV4, HttpMethod::Get)],
        )
        .with_rate(10)
        .with_max_requests(10),
    )
    .unwrap();
    let second = ProbeEngine::new(
        run_config(
            "second",
            gateway.url(),
            vec![target(AuthScheme::QueryV2, HttpMethod::Put)],
        )
        .with_rate(15)
        .with_max_requests(15),
    )
    .unwrap();

    let (a, b) = tokio::join!(first.run(), second.run());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.total(), 10);
    assert_eq!(b.total(), 15);
    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.groups["premium"].key.scheme, AuthScheme::HeaderV4);
    assert_eq!(b.groups["premium"].key.scheme, AuthScheme::QueryV2);
    assert_eq!(b.groups["premium"].key.method, HttpMethod::Put);
    assert_eq!(gateway.request_count(), 25);
}

#[tokio::test]
async fn test_targets_are_round_robin() {
    let gateway = FakeGateway::start(GatewayBehavior::ok()).await.unwrap();
    let config = run_config(
        "mixed",
        gateway.url(),
        vec![
            target(AuthScheme::HeaderV4, HttpMethod::Get),
            ProbeTarget::new(basic_tenant(), AuthScheme::CustomHeader, HttpMethod::Delete),
        ],
    )
    .with_rate(10)
    .with_max_requests(10);

    let summary = ProbeEngine::new(config).unwrap().run().await.unwrap();

    assert_eq!(summary.groups["premium"].total(), 5);
    assert_eq!(summary.groups["basic"].total(), 5);
    // DELETE answered with 204 counts as success
    assert_eq!(summary.groups["basic"].counts.success, 5);

    let deletes = gateway
        .received()
        .iter()
        .filter(|r| r.method == "DELETE")
        .count();
    assert_eq!(deletes, 5);
}

// ============================================================================
// Single probes
// ============================================================================

#[tokio::test]
async fn test_probe_once_reports_auth_method_per_scheme() {
    let gateway = FakeGateway::start(GatewayBehavior::ok().with_group("premium"))
        .await
        .unwrap();

    let expected = [
        (AuthScheme::HeaderV4, "sigv4"),
        (AuthScheme::HeaderV2, "sigv2"),
        (AuthScheme::PresignedQuery, "presigned-v4"),
        (AuthScheme::QueryV2, "query-v2"),
        (AuthScheme::CustomHeader, "api-key"),
    ];
    for (scheme, method) in expected {
        let probe_target = target(scheme, HttpMethod::Get);
        let engine = ProbeEngine::new(
            run_config("single", gateway.url(), vec![probe_target.clone()]).with_max_requests(1),
        )
        .unwrap();

        let probe = engine.probe_once(&probe_target).await;
        let headers = probe.headers().unwrap();
        assert_eq!(headers.auth_method.as_deref(), Some(method), "{}", scheme);
        assert_eq!(probe.classification.auth_method.as_deref(), Some(method));
        assert_eq!(
            probe.classification.detected_group.as_deref(),
            Some("premium")
        );
    }

    let received = gateway.received();
    assert_eq!(received.len(), 5);
    assert!(received
        .iter()
        .all(|r| r.access_key.as_deref() == Some(fixtures::keys::PREMIUM)));
}

#[tokio::test]
async fn test_probe_once_against_closed_port() {
    let probe_target = target(AuthScheme::HeaderV4, HttpMethod::Get);
    let engine = ProbeEngine::new(
        run_config("single", closed_port_url(), vec![probe_target.clone()]).with_max_requests(1),
    )
    .unwrap();

    let probe = engine.probe_once(&probe_target).await;
    match probe.result.outcome {
        probe_common::ProbeOutcome::Transport { kind, .. } => {
            assert_ne!(kind, TransportErrorKind::Timeout);
        }
        other => panic!("expected transport failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_truncated_body_is_a_transport_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort")
            .await
            .unwrap();
        // Closing here cuts the declared body short
    });

    let request_target = target(AuthScheme::HeaderV4, HttpMethod::Get);
    let engine = ProbeEngine::new(
        run_config("truncated", url, vec![request_target.clone()]).with_max_requests(1),
    )
    .unwrap();

    let single = engine.probe_once(&request_target).await;
    assert!(
        matches!(single.result.outcome, ProbeOutcome::Transport { .. }),
        "expected transport failure, got {:?}",
        single.result.outcome
    );
    assert_eq!(single.classification.bucket, Bucket::Error);
}

// ============================================================================
// Scenario files
// ============================================================================

#[tokio::test]
async fn test_scenario_file_runs_against_gateway() {
    let gateway = FakeGateway::start(GatewayBehavior::ok()).await.unwrap();
    let accounts = test_utils::temp_file_with(fixtures::SERVICE_ACCOUNTS_JSON);
    let scenario = test_utils::temp_file_with(&format!(
        r#"
name: tiers
base_url: {}
rate: 10
max_requests: 10
runs:
  - label: premium
    targets:
      - access_key: {}
  - label: standard
    targets:
      - access_key: {}
        scheme: custom
"#,
        gateway.url(),
        fixtures::keys::PREMIUM,
        fixtures::keys::STANDARD
    ));

    let config = ScenarioConfig::from_file(scenario.path()).unwrap();
    let registry = TenantRegistry::from_file(accounts.path()).unwrap();
    let runs = config.run_configs(Some(&registry)).unwrap();
    assert_eq!(runs.len(), 2);

    let mut summaries = Vec::new();
    for run in runs {
        summaries.push(ProbeEngine::new(run).unwrap().run().await.unwrap());
    }

    assert_eq!(summaries[0].groups["premium"].total(), 10);
    assert_eq!(summaries[1].groups["standard"].total(), 10);
    assert_eq!(
        summaries[1].groups["standard"].key.scheme,
        AuthScheme::CustomHeader
    );
    assert_eq!(gateway.request_count(), 20);
}

// ============================================================================
// Ingestion
// ============================================================================

#[tokio::test]
async fn test_live_run_ingests_into_memory_sink() {
    use ingestion::{IngestOptions, Ingester};
    use std::sync::Arc;
    use telemetry_store::schema::{RESULTS_TABLE, SUMMARY_TABLE, THROTTLE_EVENTS_TABLE};
    use telemetry_store::MemorySink;
    use tokio_test::assert_ok;

    let gateway = FakeGateway::start(GatewayBehavior::ok().throttle_every(5).with_group("premium"))
        .await
        .unwrap();
    let config = run_config(
        "ingest",
        gateway.url(),
        vec![target(AuthScheme::HeaderV4, HttpMethod::Get)],
    )
    .with_rate(20)
    .with_max_requests(20);
    let summary = ProbeEngine::new(config).unwrap().run().await.unwrap();
    assert_eq!(summary.totals.throttled, 4);

    let sink = Arc::new(MemorySink::new());
    let ingester = Ingester::new(sink.clone());
    let options = IngestOptions {
        run_id: Some(summary.run_id),
        ..IngestOptions::default()
    };
    let report = assert_ok!(ingester.ingest_run(&summary, &options).await);

    assert!(report.is_clean());
    assert_eq!(report.documents, 1);
    assert_eq!(sink.count(SUMMARY_TABLE), 1);
    assert_eq!(sink.count(RESULTS_TABLE), 1);
    assert_eq!(sink.count(THROTTLE_EVENTS_TABLE), 4);

    // Same run id again writes nothing new
    let again = assert_ok!(ingester.ingest_run(&summary, &options).await);
    assert_eq!(again.inserted, 0);
    assert_eq!(again.duplicates, report.inserted);
}

#[test]
fn test_shipped_scenarios_are_valid() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
    let registry = TenantRegistry::from_file(dir.join("service_accounts.json")).unwrap();
    assert_eq!(registry.len(), 6);

    let tiers = ScenarioConfig::from_file(dir.join("tier-comparison.yaml")).unwrap();
    let runs = tiers.run_configs(Some(&registry)).unwrap();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|r| r.rate == 20));

    let burst = ScenarioConfig::from_file(dir.join("basic-burst.yaml")).unwrap();
    let runs = burst.run_configs(None).unwrap();
    assert_eq!(runs[0].targets[0].method, HttpMethod::Put);
    assert_eq!(runs[1].rate, 20);
    assert!(runs[0].classifier.is_throttle(503));
}
