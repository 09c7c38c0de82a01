//! End-to-end ingestion tests against the in-memory sink.

use std::sync::Arc;

use ingestion::{IngestOptions, Ingester, IngestionError};
use telemetry_store::schema::{RESULTS_TABLE, SUMMARY_TABLE, THROTTLE_EVENTS_TABLE};
use telemetry_store::{MemorySink, TelemetryRecord};
use test_utils::{sample_run_summary, temp_file_with, LEGACY_EXPORT_JSON};
use tokio_test::assert_ok;
use uuid::Uuid;

fn ingester(sink: &Arc<MemorySink>) -> Ingester {
    Ingester::new(sink.clone())
}

// ============================================================================
// Legacy export files
// ============================================================================

#[tokio::test]
async fn test_group_without_analysis_is_stored_as_zero() {
    let sink = Arc::new(MemorySink::new());
    let file = temp_file_with(LEGACY_EXPORT_JSON);

    let report = assert_ok!(
        ingester(&sink)
            .ingest_file(file.path(), &IngestOptions::default())
            .await
    );

    assert!(report.is_clean());
    assert_eq!(report.documents, 1);
    assert_eq!(sink.count(SUMMARY_TABLE), 1);
    assert_eq!(sink.count(RESULTS_TABLE), 2);
    assert_eq!(sink.count(THROTTLE_EVENTS_TABLE), 2);

    let premium = sink
        .records()
        .into_iter()
        .find_map(|r| match r {
            TelemetryRecord::Result(r) if r.test_group == "premium" => Some(r),
            _ => None,
        })
        .unwrap();
    assert_eq!(premium.effective_limit, 0);
    assert_eq!(premium.observed_bursts, 0);
    assert_eq!(premium.success_rate, 0.0);
    assert_eq!(premium.auth_scheme, "");
    assert_eq!(premium.avg_latency_ms, 12.0);
}

#[tokio::test]
async fn test_batch_file_ingests_every_document() {
    let sink = Arc::new(MemorySink::new());
    let batch = format!("[{0}, {0}]", LEGACY_EXPORT_JSON);
    let file = temp_file_with(&batch);

    let report = assert_ok!(
        ingester(&sink)
            .ingest_file(file.path(), &IngestOptions::default())
            .await
    );

    // No run id: the second copy is written again
    assert_eq!(report.documents, 2);
    assert_eq!(report.inserted, 10);
    assert_eq!(sink.count(SUMMARY_TABLE), 2);
}

#[tokio::test]
async fn test_unparsable_file_is_parse_error() {
    let sink = Arc::new(MemorySink::new());
    let file = temp_file_with("{\"summary\": [1, 2");

    let err = ingester(&sink)
        .ingest_file(file.path(), &IngestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestionError::Parse(_)));
    assert!(sink.is_empty());
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_reingesting_with_run_id_is_idempotent() {
    let sink = Arc::new(MemorySink::new());
    let run = sample_run_summary();
    let ingester = ingester(&sink);
    let options = IngestOptions::default();

    let first = assert_ok!(ingester.ingest_run(&run, &options).await);
    let written = sink.len();
    let second = assert_ok!(ingester.ingest_run(&run, &options).await);

    assert_eq!(first.inserted, written);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, written);
    assert_eq!(sink.len(), written);
}

#[tokio::test]
async fn test_run_id_override() {
    let sink = Arc::new(MemorySink::new());
    let file = temp_file_with(LEGACY_EXPORT_JSON);
    let run_id = Uuid::new_v4();
    let options = IngestOptions {
        run_id: Some(run_id),
        ..IngestOptions::default()
    };

    let ingester = ingester(&sink);
    assert_ok!(ingester.ingest_file(file.path(), &options).await);
    let again = assert_ok!(ingester.ingest_file(file.path(), &options).await);

    assert_eq!(again.inserted, 0);
    assert!(sink.records().iter().all(|r| r.run_id() == Some(run_id)));
}

// ============================================================================
// Write failures
// ============================================================================

#[tokio::test]
async fn test_failed_write_is_skipped_and_ingestion_continues() {
    let sink = Arc::new(MemorySink::failing_when(|r| {
        matches!(r, TelemetryRecord::Result(r) if r.test_group == "basic")
    }));
    let run = sample_run_summary();

    let report = assert_ok!(
        ingester(&sink)
            .ingest_run(&run, &IngestOptions::default())
            .await
    );

    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].record.contains("basic"));
    // summary, premium result and both throttle events still land
    assert_eq!(sink.count(SUMMARY_TABLE), 1);
    assert_eq!(sink.count(RESULTS_TABLE), 1);
    assert_eq!(sink.count(THROTTLE_EVENTS_TABLE), 2);
}

#[tokio::test]
async fn test_strict_mode_stops_at_first_failure() {
    let sink = Arc::new(MemorySink::failing_when(|r| r.table() == RESULTS_TABLE));
    let run = sample_run_summary();
    let options = IngestOptions {
        strict: true,
        ..IngestOptions::default()
    };

    let err = ingester(&sink).ingest_run(&run, &options).await.unwrap_err();
    assert!(matches!(err, IngestionError::Write { .. }));
    // the summary written before the failure is kept
    assert_eq!(sink.count(SUMMARY_TABLE), 1);
}
