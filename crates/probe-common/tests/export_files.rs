//! Integration tests for reading export files from disk.

use std::io::Write;

use probe_common::{ExportFile, ProbeError};
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// File loading
// ============================================================================

#[test]
fn test_load_single_document_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "summary": {{
                "TotalTests": 2,
                "Duration": 5000000000,
                "TotalRequests": 20,
                "TotalSuccess": 18,
                "TotalLimited": 2,
                "TotalErrors": 0,
                "ByGroup": {{
                    "premium": {{"APIKey": "AK1", "Method": "GET", "RequestsSent": 10, "Success": 10}},
                    "basic": {{"APIKey": "AK2", "Method": "GET", "RequestsSent": 10, "Success": 8, "RateLimited": 2}}
                }},
                "RateLimitAnalysis": {{
                    "basic": {{
                        "Group": "basic",
                        "ObservedBursts": 2,
                        "ThrottleEvents": [
                            {{"Timestamp": "2025-01-08T10:00:01Z", "Group": "basic", "Method": "GET", "RemainingReqs": 0, "ResetIn": 30000000000}}
                        ]
                    }}
                }}
            }},
            "version": "1.0.0"
        }}"#
    )
    .unwrap();

    let docs = assert_ok!(ExportFile::from_file(file.path())).into_documents();
    assert_eq!(docs.len(), 1);

    let summary = &docs[0].summary;
    assert_eq!(summary.by_group.len(), 2);
    assert_eq!(summary.total_limited, 2);

    let analysis = summary.analysis_for("basic").unwrap();
    assert_eq!(analysis.throttle_events.len(), 1);
    assert_eq!(analysis.throttle_events[0].reset_in_seconds(), 30);
}

#[test]
fn test_missing_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = assert_err!(ExportFile::from_file(dir.path().join("missing.json")));
    assert!(matches!(err, ProbeError::Internal(_)));
}
