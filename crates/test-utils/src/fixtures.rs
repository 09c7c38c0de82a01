//! Common test fixtures for rate-limit probe tests.
//!
//! Tenants, service-account files and export documents shaped like the ones
//! produced by real runs, including older exports with missing fields.

use chrono::{TimeZone, Utc};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use probe_common::{
    AuthScheme, GroupKey, GroupSummary, HttpMethod, RunSummary, TenantIdentity, ThrottleEvent,
    ThrottleWindow, Tier,
};

/// Access keys used across tests, one per tier.
pub mod keys {
    pub const PREMIUM: &str = "5HQZO7EDOM4XBNO642GQ";
    pub const STANDARD: &str = "KXQ2MBGF8P7YV9L3EWZA";
    pub const BASIC: &str = "R4TN6JCU1HD0SAQ2XVKB";
}

/// Build a tenant, panicking on an invalid key.
pub fn tenant(access_key: &str, tier: Tier) -> TenantIdentity {
    TenantIdentity::with_secret(access_key, format!("secret-{}", access_key), tier)
        .expect("valid test tenant")
}

pub fn premium_tenant() -> TenantIdentity {
    tenant(keys::PREMIUM, Tier::Premium)
}

pub fn basic_tenant() -> TenantIdentity {
    tenant(keys::BASIC, Tier::Basic)
}

/// A `service_accounts.json` with two accounts per tier.
pub const SERVICE_ACCOUNTS_JSON: &str = r#"{
  "service_accounts": [
    {"access_key": "5HQZO7EDOM4XBNO642GQ", "secret_key": "s1", "group": "premium", "description": "premium 1"},
    {"access_key": "P2BXWQ8N4MZK7T1RVLEA", "secret_key": "s2", "group": "premium"},
    {"access_key": "KXQ2MBGF8P7YV9L3EWZA", "secret_key": "s3", "group": "standard"},
    {"access_key": "S9HD2KQ7YBNF3W0XCTLJ", "secret_key": "s4", "group": "standard"},
    {"access_key": "R4TN6JCU1HD0SAQ2XVKB", "secret_key": "s5", "group": "basic"},
    {"access_key": "B7MWZ0QKX3LTE8NDF2YH", "secret_key": "s6", "group": "basic"}
  ]
}"#;

/// Export where the `premium` group has no `RateLimitAnalysis` at all.
pub const LEGACY_EXPORT_JSON: &str = r#"{
  "summary": {
    "TotalTests": 2,
    "Duration": 5000000000,
    "TotalRequests": 20,
    "TotalSuccess": 17,
    "TotalLimited": 2,
    "TotalErrors": 1,
    "AuthMethods": {"V4 Header": 20},
    "ByGroup": {
      "premium": {"APIKey": "5HQZO7EDOM4XBNO642GQ", "Method": "GET", "RequestsSent": 10, "Success": 10, "AvgLatencyMs": 12},
      "basic": {
        "APIKey": "R4TN6JCU1HD0SAQ2XVKB", "Method": "GET", "RequestsSent": 10,
        "Success": 7, "RateLimited": 2, "Errors": 1, "AvgLatencyMs": 18,
        "ErrorDetails": {"HTTP 503": 1},
        "RateLimitAnalysis": {
          "Group": "basic", "EffectiveLimit": 5, "ObservedBursts": 2, "SuccessRate": 70.0,
          "ThrottleEvents": [
            {"Timestamp": "2025-01-08T10:00:01+05:30", "Group": "basic", "Method": "GET", "RemainingReqs": 0, "ResetIn": 30000000000},
            {"Timestamp": "2025-01-08T10:00:02+05:30", "Group": "basic", "Method": "GET", "RemainingReqs": 0, "ResetIn": 29000000000}
          ]
        }
      }
    },
    "HeaderAnalysis": {"UniqueAuthMethods": ["V4 Header"]}
  },
  "export_time": "2025-01-08T10:05:00+05:30",
  "version": "1.0.0"
}"#;

/// Write `content` to a named temp file that lives as long as the handle.
pub fn temp_file_with(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(content.as_bytes()).expect("write temp file");
    file
}

/// Path of a file in a temp dir, returned together with the dir guard.
pub fn temp_path(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

/// A finished run with one premium and one basic group.
pub fn sample_run_summary() -> RunSummary {
    let started = Utc
        .with_ymd_and_hms(2025, 1, 8, 10, 0, 0)
        .single()
        .expect("valid timestamp");
    let mut run = RunSummary::new("sample", started);
    run.duration = Duration::from_secs(5);

    let mut premium = GroupSummary::new(GroupKey {
        group: "premium".into(),
        scheme: AuthScheme::HeaderV4,
        method: HttpMethod::Get,
    });
    premium.counts.success = 10;
    premium.latency_sum_ms = 120.0;
    premium.latency_samples = 10;
    premium.detected_group = Some("premium".into());
    premium.api_keys.insert(keys::PREMIUM.into());

    let mut basic = GroupSummary::new(GroupKey {
        group: "basic".into(),
        scheme: AuthScheme::HeaderV4,
        method: HttpMethod::Get,
    });
    basic.counts.success = 8;
    basic.counts.throttled = 2;
    basic.minute_hits = 2;
    basic.api_keys.insert(keys::BASIC.into());

    run.totals.merge(&premium.counts);
    run.totals.merge(&basic.counts);
    run.groups.insert("premium".into(), premium);
    run.groups.insert("basic".into(), basic);
    run.auth_methods.insert("sigv4".into(), 20);

    for i in 0..2 {
        run.throttle_events.push(ThrottleEvent {
            timestamp: started + chrono::Duration::seconds(i + 1),
            group: "basic".into(),
            method: HttpMethod::Get,
            access_key: keys::BASIC.into(),
            remaining: 0,
            reset_seconds: 30,
            window: ThrottleWindow::Minute,
        });
    }

    run
}
