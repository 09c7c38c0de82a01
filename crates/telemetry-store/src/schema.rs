//! Table, index and view definitions.

pub const SUMMARY_TABLE: &str = "test_summary";
pub const RESULTS_TABLE: &str = "test_results";
pub const THROTTLE_EVENTS_TABLE: &str = "throttle_events";

/// Every table that carries a retention policy.
pub const TABLES: [&str; 3] = [SUMMARY_TABLE, RESULTS_TABLE, THROTTLE_EVENTS_TABLE];

/// Tables and unique indexes. Unique indexes include `timestamp` so they
/// remain valid on hypertables; rows without a run id never conflict.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS test_summary (
    "timestamp" TIMESTAMPTZ NOT NULL,
    run_id UUID,
    total_tests BIGINT NOT NULL DEFAULT 0,
    duration_ns BIGINT NOT NULL DEFAULT 0,
    total_requests BIGINT NOT NULL DEFAULT 0,
    total_success BIGINT NOT NULL DEFAULT 0,
    total_limited BIGINT NOT NULL DEFAULT 0,
    total_errors BIGINT NOT NULL DEFAULT 0,
    auth_methods JSONB NOT NULL DEFAULT '{}'::jsonb,
    extension JSONB NOT NULL DEFAULT '{}'::jsonb
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_test_summary_run
    ON test_summary (run_id, "timestamp");

CREATE TABLE IF NOT EXISTS test_results (
    "timestamp" TIMESTAMPTZ NOT NULL,
    run_id UUID,
    test_group VARCHAR(100) NOT NULL,
    api_key TEXT NOT NULL DEFAULT '',
    method VARCHAR(20) NOT NULL,
    requests_sent BIGINT NOT NULL DEFAULT 0,
    success BIGINT NOT NULL DEFAULT 0,
    rate_limited BIGINT NOT NULL DEFAULT 0,
    errors BIGINT NOT NULL DEFAULT 0,
    avg_latency_ms DOUBLE PRECISION NOT NULL DEFAULT 0,
    auth_scheme VARCHAR(50) NOT NULL DEFAULT '',
    detected_group VARCHAR(100) NOT NULL DEFAULT '',
    burst_hits BIGINT NOT NULL DEFAULT 0,
    minute_hits BIGINT NOT NULL DEFAULT 0,
    effective_limit BIGINT NOT NULL DEFAULT 0,
    observed_bursts BIGINT NOT NULL DEFAULT 0,
    success_rate DOUBLE PRECISION NOT NULL DEFAULT 0,
    raw_data JSONB NOT NULL DEFAULT '{}'::jsonb,
    extension JSONB NOT NULL DEFAULT '{}'::jsonb
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_test_results_run
    ON test_results (run_id, test_group, method, auth_scheme, "timestamp");

CREATE INDEX IF NOT EXISTS idx_test_results_group_time
    ON test_results (test_group, "timestamp" DESC);

CREATE TABLE IF NOT EXISTS throttle_events (
    "timestamp" TIMESTAMPTZ NOT NULL,
    run_id UUID,
    event_index INTEGER NOT NULL,
    test_group VARCHAR(100) NOT NULL,
    method VARCHAR(20) NOT NULL,
    remaining_requests BIGINT NOT NULL DEFAULT 0,
    reset_in_seconds BIGINT NOT NULL DEFAULT 0,
    extension JSONB NOT NULL DEFAULT '{}'::jsonb
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_throttle_events_run
    ON throttle_events (run_id, test_group, event_index, "timestamp");

CREATE INDEX IF NOT EXISTS idx_throttle_events_group_time
    ON throttle_events (test_group, "timestamp" DESC)
"#;

/// Derived views over `test_results`.
pub const VIEWS_SQL: &str = r#"
CREATE OR REPLACE VIEW performance_overview AS
SELECT
    test_group,
    COUNT(DISTINCT run_id)::BIGINT AS runs,
    SUM(requests_sent)::BIGINT AS total_requests,
    SUM(success)::BIGINT AS total_success,
    SUM(rate_limited)::BIGINT AS total_limited,
    SUM(errors)::BIGINT AS total_errors,
    AVG(avg_latency_ms)::DOUBLE PRECISION AS avg_latency_ms,
    CASE WHEN SUM(requests_sent) > 0
        THEN SUM(success)::DOUBLE PRECISION * 100 / SUM(requests_sent)
        ELSE 0::DOUBLE PRECISION
    END AS success_rate
FROM test_results
GROUP BY test_group;

CREATE OR REPLACE VIEW hourly_trends AS
SELECT
    date_trunc('hour', "timestamp") AS hour,
    test_group,
    SUM(requests_sent)::BIGINT AS total_requests,
    SUM(success)::BIGINT AS total_success,
    SUM(rate_limited)::BIGINT AS total_limited,
    AVG(avg_latency_ms)::DOUBLE PRECISION AS avg_latency_ms
FROM test_results
GROUP BY 1, 2;

CREATE OR REPLACE VIEW rate_limit_analysis AS
SELECT
    api_key,
    test_group,
    SUM(requests_sent)::BIGINT AS total_requests,
    SUM(rate_limited)::BIGINT AS total_limited,
    SUM(burst_hits)::BIGINT AS burst_hits,
    SUM(minute_hits)::BIGINT AS minute_hits,
    CASE WHEN SUM(requests_sent) > 0
        THEN SUM(rate_limited)::DOUBLE PRECISION * 100 / SUM(requests_sent)
        ELSE 0::DOUBLE PRECISION
    END AS throttle_rate,
    RANK() OVER (
        ORDER BY SUM(rate_limited)::DOUBLE PRECISION / NULLIF(SUM(requests_sent), 0) DESC NULLS LAST
    )::BIGINT AS throttle_rank
FROM test_results
GROUP BY api_key, test_group
"#;

/// Split a SQL script into individual statements.
pub fn statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statement_count() {
        // 3 tables, 3 unique indexes, 2 secondary indexes
        assert_eq!(statements(SCHEMA_SQL).count(), 8);
        assert_eq!(statements(VIEWS_SQL).count(), 3);
    }

    #[test]
    fn test_every_table_is_created() {
        for table in TABLES {
            let create = format!("CREATE TABLE IF NOT EXISTS {} (", table);
            assert!(SCHEMA_SQL.contains(&create), "missing {}", table);
        }
    }

    #[test]
    fn test_unique_indexes_include_timestamp() {
        for stmt in statements(SCHEMA_SQL).filter(|s| s.starts_with("CREATE UNIQUE INDEX")) {
            assert!(stmt.contains("run_id"), "{}", stmt);
            assert!(stmt.contains("\"timestamp\")"), "{}", stmt);
        }
    }

    #[test]
    fn test_views_are_defined() {
        for view in ["performance_overview", "hourly_trends", "rate_limit_analysis"] {
            assert!(VIEWS_SQL.contains(&format!("CREATE OR REPLACE VIEW {} AS", view)));
        }
    }
}
