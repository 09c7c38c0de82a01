//! Telemetry store using PostgreSQL, optionally with TimescaleDB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::{debug, info, warn};

use probe_common::{ProbeError, Result};

use crate::config::StoreConfig;
use crate::records::{ResultRecord, SummaryRecord, TelemetryRecord, ThrottleEventRecord};
use crate::schema::{self, RESULTS_TABLE, SCHEMA_SQL, SUMMARY_TABLE, TABLES, THROTTLE_EVENTS_TABLE, VIEWS_SQL};
use crate::sink::{TelemetrySink, WriteOutcome};

/// Database connection pool and telemetry operations.
pub struct TelemetryStore {
    pool: PgPool,
    config: StoreConfig,
}

impl TelemetryStore {
    /// Connect using the configured URL and pool size.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(|e| ProbeError::Database(format!("Connection failed: {}", e)))?;

        Ok(Self { pool, config })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables, indexes and views. Safe to run repeatedly.
    pub async fn provision(&self) -> Result<()> {
        for statement in schema::statements(SCHEMA_SQL) {
            self.execute(statement, "Migration failed").await?;
        }

        if self.config.timescale {
            self.provision_timescale().await?;
        }

        for statement in schema::statements(VIEWS_SQL) {
            self.execute(statement, "View creation failed").await?;
        }

        info!(timescale = self.config.timescale, "Telemetry schema provisioned");
        Ok(())
    }

    async fn provision_timescale(&self) -> Result<()> {
        self.execute(
            "CREATE EXTENSION IF NOT EXISTS timescaledb",
            "TimescaleDB extension unavailable",
        )
        .await?;

        for table in TABLES {
            sqlx::query(
                "SELECT create_hypertable($1::text::regclass, 'timestamp', \
                 if_not_exists => TRUE, migrate_data => TRUE)",
            )
            .bind(table)
            .execute(&self.pool)
            .await
            .map_err(|e| ProbeError::Database(format!("Hypertable failed: {}", e)))?;

            if let Some(interval) = self.config.retention.interval_for(table) {
                sqlx::query(
                    "SELECT add_retention_policy($1::text::regclass, $2::text::interval, \
                     if_not_exists => TRUE)",
                )
                .bind(table)
                .bind(&interval)
                .execute(&self.pool)
                .await
                .map_err(|e| ProbeError::Database(format!("Retention policy failed: {}", e)))?;

                debug!(table, interval = %interval, "Retention policy registered");
            }
        }

        Ok(())
    }

    /// Delete rows older than the retention policy. Returns rows removed.
    ///
    /// TimescaleDB runs its own retention jobs, so this is only needed on
    /// plain PostgreSQL.
    pub async fn enforce_retention(&self) -> Result<u64> {
        let mut removed = 0;

        for table in TABLES {
            let Some(interval) = self.config.retention.interval_for(table) else {
                continue;
            };

            let sql = match table {
                SUMMARY_TABLE => {
                    r#"DELETE FROM test_summary WHERE "timestamp" < NOW() - $1::text::interval"#
                }
                RESULTS_TABLE => {
                    r#"DELETE FROM test_results WHERE "timestamp" < NOW() - $1::text::interval"#
                }
                THROTTLE_EVENTS_TABLE => {
                    r#"DELETE FROM throttle_events WHERE "timestamp" < NOW() - $1::text::interval"#
                }
                _ => continue,
            };

            let result = sqlx::query(sql)
                .bind(&interval)
                .execute(&self.pool)
                .await
                .map_err(|e| ProbeError::Database(format!("Retention delete failed: {}", e)))?;

            if result.rows_affected() > 0 {
                info!(table, rows = result.rows_affected(), "Expired rows removed");
            }
            removed += result.rows_affected();
        }

        Ok(removed)
    }

    /// Per-group totals across all runs.
    pub async fn performance_overview(&self) -> Result<Vec<PerformanceRow>> {
        sqlx::query_as::<_, PerformanceRow>(
            "SELECT test_group, runs, total_requests, total_success, total_limited, \
             total_errors, avg_latency_ms, success_rate \
             FROM performance_overview ORDER BY test_group",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProbeError::Database(format!("Query failed: {}", e)))
    }

    /// Hourly rollups since the given time.
    pub async fn hourly_trends(&self, since: DateTime<Utc>) -> Result<Vec<HourlyTrendRow>> {
        sqlx::query_as::<_, HourlyTrendRow>(
            "SELECT hour, test_group, total_requests, total_success, total_limited, avg_latency_ms \
             FROM hourly_trends WHERE hour >= $1 ORDER BY hour DESC, test_group",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProbeError::Database(format!("Query failed: {}", e)))
    }

    /// Identities ranked by throttle rate, highest first.
    pub async fn rate_limit_ranking(&self, limit: i64) -> Result<Vec<RateLimitRankRow>> {
        sqlx::query_as::<_, RateLimitRankRow>(
            "SELECT api_key, test_group, total_requests, total_limited, burst_hits, \
             minute_hits, throttle_rate, throttle_rank \
             FROM rate_limit_analysis ORDER BY throttle_rank, api_key LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ProbeError::Database(format!("Query failed: {}", e)))
    }

    async fn execute(&self, sql: &str, context: &str) -> Result<()> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| ProbeError::Database(format!("{}: {}", context, e)))?;
        Ok(())
    }

    async fn insert_summary(&self, record: &SummaryRecord) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO test_summary (
                "timestamp", run_id, total_tests, duration_ns,
                total_requests, total_success, total_limited, total_errors,
                auth_methods, extension
            ) VALUES (
                $1, $2, $3, $4,
                $5, $6, $7, $8,
                $9::text::jsonb, $10::text::jsonb
            )
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(record.timestamp)
        .bind(record.run_id)
        .bind(record.total_tests)
        .bind(record.duration_ns)
        .bind(record.total_requests)
        .bind(record.total_success)
        .bind(record.total_limited)
        .bind(record.total_errors)
        .bind(json_text(&record.auth_methods))
        .bind(json_text(&record.extension))
        .execute(&self.pool)
        .await
        .map_err(|e| ProbeError::Database(format!("Insert failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn insert_result(&self, record: &ResultRecord) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO test_results (
                "timestamp", run_id, test_group, api_key, method,
                requests_sent, success, rate_limited, errors, avg_latency_ms,
                auth_scheme, detected_group, burst_hits, minute_hits,
                effective_limit, observed_bursts, success_rate,
                raw_data, extension
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9, $10,
                $11, $12, $13, $14,
                $15, $16, $17,
                $18::text::jsonb, $19::text::jsonb
            )
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(record.timestamp)
        .bind(record.run_id)
        .bind(&record.test_group)
        .bind(&record.api_key)
        .bind(&record.method)
        .bind(record.requests_sent)
        .bind(record.success)
        .bind(record.rate_limited)
        .bind(record.errors)
        .bind(record.avg_latency_ms)
        .bind(&record.auth_scheme)
        .bind(&record.detected_group)
        .bind(record.burst_hits)
        .bind(record.minute_hits)
        .bind(record.effective_limit)
        .bind(record.observed_bursts)
        .bind(record.success_rate)
        .bind(json_text(&record.raw_data))
        .bind(json_text(&record.extension))
        .execute(&self.pool)
        .await
        .map_err(|e| ProbeError::Database(format!("Insert failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn insert_throttle_event(&self, record: &ThrottleEventRecord) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO throttle_events (
                "timestamp", run_id, event_index, test_group, method,
                remaining_requests, reset_in_seconds, extension
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8::text::jsonb
            )
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(record.timestamp)
        .bind(record.run_id)
        .bind(record.event_index)
        .bind(&record.test_group)
        .bind(&record.method)
        .bind(record.remaining_requests)
        .bind(record.reset_in_seconds)
        .bind(json_text(&record.extension))
        .execute(&self.pool)
        .await
        .map_err(|e| ProbeError::Database(format!("Insert failed: {}", e)))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TelemetrySink for TelemetryStore {
    async fn write(&self, record: &TelemetryRecord) -> Result<WriteOutcome> {
        let rows = match record {
            TelemetryRecord::Summary(r) => self.insert_summary(r).await?,
            TelemetryRecord::Result(r) => self.insert_result(r).await?,
            TelemetryRecord::ThrottleEvent(r) => self.insert_throttle_event(r).await?,
        };

        if rows == 0 {
            debug!(record = %record.describe(), "Record already present");
            Ok(WriteOutcome::Duplicate)
        } else {
            Ok(WriteOutcome::Inserted)
        }
    }

    async fn provision(&self) -> Result<()> {
        TelemetryStore::provision(self).await
    }
}

fn json_text(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to encode JSON column, storing empty object");
        "{}".to_string()
    })
}

/// Row of the `performance_overview` view.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PerformanceRow {
    pub test_group: String,
    pub runs: i64,
    pub total_requests: i64,
    pub total_success: i64,
    pub total_limited: i64,
    pub total_errors: i64,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
}

/// Row of the `hourly_trends` view.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct HourlyTrendRow {
    pub hour: DateTime<Utc>,
    pub test_group: String,
    pub total_requests: i64,
    pub total_success: i64,
    pub total_limited: i64,
    pub avg_latency_ms: f64,
}

/// Row of the `rate_limit_analysis` view.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RateLimitRankRow {
    pub api_key: String,
    pub test_group: String,
    pub total_requests: i64,
    pub total_limited: i64,
    pub burst_hits: i64,
    pub minute_hits: i64,
    pub throttle_rate: f64,
    pub throttle_rank: i64,
}
