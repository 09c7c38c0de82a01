//! Telemetry storage for rate-limit probe results.
//!
//! Provides:
//! - The normalized record types written per run
//! - PostgreSQL/TimescaleDB schema, views and retention
//! - An in-memory sink for dry runs and tests

pub mod config;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod schema;
pub mod sink;

pub use config::{RetentionPolicy, StoreConfig};
pub use memory::MemorySink;
pub use postgres::{HourlyTrendRow, PerformanceRow, RateLimitRankRow, TelemetryStore};
pub use records::{ResultRecord, SummaryRecord, TelemetryRecord, ThrottleEventRecord};
pub use sink::{TelemetrySink, WriteOutcome};
