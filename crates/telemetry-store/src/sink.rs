//! Write interface shared by the database store and the in-memory sink.

use async_trait::async_trait;

use probe_common::Result;

use crate::records::TelemetryRecord;

/// Result of writing one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    /// The record was already present (same run id and key)
    Duplicate,
}

/// Destination for normalized telemetry records.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Write one record.
    async fn write(&self, record: &TelemetryRecord) -> Result<WriteOutcome>;

    /// Create tables and views. A no-op for sinks without a schema.
    async fn provision(&self) -> Result<()> {
        Ok(())
    }
}
