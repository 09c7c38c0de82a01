//! Telemetry ingestion library.
//!
//! Reads run exports (a single document or a batch), projects each onto the
//! normalized summary, result and throttle-event records, and writes them to
//! a telemetry sink. Writes are best-effort: a failed record is reported and
//! ingestion moves on.

pub mod error;
mod ingester;
pub mod project;

// Re-exports
pub use error::{IngestionError, Result};
pub use ingester::{IngestOptions, IngestReport, Ingester, SkippedRecord};
pub use project::{project_document, ProjectionContext};
