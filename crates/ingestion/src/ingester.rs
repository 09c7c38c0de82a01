//! Best-effort writer from export documents to a telemetry sink.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use probe_common::{ExportDocument, ExportFile, RunSummary};
use telemetry_store::{TelemetryRecord, TelemetrySink, WriteOutcome};

use crate::error::{IngestionError, Result};
use crate::project::{project_document, ProjectionContext};

/// Options for ingestion operations.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Override the run id recorded in the document
    pub run_id: Option<Uuid>,
    /// Override the record timestamp (defaults to the export time)
    pub timestamp: Option<DateTime<Utc>>,
    /// Stop at the first failed write instead of skipping it
    pub strict: bool,
}

/// A record that could not be written.
#[derive(Debug, Clone)]
pub struct SkippedRecord {
    pub record: String,
    pub error: String,
}

/// Result of an ingestion operation.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Number of documents processed
    pub documents: usize,
    /// Records newly written
    pub inserted: usize,
    /// Records already present from an earlier ingestion
    pub duplicates: usize,
    /// Records that failed to write
    pub skipped: Vec<SkippedRecord>,
}

impl IngestReport {
    /// Records accepted by the sink, new or already present.
    pub fn written(&self) -> usize {
        self.inserted + self.duplicates
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    fn merge(&mut self, other: IngestReport) {
        self.documents += other.documents;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.skipped.extend(other.skipped);
    }
}

/// Writes run summaries and export files into a telemetry sink.
///
/// A failed write is logged and recorded in the report; it never rolls back
/// records that were already written.
pub struct Ingester {
    sink: Arc<dyn TelemetrySink>,
}

impl Ingester {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self { sink }
    }

    /// Create the schema in the underlying sink.
    pub async fn provision(&self) -> Result<()> {
        self.sink.provision().await?;
        Ok(())
    }

    /// Ingest an export file containing one document or a batch.
    pub async fn ingest_file(
        &self,
        path: impl AsRef<Path>,
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let file = ExportFile::from_json(&content)
            .map_err(|e| IngestionError::Parse(format!("{}: {}", path.display(), e)))?;

        let documents = file.into_documents();
        info!(
            file = %path.display(),
            documents = documents.len(),
            "Ingesting export file"
        );

        self.ingest_documents(&documents, options).await
    }

    /// Ingest several documents in order.
    pub async fn ingest_documents(
        &self,
        documents: &[ExportDocument],
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for doc in documents {
            report.merge(self.ingest_document(doc, options).await?);
        }
        Ok(report)
    }

    /// Ingest a run summary produced in this process.
    ///
    /// Records are stamped with the run's start time unless overridden, so
    /// ingesting the same run twice deduplicates.
    pub async fn ingest_run(&self, run: &RunSummary, options: &IngestOptions) -> Result<IngestReport> {
        let doc = ExportDocument::from_run(run);
        let options = IngestOptions {
            timestamp: options.timestamp.or(Some(run.started_at)),
            ..options.clone()
        };
        self.ingest_document(&doc, &options).await
    }

    /// Ingest a single document.
    pub async fn ingest_document(
        &self,
        doc: &ExportDocument,
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        let ctx = ProjectionContext::resolve(doc, options.run_id, options.timestamp);
        if ctx.run_id.is_none() {
            debug!("Document has no run id, re-ingesting it will duplicate rows");
        }

        let records = project_document(doc, ctx)?;
        let mut report = IngestReport {
            documents: 1,
            ..IngestReport::default()
        };

        for record in &records {
            self.write_record(record, options, &mut report).await?;
        }

        info!(
            run_id = ?ctx.run_id,
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped.len(),
            "Document ingested"
        );

        Ok(report)
    }

    async fn write_record(
        &self,
        record: &TelemetryRecord,
        options: &IngestOptions,
        report: &mut IngestReport,
    ) -> Result<()> {
        match self.sink.write(record).await {
            Ok(WriteOutcome::Inserted) => report.inserted += 1,
            Ok(WriteOutcome::Duplicate) => report.duplicates += 1,
            Err(e) if options.strict => {
                return Err(IngestionError::Write {
                    record: record.describe(),
                    message: e.to_string(),
                });
            }
            Err(e) => {
                warn!(record = %record.describe(), error = %e, "Write failed, skipping record");
                report.skipped.push(SkippedRecord {
                    record: record.describe(),
                    error: e.to_string(),
                });
            }
        }
        Ok(())
    }
}
