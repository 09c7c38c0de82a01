//! Error types for the ingestion crate.

use thiserror::Error;

use probe_common::ProbeError;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse export document: {0}")]
    Parse(String),

    #[error("Store error: {0}")]
    Store(#[from] ProbeError),

    #[error("Failed to write {record}: {message}")]
    Write { record: String, message: String },
}

impl From<serde_json::Error> for IngestionError {
    fn from(err: serde_json::Error) -> Self {
        IngestionError::Parse(err.to_string())
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
