//! Error types for the rate-limit probe pipeline.

use thiserror::Error;

/// Result type alias using ProbeError.
pub type Result<T, E = ProbeError> = std::result::Result<T, E>;

/// Primary error type shared by the probe, storage and ingestion crates.
#[derive(Debug, Error)]
pub enum ProbeError {
    // === Configuration Errors ===
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unknown auth scheme: {0}")]
    UnknownScheme(String),

    #[error("Unknown HTTP method: {0}")]
    UnknownMethod(String),

    #[error("Unknown tenant identity: {0}")]
    UnknownTenant(String),

    #[error("Unknown tier label: {0}")]
    UnknownTier(String),

    #[error("Rate must be > 0 requests/second, got {0}")]
    InvalidRate(u32),

    // === Runtime Errors ===
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid export document: {0}")]
    ExportFormat(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProbeError {
    /// Whether this error belongs to the fatal configuration class.
    ///
    /// Configuration errors abort before any request is issued; everything
    /// else is either recorded per request or handled best-effort.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProbeError::Configuration(_)
                | ProbeError::UnknownScheme(_)
                | ProbeError::UnknownMethod(_)
                | ProbeError::UnknownTenant(_)
                | ProbeError::UnknownTier(_)
                | ProbeError::InvalidRate(_)
        )
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        ProbeError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        ProbeError::ExportFormat(err.to_string())
    }
}
