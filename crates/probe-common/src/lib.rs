//! Shared types for the rate-limit probe pipeline.
//!
//! This crate holds the data model exchanged between the probe engine, the
//! aggregator and ingestion: tenant identities, auth schemes, the typed
//! rate-limit header registry, per-request results, run summaries and the
//! JSON export document.

pub mod error;
pub mod export;
pub mod headers;
pub mod request;
pub mod result;
pub mod scheme;
pub mod summary;
pub mod tenant;

pub use error::{ProbeError, Result};
pub use export::{ExportDocument, ExportFile};
pub use headers::{RateLimitHeader, RateLimitHeaders};
pub use request::{ProbeRequest, ProbeTarget};
pub use result::{ProbeOutcome, ProbeResult, TransportErrorKind};
pub use scheme::{AuthScheme, HttpMethod};
pub use summary::{
    Bucket, ErrorExample, GroupKey, GroupSummary, OutcomeCounts, RunSummary, ThrottleEvent,
    ThrottleWindow,
};
pub use tenant::{TenantIdentity, Tier};
