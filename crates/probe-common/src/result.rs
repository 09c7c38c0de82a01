//! Outcome of a single probe request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::headers::RateLimitHeaders;
use crate::scheme::{AuthScheme, HttpMethod};
use crate::tenant::TenantIdentity;

/// Coarse category of a request that never produced an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportErrorKind {
    Timeout,
    ConnectionRefused,
    Dns,
    Other,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::ConnectionRefused => "connection-refused",
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Other => "other",
        }
    }

    /// Categorize a transport error by its description.
    pub fn categorize(message: &str) -> Self {
        let message = message.to_ascii_lowercase();
        if message.contains("timed out") || message.contains("timeout") {
            TransportErrorKind::Timeout
        } else if message.contains("connection refused") {
            TransportErrorKind::ConnectionRefused
        } else if message.contains("dns")
            || message.contains("failed to lookup")
            || message.contains("name or service not known")
            || message.contains("no such host")
        {
            TransportErrorKind::Dns
        } else {
            TransportErrorKind::Other
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What came back for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Http {
        status: u16,
        headers: RateLimitHeaders,
    },
    Transport {
        error: String,
        kind: TransportErrorKind,
    },
}

impl ProbeOutcome {
    pub fn status(&self) -> Option<u16> {
        match self {
            ProbeOutcome::Http { status, .. } => Some(*status),
            ProbeOutcome::Transport { .. } => None,
        }
    }

    pub fn headers(&self) -> Option<&RateLimitHeaders> {
        match self {
            ProbeOutcome::Http { headers, .. } => Some(headers),
            ProbeOutcome::Transport { .. } => None,
        }
    }
}

/// A completed probe, moved by value from a worker to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub tenant: TenantIdentity,
    pub scheme: AuthScheme,
    pub method: HttpMethod,
    pub sequence: u64,
    pub outcome: ProbeOutcome,
    pub latency: Duration,
    pub completed_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn group(&self) -> &'static str {
        self.tenant.group()
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}
