//! Probe targets and per-attempt requests.

use serde::{Deserialize, Serialize};

use crate::scheme::{AuthScheme, HttpMethod};
use crate::tenant::TenantIdentity;

/// One (tenant, scheme, method) combination a run cycles through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTarget {
    pub tenant: TenantIdentity,
    pub scheme: AuthScheme,
    pub method: HttpMethod,
}

impl ProbeTarget {
    pub fn new(tenant: TenantIdentity, scheme: AuthScheme, method: HttpMethod) -> Self {
        Self {
            tenant,
            scheme,
            method,
        }
    }

    /// Group name results from this target are attributed to.
    pub fn group(&self) -> &'static str {
        self.tenant.group()
    }
}

/// A single attempt, built right before dispatch.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub base_url: String,
    pub method: HttpMethod,
    pub tenant: TenantIdentity,
    pub scheme: AuthScheme,
    pub path: String,
    pub sequence: u64,
}

impl ProbeRequest {
    pub fn new(base_url: &str, target: &ProbeTarget, path: String, sequence: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            method: target.method,
            tenant: target.tenant.clone(),
            scheme: target.scheme,
            path,
            sequence,
        }
    }

    /// Full URL without query parameters.
    pub fn url(&self) -> String {
        if self.path.starts_with('/') {
            format!("{}{}", self.base_url, self.path)
        } else {
            format!("{}/{}", self.base_url, self.path)
        }
    }
}
