//! Synthetic request credentials for each supported auth scheme.
//!
//! The material is shaped so the gateway can recognise the scheme and the
//! access key. Signatures are SHA-256 digests of the request inputs, not
//! real AWS signatures.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use probe_common::{AuthScheme, HttpMethod, ProbeError, Result, TenantIdentity};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 3600;
/// Longest presign lifetime SigV4 accepts (7 days).
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 7 * 24 * 3600;

const SERVICE: &str = "s3";
const V4_ALGORITHM: &str = "AWS4-HMAC-SHA256";
const V4_SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Region and expiry used when building credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub region: String,
    pub presign_expiry_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            presign_expiry_secs: DEFAULT_PRESIGN_EXPIRY_SECS,
        }
    }
}

impl AuthSettings {
    pub fn validate(&self) -> Result<()> {
        if self.presign_expiry_secs == 0 || self.presign_expiry_secs > MAX_PRESIGN_EXPIRY_SECS {
            return Err(ProbeError::Configuration(format!(
                "presign_expiry_secs must be between 1 and {}, got {}",
                MAX_PRESIGN_EXPIRY_SECS, self.presign_expiry_secs
            )));
        }
        if self.region.trim().is_empty() {
            return Err(ProbeError::Configuration("region must not be empty".into()));
        }
        Ok(())
    }
}

/// Headers and query parameters to attach to one request.
///
/// Header schemes only fill `headers`, query schemes only fill `query`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
}

impl Credentials {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Builds credentials for a tenant and scheme.
#[derive(Debug, Clone, Default)]
pub struct AuthSimulator {
    settings: AuthSettings,
}

impl AuthSimulator {
    pub fn new(settings: AuthSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Credentials stamped with the current time.
    pub fn credentials(
        &self,
        tenant: &TenantIdentity,
        scheme: AuthScheme,
        method: HttpMethod,
        path: &str,
    ) -> Credentials {
        self.credentials_at(tenant, scheme, method, path, Utc::now())
    }

    /// Credentials for a fixed point in time. Same inputs, same output.
    pub fn credentials_at(
        &self,
        tenant: &TenantIdentity,
        scheme: AuthScheme,
        method: HttpMethod,
        path: &str,
        now: DateTime<Utc>,
    ) -> Credentials {
        let mut creds = Credentials::default();
        let access_key = tenant.access_key();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        match scheme {
            AuthScheme::HeaderV4 => {
                let signature = self.signature(tenant, scheme, method, path, &amz_date);
                let authorization = format!(
                    "{} Credential={}, SignedHeaders={}, Signature={}",
                    V4_ALGORITHM,
                    self.credential_scope(access_key, now),
                    V4_SIGNED_HEADERS,
                    signature
                );
                insert(&mut creds.headers, "Authorization", authorization);
                insert(&mut creds.headers, "X-Amz-Date", amz_date);
                insert(&mut creds.headers, "X-Amz-Content-Sha256", UNSIGNED_PAYLOAD);
            }
            AuthScheme::HeaderV2 => {
                let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
                let signature = self.signature(tenant, scheme, method, path, &date);
                insert(
                    &mut creds.headers,
                    "Authorization",
                    format!("AWS {}:{}", access_key, &signature[..40]),
                );
                insert(&mut creds.headers, "Date", date);
            }
            AuthScheme::PresignedQuery => {
                let signature = self.signature(tenant, scheme, method, path, &amz_date);
                insert(&mut creds.query, "X-Amz-Algorithm", V4_ALGORITHM);
                insert(
                    &mut creds.query,
                    "X-Amz-Credential",
                    self.credential_scope(access_key, now),
                );
                insert(&mut creds.query, "X-Amz-Date", amz_date);
                insert(
                    &mut creds.query,
                    "X-Amz-Expires",
                    self.settings.presign_expiry_secs.to_string(),
                );
                insert(&mut creds.query, "X-Amz-SignedHeaders", "host");
                insert(&mut creds.query, "X-Amz-Signature", signature);
            }
            AuthScheme::QueryV2 => {
                let expires = now
                    .checked_add_signed(self.expiry())
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
                    .timestamp()
                    .to_string();
                let signature = self.signature(tenant, scheme, method, path, &expires);
                insert(&mut creds.query, "AWSAccessKeyId", access_key);
                insert(&mut creds.query, "Expires", expires);
                insert(&mut creds.query, "Signature", &signature[..40]);
            }
            AuthScheme::CustomHeader => {
                insert(&mut creds.headers, "X-API-Key", access_key);
            }
        }

        creds
    }

    fn credential_scope(&self, access_key: &str, now: DateTime<Utc>) -> String {
        format!(
            "{}/{}/{}/{}/aws4_request",
            access_key,
            now.format("%Y%m%d"),
            self.settings.region,
            SERVICE
        )
    }

    fn expiry(&self) -> ChronoDuration {
        let secs = self.settings.presign_expiry_secs.min(MAX_PRESIGN_EXPIRY_SECS) as i64;
        ChronoDuration::try_seconds(secs).unwrap_or_else(ChronoDuration::zero)
    }

    /// 64 hex characters derived from everything that identifies the request.
    fn signature(
        &self,
        tenant: &TenantIdentity,
        scheme: AuthScheme,
        method: HttpMethod,
        path: &str,
        stamp: &str,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tenant.secret_key().unwrap_or_default().as_bytes());
        for part in [
            tenant.access_key(),
            scheme.as_str(),
            method.as_str(),
            path,
            stamp,
            self.settings.region.as_str(),
        ] {
            hasher.update(b"\n");
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

fn insert(map: &mut BTreeMap<String, String>, name: &str, value: impl Into<String>) {
    map.insert(name.to_string(), value.into());
}
