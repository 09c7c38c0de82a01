//! Authentication schemes and HTTP methods used by probe requests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProbeError;

/// How credentials are attached to a probe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    /// AWS Signature V4 in the `Authorization` header
    HeaderV4,
    /// AWS Signature V2 in the `Authorization` header
    HeaderV2,
    /// Presigned URL (V4 query parameters)
    PresignedQuery,
    /// V2 query-string authentication
    QueryV2,
    /// Plain `X-API-Key` header
    CustomHeader,
}

impl AuthScheme {
    pub const ALL: [AuthScheme; 5] = [
        AuthScheme::HeaderV4,
        AuthScheme::HeaderV2,
        AuthScheme::PresignedQuery,
        AuthScheme::QueryV2,
        AuthScheme::CustomHeader,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::HeaderV4 => "header-v4",
            AuthScheme::HeaderV2 => "header-v2",
            AuthScheme::PresignedQuery => "presigned-query",
            AuthScheme::QueryV2 => "query-v2",
            AuthScheme::CustomHeader => "custom-header",
        }
    }

    /// Whether credentials travel in the query string rather than headers.
    pub fn is_query_based(&self) -> bool {
        matches!(self, AuthScheme::PresignedQuery | AuthScheme::QueryV2)
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthScheme {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "header-v4" | "v4" => Ok(AuthScheme::HeaderV4),
            "header-v2" | "v2" => Ok(AuthScheme::HeaderV2),
            "presigned-query" | "presigned" => Ok(AuthScheme::PresignedQuery),
            "query-v2" | "query_v2" => Ok(AuthScheme::QueryV2),
            "custom-header" | "custom" => Ok(AuthScheme::CustomHeader),
            other => Err(ProbeError::UnknownScheme(other.to_string())),
        }
    }
}

/// HTTP methods a probe may use against the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }

    /// Status the object store returns when this method succeeds.
    pub fn success_status(&self) -> u16 {
        match self {
            HttpMethod::Delete => 204,
            _ => 200,
        }
    }

    /// Whether the request carries a body.
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Put | HttpMethod::Post)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "PUT" => Ok(HttpMethod::Put),
            "POST" => Ok(HttpMethod::Post),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            other => Err(ProbeError::UnknownMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_aliases() {
        assert_eq!("v4".parse::<AuthScheme>().unwrap(), AuthScheme::HeaderV4);
        assert_eq!("query_v2".parse::<AuthScheme>().unwrap(), AuthScheme::QueryV2);
        assert_eq!(
            "Presigned-Query".parse::<AuthScheme>().unwrap(),
            AuthScheme::PresignedQuery
        );
        assert_eq!("custom".parse::<AuthScheme>().unwrap(), AuthScheme::CustomHeader);
    }

    #[test]
    fn test_unknown_scheme_fails_fast() {
        let err = "header-v5".parse::<AuthScheme>().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_scheme_display_round_trips_through_parse() {
        for scheme in AuthScheme::ALL {
            assert_eq!(scheme.as_str().parse::<AuthScheme>().unwrap(), scheme);
        }
    }

    #[test]
    fn test_query_based() {
        assert!(AuthScheme::PresignedQuery.is_query_based());
        assert!(AuthScheme::QueryV2.is_query_based());
        assert!(!AuthScheme::HeaderV4.is_query_based());
        assert!(!AuthScheme::CustomHeader.is_query_based());
    }

    #[test]
    fn test_method_success_status() {
        assert_eq!(HttpMethod::Get.success_status(), 200);
        assert_eq!(HttpMethod::Put.success_status(), 200);
        assert_eq!(HttpMethod::Delete.success_status(), 204);
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("put".parse::<HttpMethod>().unwrap(), HttpMethod::Put);
        assert!("PATCH".parse::<HttpMethod>().is_err());
    }
}
