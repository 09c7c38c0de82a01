//! Tenant identities and the tiers they are expected to belong to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ProbeError, Result};

/// Policy bucket a tenant is expected to be assigned to by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Premium,
    Standard,
    Basic,
    Unknown,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Premium, Tier::Standard, Tier::Basic, Tier::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Premium => "premium",
            Tier::Standard => "standard",
            Tier::Basic => "basic",
            Tier::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ProbeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "premium" => Ok(Tier::Premium),
            "standard" => Ok(Tier::Standard),
            "basic" => Ok(Tier::Basic),
            "unknown" => Ok(Tier::Unknown),
            other => Err(ProbeError::UnknownTier(other.to_string())),
        }
    }
}

/// A simulated credential representing one caller of the gateway.
///
/// Identities are immutable once created; there are no setters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantIdentity {
    access_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret_key: Option<String>,
    #[serde(rename = "group")]
    tier: Tier,
}

impl TenantIdentity {
    /// Create an identity, rejecting an empty access key.
    pub fn new(access_key: impl Into<String>, tier: Tier) -> Result<Self> {
        let access_key = access_key.into();
        if access_key.trim().is_empty() {
            return Err(ProbeError::Configuration(
                "tenant access key must not be empty".to_string(),
            ));
        }
        Ok(Self {
            access_key,
            secret_key: None,
            tier,
        })
    }

    /// Create an identity that also carries a secret key.
    pub fn with_secret(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        tier: Tier,
    ) -> Result<Self> {
        let mut identity = Self::new(access_key, tier)?;
        identity.secret_key = Some(secret_key.into());
        Ok(identity)
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Group name used to attribute results for this tenant.
    pub fn group(&self) -> &'static str {
        self.tier.as_str()
    }

    /// First eight characters of the access key, used in object names.
    pub fn short_key(&self) -> &str {
        let end = self
            .access_key
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.access_key.len());
        &self.access_key[..end]
    }
}

impl fmt::Display for TenantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.access_key, self.tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_case_insensitive() {
        assert_eq!("Premium".parse::<Tier>().unwrap(), Tier::Premium);
        assert_eq!(" basic ".parse::<Tier>().unwrap(), Tier::Basic);
        assert!(matches!(
            "gold".parse::<Tier>(),
            Err(ProbeError::UnknownTier(_))
        ));
    }

    #[test]
    fn test_identity_rejects_empty_key() {
        assert!(TenantIdentity::new("  ", Tier::Basic).is_err());
    }

    #[test]
    fn test_short_key() {
        let id = TenantIdentity::new("5HQZO7EDOM4XBNO642GQ", Tier::Premium).unwrap();
        assert_eq!(id.short_key(), "5HQZO7ED");

        let short = TenantIdentity::new("abc", Tier::Basic).unwrap();
        assert_eq!(short.short_key(), "abc");
    }

    #[test]
    fn test_identity_deserializes_service_account_shape() {
        let json = r#"{"access_key": "AK1", "secret_key": "SK1", "group": "standard"}"#;
        let id: TenantIdentity = serde_json::from_str(json).unwrap();
        assert_eq!(id.access_key(), "AK1");
        assert_eq!(id.secret_key(), Some("SK1"));
        assert_eq!(id.tier(), Tier::Standard);
        assert_eq!(id.group(), "standard");
    }
}
