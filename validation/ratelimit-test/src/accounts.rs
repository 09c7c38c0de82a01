//! Service-account registry loaded from `service_accounts.json`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use probe_common::{ProbeError, Result, TenantIdentity, Tier};

#[derive(Debug, Deserialize)]
struct AccountsFile {
    service_accounts: Vec<ServiceAccount>,
}

/// One entry of the accounts file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub access_key: String,
    #[serde(default)]
    pub secret_key: Option<String>,
    pub group: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl ServiceAccount {
    fn into_identity(self) -> Result<TenantIdentity> {
        let tier: Tier = self.group.parse()?;
        match self.secret_key {
            Some(secret) => TenantIdentity::with_secret(self.access_key, secret, tier),
            None => TenantIdentity::new(self.access_key, tier),
        }
    }
}

/// Known tenants, in file order.
#[derive(Debug, Clone, Default)]
pub struct TenantRegistry {
    tenants: Vec<TenantIdentity>,
}

impl TenantRegistry {
    pub fn new(tenants: Vec<TenantIdentity>) -> Self {
        Self { tenants }
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProbeError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: AccountsFile = serde_json::from_str(content)
            .map_err(|e| ProbeError::Configuration(format!("Invalid accounts file: {}", e)))?;

        let tenants = file
            .service_accounts
            .into_iter()
            .map(ServiceAccount::into_identity)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tenants })
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub fn tenants(&self) -> &[TenantIdentity] {
        &self.tenants
    }

    /// Find a tenant by access key.
    pub fn lookup(&self, access_key: &str) -> Result<&TenantIdentity> {
        self.tenants
            .iter()
            .find(|t| t.access_key() == access_key)
            .ok_or_else(|| ProbeError::UnknownTenant(access_key.to_string()))
    }

    pub fn by_tier(&self, tier: Tier) -> impl Iterator<Item = &TenantIdentity> {
        self.tenants.iter().filter(move |t| t.tier() == tier)
    }

    /// Up to `per_tier` tenants of each tier. With `stress_premium`, premium
    /// gets twice as many.
    pub fn select(&self, per_tier: usize, stress_premium: bool) -> Vec<TenantIdentity> {
        Tier::ALL
            .into_iter()
            .flat_map(|tier| {
                let take = if stress_premium && tier == Tier::Premium {
                    per_tier.saturating_mul(2)
                } else {
                    per_tier
                };
                self.by_tier(tier).take(take).cloned().collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn counts_by_tier(&self) -> BTreeMap<Tier, usize> {
        let mut counts = BTreeMap::new();
        for tenant in &self.tenants {
            *counts.entry(tenant.tier()).or_insert(0) += 1;
        }
        counts
    }
}
