//! Run configuration and YAML scenario loading.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use probe_common::{
    AuthScheme, HttpMethod, ProbeError, ProbeTarget, Result, TenantIdentity, Tier,
};

use crate::accounts::TenantRegistry;
use crate::auth::AuthSettings;

pub const DEFAULT_RATE: u32 = 10;
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;
pub const DEFAULT_BUCKET: &str = "test-bucket";
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 3600);
pub const MAX_WAIT: Duration = Duration::from_secs(3600);

/// How request paths are generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathPattern {
    /// Every request hits the same path
    Fixed { path: String },
    /// `/<bucket>/<prefix>-<key8>-<seq>.txt`
    Sequential {
        #[serde(default = "default_bucket")]
        bucket: String,
        #[serde(default = "default_prefix")]
        prefix: String,
    },
    /// One of `objects` keys in the bucket, picked at random
    Random {
        #[serde(default = "default_bucket")]
        bucket: String,
        #[serde(default = "default_objects")]
        objects: u32,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl Default for PathPattern {
    fn default() -> Self {
        PathPattern::Sequential {
            bucket: default_bucket(),
            prefix: default_prefix(),
        }
    }
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

fn default_prefix() -> String {
    "ratelimit".to_string()
}

fn default_objects() -> u32 {
    100
}

/// Statuses treated as throttling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub throttle_statuses: BTreeSet<u16>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            throttle_statuses: BTreeSet::from([429]),
        }
    }
}

impl ClassifierConfig {
    pub fn is_throttle(&self, status: u16) -> bool {
        self.throttle_statuses.contains(&status)
    }
}

/// Everything one engine needs for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub label: String,
    pub base_url: String,
    pub targets: Vec<ProbeTarget>,
    /// Requests started per one-second window
    pub rate: u32,
    pub duration: Option<Duration>,
    pub max_requests: Option<u64>,
    pub workers: usize,
    pub timeout: Duration,
    pub grace_period: Duration,
    pub paths: PathPattern,
    pub auth: AuthSettings,
    pub classifier: ClassifierConfig,
}

impl RunConfig {
    pub fn new(label: impl Into<String>, base_url: impl Into<String>, targets: Vec<ProbeTarget>) -> Self {
        Self {
            label: label.into(),
            base_url: base_url.into(),
            targets,
            rate: DEFAULT_RATE,
            duration: None,
            max_requests: None,
            workers: DEFAULT_WORKERS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            paths: PathPattern::default(),
            auth: AuthSettings::default(),
            classifier: ClassifierConfig::default(),
        }
    }

    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_max_requests(mut self, max_requests: u64) -> Self {
        self.max_requests = Some(max_requests);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_paths(mut self, paths: PathPattern) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_auth(mut self, auth: AuthSettings) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.classifier = classifier;
        self
    }

    /// Reject configurations that cannot run. Nothing is sent before this passes.
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(ProbeError::InvalidRate(self.rate));
        }
        if self.targets.is_empty() {
            return Err(config_error(format!("run '{}' has no targets", self.label)));
        }
        if self.workers == 0 {
            return Err(config_error("workers must be > 0"));
        }
        if self.timeout.is_zero() || self.timeout > MAX_WAIT {
            return Err(config_error(format!(
                "timeout must be between 1ms and {}s",
                MAX_WAIT.as_secs()
            )));
        }
        if self.grace_period > MAX_WAIT {
            return Err(config_error(format!(
                "grace period must be at most {}s",
                MAX_WAIT.as_secs()
            )));
        }
        match (self.duration, self.max_requests) {
            (None, None) => {
                return Err(config_error(format!(
                    "run '{}' needs a duration or a request budget",
                    self.label
                )))
            }
            (Some(d), _) if d.is_zero() => return Err(config_error("duration must be > 0")),
            (Some(d), _) if d > MAX_DURATION => {
                return Err(config_error(format!(
                    "duration must be at most {}s",
                    MAX_DURATION.as_secs()
                )))
            }
            (_, Some(0)) => return Err(config_error("max_requests must be > 0")),
            _ => {}
        }

        self.auth.validate()?;

        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| config_error(format!("invalid base URL '{}': {}", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(config_error(format!(
                "base URL must be http or https, got '{}'",
                url.scheme()
            )));
        }

        let mut seen: BTreeMap<&str, (AuthScheme, HttpMethod)> = BTreeMap::new();
        for target in &self.targets {
            let combo = (target.scheme, target.method);
            if let Some(existing) = seen.insert(target.group(), combo) {
                if existing != combo {
                    return Err(config_error(format!(
                        "group '{}' is probed with both {} {} and {} {}",
                        target.group(),
                        existing.0,
                        existing.1,
                        combo.0,
                        combo.1
                    )));
                }
            }
        }

        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> ProbeError {
    ProbeError::Configuration(message.into())
}

/// A target as written in a scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub access_key: String,
    /// Tier label; looked up in the accounts file when absent
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_scheme() -> String {
    AuthScheme::HeaderV4.as_str().to_string()
}

fn default_method() -> String {
    HttpMethod::Get.as_str().to_string()
}

impl TargetSpec {
    /// Resolve into a probe target. Unknown scheme or method names fail here.
    pub fn resolve(&self, registry: Option<&TenantRegistry>) -> Result<ProbeTarget> {
        let scheme: AuthScheme = self.scheme.parse()?;
        let method: HttpMethod = self.method.parse()?;

        let tenant = match &self.group {
            Some(group) => {
                let tier: Tier = group.parse()?;
                match &self.secret_key {
                    Some(secret) => TenantIdentity::with_secret(&self.access_key, secret, tier)?,
                    None => TenantIdentity::new(&self.access_key, tier)?,
                }
            }
            None => registry
                .ok_or_else(|| ProbeError::UnknownTenant(self.access_key.clone()))?
                .lookup(&self.access_key)?
                .clone(),
        };

        Ok(ProbeTarget::new(tenant, scheme, method))
    }
}

/// One run inside a scenario. Unset fields inherit from the scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub label: String,
    pub targets: Vec<TargetSpec>,
    #[serde(default)]
    pub rate: Option<u32>,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub max_requests: Option<u64>,
}

/// Scenario file: one or more runs executed concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub base_url: String,
    #[serde(default = "default_rate")]
    pub rate: u32,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub max_requests: Option<u64>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default)]
    pub accounts_file: Option<PathBuf>,
    #[serde(default)]
    pub paths: PathPattern,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default = "default_throttle_statuses")]
    pub throttle_statuses: BTreeSet<u16>,
    pub runs: Vec<RunSpec>,
}

fn default_rate() -> u32 {
    DEFAULT_RATE
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_grace_period_secs() -> u64 {
    DEFAULT_GRACE_PERIOD_SECS
}

fn default_throttle_statuses() -> BTreeSet<u16> {
    ClassifierConfig::default().throttle_statuses
}

impl ScenarioConfig {
    /// Load configuration from YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| config_error(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| config_error(format!("Invalid scenario: {}", e)))
    }

    /// Validate configuration, resolving every target.
    pub fn validate(&self, registry: Option<&TenantRegistry>) -> Result<()> {
        self.run_configs(registry).map(|_| ())
    }

    /// Build one validated `RunConfig` per run.
    pub fn run_configs(&self, registry: Option<&TenantRegistry>) -> Result<Vec<RunConfig>> {
        if self.runs.is_empty() {
            return Err(config_error(format!("scenario '{}' has no runs", self.name)));
        }

        let mut labels = BTreeSet::new();
        let mut configs = Vec::with_capacity(self.runs.len());
        for run in &self.runs {
            if !labels.insert(run.label.as_str()) {
                return Err(config_error(format!("duplicate run label '{}'", run.label)));
            }

            let targets = run
                .targets
                .iter()
                .map(|t| t.resolve(registry))
                .collect::<Result<Vec<_>>>()?;

            let mut config = RunConfig::new(&run.label, &self.base_url, targets)
                .with_rate(run.rate.unwrap_or(self.rate))
                .with_workers(self.workers)
                .with_timeout(Duration::from_secs(self.timeout_secs))
                .with_grace_period(Duration::from_secs(self.grace_period_secs))
                .with_paths(self.paths.clone())
                .with_auth(self.auth.clone())
                .with_classifier(ClassifierConfig {
                    throttle_statuses: self.throttle_statuses.clone(),
                });
            config.duration = run
                .duration_secs
                .or(self.duration_secs)
                .map(Duration::from_secs);
            config.max_requests = run.max_requests.or(self.max_requests);

            config.validate()?;
            configs.push(config);
        }

        Ok(configs)
    }
}
