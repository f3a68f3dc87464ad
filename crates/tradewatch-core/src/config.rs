//! Engine configuration.
//!
//! [`EngineConfig::default`] carries per-source defaults. A JSON file may
//! override any subset of them, and credentials are read from the environment:
//!
//! | Source | Primary env var | Fallback env var |
//! |--------|-----------------|------------------|
//! | Census | `TRADEWATCH_CENSUS_API_KEY` | `CENSUS_API_KEY` |
//! | DataWeb | `TRADEWATCH_DATAWEB_API_KEY` | `DATAWEB_TOKEN` |
//! | Federal Register | (no key required) | - |
//! | BEA | `TRADEWATCH_BEA_API_KEY` | `BEA_API_KEY` |
//! | GNews | `TRADEWATCH_GNEWS_API_KEY` | `GNEWS_API_KEY` |
//!
//! Durations are written as integer milliseconds in `*_ms` fields:
//!
//! ```json
//! {
//!   "default_deadline_ms": 20000,
//!   "circuit": { "failure_threshold": 5, "open_timeout_ms": 60000 },
//!   "sources": {
//!     "gnews": { "enabled": false },
//!     "bea": { "rate_limit": { "limit": 100, "window_ms": 60000, "on_reject": "wait" } }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{CircuitBreakerConfig, CoreError, RateLimitQuota, RetryPolicy, SourceId};

/// Serde adapter for `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// API credential. Never printed or serialized in clear text.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl Serialize for Credential {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("***")
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL for sources that do not set their own.
    #[serde(rename = "default_ttl_ms", with = "duration_ms")]
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300),
        }
    }
}

/// Settings for one upstream source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceConfig {
    pub enabled: bool,
    pub base_url: String,
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitQuota,
    #[serde(rename = "cache_ttl_ms", skip_serializing_if = "Option::is_none")]
    #[serde(serialize_with = "serialize_optional_ms")]
    pub cache_ttl: Option<Duration>,
    /// Upper bound on concurrent calls to this source.
    pub max_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
}

impl SourceConfig {
    /// Published defaults for each provider.
    pub fn default_for(source: SourceId) -> Self {
        let (base_url, rate_limit, cache_ttl) = match source {
            SourceId::Census => (
                "https://api.census.gov/data",
                RateLimitQuota::per_minute(500),
                Duration::from_secs(1_800),
            ),
            SourceId::Dataweb => (
                "https://datawebws.usitc.gov/dataweb",
                RateLimitQuota::per_minute(60),
                Duration::from_secs(1_800),
            ),
            SourceId::FederalRegister => (
                "https://www.federalregister.gov/api/v1",
                RateLimitQuota::per_minute(1_000),
                Duration::from_secs(1_800),
            ),
            SourceId::Bea => (
                "https://apps.bea.gov/api/data",
                RateLimitQuota::per_minute(100),
                Duration::from_secs(1_800),
            ),
            SourceId::Gnews => (
                "https://gnews.io/api/v4",
                RateLimitQuota::per_day(100),
                Duration::from_secs(900),
            ),
        };

        Self {
            enabled: true,
            base_url: String::from(base_url),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            rate_limit,
            cache_ttl: Some(cache_ttl),
            max_connections: 4,
            credential: None,
        }
    }
}

/// Complete engine configuration, built once at startup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    /// Overall deadline for one analysis call unless the query overrides it.
    #[serde(rename = "default_deadline_ms", with = "duration_ms")]
    pub default_deadline: Duration,
    pub cache: CacheConfig,
    pub circuit: CircuitBreakerConfig,
    pub sources: BTreeMap<SourceId, SourceConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_deadline: Duration::from_secs(30),
            cache: CacheConfig::default(),
            circuit: CircuitBreakerConfig::default(),
            sources: SourceId::ALL
                .into_iter()
                .map(|source| (source, SourceConfig::default_for(source)))
                .collect(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the JSON file at `path`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, CoreError> {
        let file: ConfigFile = serde_json::from_str(content)?;
        let mut config = Self::default();
        file.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Fill missing credentials from the process environment.
    pub fn with_env_credentials(self) -> Self {
        self.with_env_lookup(|name| std::env::var(name).ok())
    }

    /// Fill missing credentials using `lookup`, trying each source's env vars in order.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        for (source, config) in &mut self.sources {
            if config.credential.is_some() {
                continue;
            }
            config.credential = source
                .credential_env_vars()
                .into_iter()
                .filter_map(&lookup)
                .find(|value| !value.trim().is_empty())
                .map(Credential::new);
        }
        self
    }

    /// Enabled sources that need a credential and have none.
    pub fn missing_credentials(&self) -> Vec<SourceId> {
        self.sources
            .iter()
            .filter(|(source, config)| {
                config.enabled && source.requires_credential() && config.credential.is_none()
            })
            .map(|(source, _)| *source)
            .collect()
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = (SourceId, &SourceConfig)> {
        self.sources
            .iter()
            .filter(|(_, config)| config.enabled)
            .map(|(source, config)| (*source, config))
    }

    pub fn source(&self, source: SourceId) -> Option<&SourceConfig> {
        self.sources.get(&source)
    }

    /// Effective cache TTL. Zero when caching is disabled.
    pub fn cache_ttl(&self, source: SourceId) -> Duration {
        if !self.cache.enabled {
            return Duration::ZERO;
        }
        self.sources
            .get(&source)
            .and_then(|config| config.cache_ttl)
            .unwrap_or(self.cache.default_ttl)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid =
            |message: String| -> Result<(), CoreError> { Err(CoreError::InvalidConfig(message)) };

        if self.default_deadline.is_zero() {
            return invalid(String::from("default_deadline_ms must be greater than zero"));
        }
        if self.circuit.failure_threshold == 0 {
            return invalid(String::from("circuit.failure_threshold must be at least 1"));
        }

        for (source, config) in &self.sources {
            if config.base_url.trim().is_empty() {
                return invalid(format!("sources.{source}.base_url must not be empty"));
            }
            if config.timeout.is_zero() {
                return invalid(format!("sources.{source}.timeout_ms must be greater than zero"));
            }
            if config.retry.max_attempts == 0 {
                return invalid(format!("sources.{source}.retry.max_attempts must be at least 1"));
            }
            if !(0.0..=1.0).contains(&config.retry.jitter_ratio) {
                return invalid(format!(
                    "sources.{source}.retry.jitter_ratio must be between 0 and 1"
                ));
            }
            if config.rate_limit.limit == 0 || config.rate_limit.window.is_zero() {
                return invalid(format!(
                    "sources.{source}.rate_limit needs a non-zero limit and window"
                ));
            }
            if config.max_connections == 0 {
                return invalid(format!("sources.{source}.max_connections must be at least 1"));
            }
        }

        Ok(())
    }
}

fn serialize_optional_ms<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(duration) => duration_ms::serialize(duration, serializer),
        None => serializer.serialize_none(),
    }
}

/// On-disk shape: every field optional, applied over the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    default_deadline_ms: Option<u64>,
    cache: Option<CachePatch>,
    circuit: Option<CircuitBreakerConfig>,
    #[serde(default)]
    sources: BTreeMap<SourceId, SourcePatch>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CachePatch {
    enabled: Option<bool>,
    default_ttl_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourcePatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    timeout_ms: Option<u64>,
    retry: Option<RetryPolicy>,
    rate_limit: Option<RateLimitQuota>,
    cache_ttl_ms: Option<u64>,
    max_connections: Option<usize>,
    api_key: Option<Credential>,
}

impl ConfigFile {
    fn apply(self, config: &mut EngineConfig) {
        if let Some(ms) = self.default_deadline_ms {
            config.default_deadline = Duration::from_millis(ms);
        }
        if let Some(cache) = self.cache {
            if let Some(enabled) = cache.enabled {
                config.cache.enabled = enabled;
            }
            if let Some(ms) = cache.default_ttl_ms {
                config.cache.default_ttl = Duration::from_millis(ms);
            }
        }
        if let Some(circuit) = self.circuit {
            config.circuit = circuit;
        }

        for (source, patch) in self.sources {
            let target = config
                .sources
                .entry(source)
                .or_insert_with(|| SourceConfig::default_for(source));
            patch.apply(target);
        }
    }
}

impl SourcePatch {
    fn apply(self, target: &mut SourceConfig) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(base_url) = self.base_url {
            target.base_url = base_url;
        }
        if let Some(ms) = self.timeout_ms {
            target.timeout = Duration::from_millis(ms);
        }
        if let Some(retry) = self.retry {
            target.retry = retry;
        }
        if let Some(rate_limit) = self.rate_limit {
            target.rate_limit = rate_limit;
        }
        if let Some(ms) = self.cache_ttl_ms {
            target.cache_ttl = Some(Duration::from_millis(ms));
        }
        if let Some(max_connections) = self.max_connections {
            target.max_connections = max_connections;
        }
        if let Some(credential) = self.api_key {
            target.credential = Some(credential);
        }
    }
}
