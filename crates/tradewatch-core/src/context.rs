use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    CacheStore, CoreError, EngineConfig, HealthTracker, HttpClient, HttpSource, OfflineHttpClient,
    Orchestrator, Payload, RateLimitGate, ReqwestHttpClient, RetryExecutor, SourceClient,
    SourceId, SourceResult,
};

/// Shared engine state, built once at startup and passed by `Arc`.
pub struct EngineContext {
    pub(crate) config: EngineConfig,
    pub(crate) sources: BTreeMap<SourceId, Arc<dyn SourceClient>>,
    /// Failed fetches are shared with coalesced callers as their `SourceResult`.
    pub(crate) cache: CacheStore<Payload, SourceResult>,
    pub(crate) gate: RateLimitGate,
    pub(crate) retry: RetryExecutor,
    pub(crate) health: HealthTracker,
}

impl EngineContext {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self, id: SourceId) -> Option<&Arc<dyn SourceClient>> {
        self.sources.get(&id)
    }

    pub fn source_ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.sources.keys().copied()
    }
}

/// Registers source clients and assembles the [`Orchestrator`].
///
/// # Example
///
/// ```rust,ignore
/// use tradewatch_core::{EngineBuilder, EngineConfig};
///
/// // Built-in HTTP sources, credentials from the environment
/// let engine = EngineBuilder::new(EngineConfig::default().with_env_credentials())
///     .with_default_sources()
///     .build()?;
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    sources: BTreeMap<SourceId, Arc<dyn SourceClient>>,
    transport: Option<Arc<dyn HttpClient>>,
    default_sources: bool,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sources: BTreeMap::new(),
            transport: None,
            default_sources: false,
        }
    }

    /// Register a client, replacing any built-in source with the same id.
    pub fn with_source(mut self, client: Arc<dyn SourceClient>) -> Self {
        self.sources.insert(client.id(), client);
        self
    }

    /// Register an [`HttpSource`] for every enabled source that has no explicit client.
    ///
    /// Sources with a credential (or that need none) use reqwest; the rest fall
    /// back to [`OfflineHttpClient`] unless a transport was set explicitly.
    pub fn with_default_sources(mut self) -> Self {
        self.default_sources = true;
        self
    }

    /// Transport shared by every default source, regardless of credentials.
    pub fn with_transport(mut self, transport: Arc<dyn HttpClient>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(mut self) -> Result<Orchestrator, CoreError> {
        self.config.validate()?;

        if self.default_sources {
            let online: Arc<dyn HttpClient> = match &self.transport {
                Some(transport) => Arc::clone(transport),
                None => Arc::new(ReqwestHttpClient::new()),
            };
            let offline: Arc<dyn HttpClient> = match &self.transport {
                Some(transport) => Arc::clone(transport),
                None => Arc::new(OfflineHttpClient),
            };

            for (id, source_config) in self.config.enabled_sources() {
                if self.sources.contains_key(&id) {
                    continue;
                }
                let has_key = source_config.credential.is_some() || !id.requires_credential();
                let transport = if has_key {
                    Arc::clone(&online)
                } else {
                    if self.transport.is_none() {
                        warn!(
                            source = id.as_str(),
                            "no credential configured, source will answer offline"
                        );
                    }
                    Arc::clone(&offline)
                };
                let client: Arc<dyn SourceClient> =
                    Arc::new(HttpSource::new(id, source_config, transport));
                self.sources.insert(id, client);
            }
        }

        let disabled = self
            .sources
            .keys()
            .filter(|id| {
                self.config
                    .source(**id)
                    .is_some_and(|source_config| !source_config.enabled)
            })
            .copied()
            .collect::<Vec<_>>();
        for id in disabled {
            debug!(source = id.as_str(), "source disabled by configuration");
            self.sources.remove(&id);
        }

        let gate = RateLimitGate::new(self.sources.keys().filter_map(|id| {
            self.config
                .source(*id)
                .map(|source_config| (*id, source_config.rate_limit))
        }));
        let health = HealthTracker::new(self.config.circuit, self.sources.keys().copied());

        let context = EngineContext {
            config: self.config,
            sources: self.sources,
            cache: CacheStore::new(),
            gate,
            retry: RetryExecutor,
            health,
        };
        Ok(Orchestrator::new(Arc::new(context)))
    }
}
