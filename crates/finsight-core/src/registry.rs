//! Source registry: adapters indexed by capability.
//!
//! Built once at startup and shared behind an `Arc`; lookups never lock.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::adapters::{AlphaVantageAdapter, FinnhubAdapter, SecEdgarAdapter, YahooAdapter};
use crate::data_source::DataSource;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::provider_policy::ProviderPolicy;
use crate::{Capability, SourceId, ValidationError};

/// Registered adapters, in registration order and per capability.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn DataSource>>,
    by_capability: HashMap<Capability, Vec<Arc<dyn DataSource>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` under every capability it declares.
    ///
    /// Returns `false` when an adapter with the same id is already present;
    /// the existing registration is kept.
    pub fn register(&mut self, adapter: Arc<dyn DataSource>) -> bool {
        let id = adapter.id();
        if self.get(id).is_some() {
            debug!(source = %id, "adapter already registered; ignoring");
            return false;
        }

        for capability in adapter.capabilities().iter() {
            let entries = self.by_capability.entry(capability).or_default();
            entries.push(Arc::clone(&adapter));
            // Stable sort keeps registration order for equal confidence.
            entries.sort_by(|left, right| {
                right
                    .confidence_for(capability)
                    .total_cmp(&left.confidence_for(capability))
            });
        }

        info!(
            source = %id,
            capabilities = %adapter.capabilities(),
            rate_limit = %adapter.rate_limit(),
            "registered source adapter"
        );
        self.sources.push(adapter);
        true
    }

    /// Adapters declaring `capability`, highest confidence first.
    pub fn get_by_capability(&self, capability: Capability) -> Vec<Arc<dyn DataSource>> {
        self.by_capability
            .get(&capability)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, id: SourceId) -> Option<Arc<dyn DataSource>> {
        self.sources
            .iter()
            .find(|adapter| adapter.id() == id)
            .cloned()
    }

    /// All adapters in registration order.
    pub fn sources(&self) -> &[Arc<dyn DataSource>] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Runs every adapter's health check concurrently. An adapter that misses
    /// `deadline` is reported unhealthy.
    pub async fn health_check_all(&self, deadline: Duration) -> BTreeMap<SourceId, bool> {
        let checks = self.sources.iter().map(|adapter| async move {
            let healthy = match tokio::time::timeout(deadline, adapter.health_check()).await {
                Ok(healthy) => healthy,
                Err(_) => {
                    warn!(
                        source = %adapter.id(),
                        deadline_ms = deadline.as_millis() as u64,
                        "health check missed deadline"
                    );
                    false
                }
            };
            (adapter.id(), healthy)
        });
        join_all(checks).await.into_iter().collect()
    }

    pub async fn close_all(&self) {
        join_all(self.sources.iter().map(|adapter| adapter.close())).await;
        info!(sources = self.sources.len(), "closed all source adapters");
    }
}

/// Builder for a registry of the built-in adapters.
///
/// # Environment Variables
///
/// | Provider | Primary Env Var | Fallback Env Var |
/// |----------|----------------|------------------|
/// | Alpha Vantage | `FINSIGHT_ALPHAVANTAGE_API_KEY` | `ALPHAVANTAGE_API_KEY` |
/// | Finnhub | `FINSIGHT_FINNHUB_API_KEY` | `FINNHUB_API_KEY` |
/// | SEC EDGAR user agent | `FINSIGHT_SEC_USER_AGENT` | `SEC_USER_AGENT` |
/// | Yahoo | (no key required) | - |
///
/// Adapters that need a key and have none are skipped with a warning.
pub struct SourceRegistryBuilder {
    http_client: Option<Arc<dyn HttpClient>>,
    alphavantage_api_key: Option<String>,
    finnhub_api_key: Option<String>,
    sec_user_agent: Option<String>,
    enabled: BTreeMap<SourceId, bool>,
    policies: HashMap<SourceId, ProviderPolicy>,
    base_urls: HashMap<SourceId, String>,
}

impl Default for SourceRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistryBuilder {
    pub fn new() -> Self {
        Self {
            http_client: None,
            alphavantage_api_key: None,
            finnhub_api_key: None,
            sec_user_agent: None,
            enabled: SourceId::BUILT_IN.iter().map(|id| (*id, true)).collect(),
            policies: HashMap::new(),
            base_urls: HashMap::new(),
        }
    }

    /// Fills keys that were not set explicitly from the environment.
    pub fn with_env(mut self) -> Self {
        fn read(primary: &str, fallback: &str) -> Option<String> {
            env::var(primary)
                .or_else(|_| env::var(fallback))
                .ok()
                .filter(|value| !value.trim().is_empty())
        }

        if self.alphavantage_api_key.is_none() {
            self.alphavantage_api_key =
                read("FINSIGHT_ALPHAVANTAGE_API_KEY", "ALPHAVANTAGE_API_KEY");
        }
        if self.finnhub_api_key.is_none() {
            self.finnhub_api_key = read("FINSIGHT_FINNHUB_API_KEY", "FINNHUB_API_KEY");
        }
        if self.sec_user_agent.is_none() {
            self.sec_user_agent = read("FINSIGHT_SEC_USER_AGENT", "SEC_USER_AGENT");
        }
        self
    }

    /// Shares one transport across adapters; defaults to reqwest.
    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn with_alphavantage_key(mut self, key: impl Into<String>) -> Self {
        self.alphavantage_api_key = Some(key.into());
        self
    }

    pub fn with_finnhub_key(mut self, key: impl Into<String>) -> Self {
        self.finnhub_api_key = Some(key.into());
        self
    }

    pub fn with_sec_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.sec_user_agent = Some(user_agent.into());
        self
    }

    pub fn with_enabled(mut self, source_id: SourceId, enabled: bool) -> Self {
        self.enabled.insert(source_id, enabled);
        self
    }

    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.policies.insert(policy.source_id, policy);
        self
    }

    pub fn with_base_url(mut self, source_id: SourceId, base_url: impl Into<String>) -> Self {
        self.base_urls.insert(source_id, base_url.into());
        self
    }

    fn is_enabled(&self, source_id: SourceId) -> bool {
        self.enabled.get(&source_id).copied().unwrap_or(false)
    }

    fn policy(&self, source_id: SourceId) -> ProviderPolicy {
        self.policies
            .get(&source_id)
            .cloned()
            .unwrap_or_else(|| ProviderPolicy::default_for(source_id))
    }

    /// Builds the registry in SEC, Yahoo, Alpha Vantage, Finnhub order.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] for an invalid policy.
    pub fn build(self) -> Result<SourceRegistry, ValidationError> {
        for policy in self.policies.values() {
            policy.validate()?;
        }

        let http_client = self
            .http_client
            .clone()
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let mut registry = SourceRegistry::new();

        if self.is_enabled(SourceId::SecEdgar) {
            let mut adapter = SecEdgarAdapter::new(Arc::clone(&http_client))
                .with_policy(self.policy(SourceId::SecEdgar));
            if let Some(user_agent) = &self.sec_user_agent {
                adapter = adapter.with_user_agent(user_agent.clone());
            }
            if let Some(base_url) = self.base_urls.get(&SourceId::SecEdgar) {
                adapter = adapter.with_base_urls(base_url.clone(), base_url.clone());
            }
            registry.register(Arc::new(adapter));
        }

        if self.is_enabled(SourceId::Yahoo) {
            let mut adapter = YahooAdapter::new(Arc::clone(&http_client))
                .with_policy(self.policy(SourceId::Yahoo));
            if let Some(base_url) = self.base_urls.get(&SourceId::Yahoo) {
                adapter = adapter.with_base_url(base_url.clone());
            }
            registry.register(Arc::new(adapter));
        }

        if self.is_enabled(SourceId::AlphaVantage) {
            match &self.alphavantage_api_key {
                Some(key) => {
                    let mut adapter =
                        AlphaVantageAdapter::new(Arc::clone(&http_client), key.clone())
                            .with_policy(self.policy(SourceId::AlphaVantage));
                    if let Some(base_url) = self.base_urls.get(&SourceId::AlphaVantage) {
                        adapter = adapter.with_base_url(base_url.clone());
                    }
                    registry.register(Arc::new(adapter));
                }
                None => warn!(
                    source = %SourceId::AlphaVantage,
                    "no API key configured; adapter not registered"
                ),
            }
        }

        if self.is_enabled(SourceId::Finnhub) {
            match &self.finnhub_api_key {
                Some(key) => {
                    let mut adapter = FinnhubAdapter::new(Arc::clone(&http_client), key.clone())
                        .with_policy(self.policy(SourceId::Finnhub));
                    if let Some(base_url) = self.base_urls.get(&SourceId::Finnhub) {
                        adapter = adapter.with_base_url(base_url.clone());
                    }
                    registry.register(Arc::new(adapter));
                }
                None => warn!(
                    source = %SourceId::Finnhub,
                    "no API key configured; adapter not registered"
                ),
            }
        }

        Ok(registry)
    }
}
