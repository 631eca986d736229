//! Per-adapter call guard.
//!
//! [`SourceGuard`] is the only path from an adapter to its provider. A call
//! resolves in this order: closed check, cache, in-flight coalescing, circuit
//! breaker, rate budget, then the HTTP call under `call_timeout`. Only the last
//! step consumes provider budget.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheStore};
use crate::circuit_breaker::CircuitBreaker;
use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::provider_policy::ProviderPolicy;
use crate::singleflight::Singleflight;
use crate::throttling::Throttle;
use crate::{CompanyRef, RateLimit, SourceError, SourceErrorKind, SourceId, UtcDateTime};

/// Provider payload as cached: the raw body and when it was retrieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBody {
    pub body: Arc<str>,
    pub retrieved_at: UtcDateTime,
}

/// Composes cache, coalescing, circuit breaker and throttle for one adapter.
pub struct SourceGuard {
    policy: ProviderPolicy,
    cache: CacheStore<CachedBody>,
    search_cache: CacheStore<Vec<CompanyRef>>,
    in_flight: Singleflight<CacheKey, CachedBody>,
    breaker: CircuitBreaker,
    throttle: Throttle,
    closed: AtomicBool,
}

impl SourceGuard {
    pub fn new(policy: ProviderPolicy) -> Self {
        Self {
            cache: CacheStore::new(policy.cache_ttl),
            search_cache: CacheStore::new(policy.search_cache_ttl),
            in_flight: Singleflight::new(),
            breaker: CircuitBreaker::new(policy.breaker),
            throttle: Throttle::from_policy(&policy),
            closed: AtomicBool::new(false),
            policy,
        }
    }

    pub fn source_id(&self) -> SourceId {
        self.policy.source_id
    }

    pub fn policy(&self) -> &ProviderPolicy {
        &self.policy
    }

    pub fn rate_limit(&self) -> RateLimit {
        self.policy.rate_limit()
    }

    pub fn call_timeout(&self) -> Duration {
        self.policy.call_timeout
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Last-known-good state: not closed and the breaker is not open.
    pub fn is_healthy(&self) -> bool {
        !self.is_closed() && self.breaker.is_healthy()
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cache.clear().await;
        self.search_cache.clear().await;
    }

    /// Loads a provider payload for `key`, running `call` at most once across
    /// concurrent identical requests and only when the cache misses.
    ///
    /// `call` returns the validated response body; errors are shared with
    /// coalesced callers but never cached.
    pub async fn load<F, Fut>(
        &self,
        key: CacheKey,
        ttl_override: Option<Duration>,
        call: F,
    ) -> Result<CachedBody, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<String, SourceError>>,
    {
        self.ensure_open()?;

        if let Some(hit) = self.cache.get(&key).await {
            debug!(source = %self.source_id(), key = %key, "cache hit");
            return Ok(hit);
        }

        self.in_flight
            .run(&key, || self.call_provider(&key, ttl_override, &call))
            .await
    }

    async fn call_provider<F, Fut>(
        &self,
        key: &CacheKey,
        ttl_override: Option<Duration>,
        call: &F,
    ) -> Result<CachedBody, SourceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<String, SourceError>>,
    {
        // A previous leader may have filled the cache while this caller waited.
        if let Some(hit) = self.cache.get(key).await {
            return Ok(hit);
        }

        if let Err(remaining) = self.breaker.try_acquire() {
            return Err(SourceError::unavailable(format!(
                "{} circuit breaker is open; skipping upstream call",
                self.source_id()
            ))
            .with_retry_after(remaining));
        }

        self.throttle.acquire().await?;

        let outcome = match tokio::time::timeout(self.policy.call_timeout, call()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SourceError::unavailable(format!(
                "{} call exceeded {}ms",
                self.source_id(),
                self.policy.call_timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(body) => {
                self.breaker.record_success();
                let cached = CachedBody {
                    body: Arc::from(body),
                    retrieved_at: UtcDateTime::now(),
                };
                self.cache
                    .put(key.clone(), cached.clone(), ttl_override)
                    .await;
                Ok(cached)
            }
            Err(error) => {
                if error.kind() == SourceErrorKind::Unavailable {
                    self.breaker.record_failure();
                } else if error.kind() == SourceErrorKind::NotFound {
                    self.breaker.record_success();
                }
                warn!(
                    source = %self.source_id(),
                    key = %key,
                    code = error.code(),
                    error = %error.message(),
                    "provider call failed"
                );
                Err(error)
            }
        }
    }

    /// Cached search wrapper. Failures are logged and produce no results.
    pub async fn search<F, Fut>(&self, query: &str, call: F) -> Vec<CompanyRef>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<CompanyRef>, SourceError>>,
    {
        let query = query.trim().to_ascii_lowercase();
        if query.is_empty() || self.is_closed() {
            return Vec::new();
        }

        let key = CacheKey::new(query.as_str(), "search", "");
        if let Some(hit) = self.search_cache.get(&key).await {
            return hit;
        }

        let outcome: Result<Vec<CompanyRef>, SourceError> = async {
            self.breaker.try_acquire().map_err(|_| {
                SourceError::unavailable(format!("{} circuit breaker is open", self.source_id()))
            })?;
            self.throttle.acquire().await?;
            tokio::time::timeout(self.policy.call_timeout, call())
                .await
                .map_err(|_| SourceError::unavailable("search call timed out"))?
        }
        .await;

        match outcome {
            Ok(results) => {
                self.search_cache.put(key, results.clone(), None).await;
                results
            }
            Err(error) => {
                warn!(
                    source = %self.source_id(),
                    query = %query,
                    code = error.code(),
                    error = %error.message(),
                    "search failed; returning no results"
                );
                Vec::new()
            }
        }
    }

    fn ensure_open(&self) -> Result<(), SourceError> {
        if self.is_closed() {
            return Err(SourceError::unavailable(format!(
                "{} adapter is closed",
                self.source_id()
            )));
        }
        Ok(())
    }
}

/// Executes a GET and maps HTTP-level failures onto source error kinds.
///
/// Transport errors and 5xx map to `Unavailable`, 429 to `RateLimited`, 404
/// to `NotFound`. Provider-specific body checks happen in the adapter.
pub async fn execute_get(
    http_client: &dyn HttpClient,
    source_id: SourceId,
    request: HttpRequest,
) -> Result<String, SourceError> {
    let response = http_client
        .execute(request)
        .await
        .map_err(|error| transport_error(source_id, &error))?;
    response_body(source_id, response)
}

pub fn transport_error(source_id: SourceId, error: &HttpError) -> SourceError {
    if error.is_timeout() {
        SourceError::unavailable(format!("{source_id} request timed out: {}", error.message()))
    } else {
        SourceError::unavailable(format!("{source_id} transport error: {}", error.message()))
    }
}

pub fn response_body(source_id: SourceId, response: HttpResponse) -> Result<String, SourceError> {
    match response.status {
        status if (200..300).contains(&status) => Ok(response.body),
        429 => Err(SourceError::rate_limited(format!(
            "{source_id} upstream returned 429"
        ))),
        404 => Err(SourceError::not_found(format!(
            "{source_id} upstream returned 404"
        ))),
        status => Err(SourceError::unavailable(format!(
            "{source_id} upstream returned status {status}"
        ))),
    }
}
