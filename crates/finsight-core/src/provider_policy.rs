use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::{RateLimit, SourceId, ValidationError};

/// What a throttled call does when the provider budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowMode {
    /// Fail immediately with `rate_limited` and a retry-after hint.
    FailFast,
    /// Wait for budget up to `max_wait`, then fail with `rate_limited`.
    Block { max_wait: Duration },
}

/// Per-provider request budget, caching and breaker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub source_id: SourceId,
    /// `None` means the provider declares no limit and the limiter is skipped.
    pub quota_limit: Option<u32>,
    pub quota_window: Duration,
    pub burst: u32,
    pub overflow: OverflowMode,
    pub cache_ttl: Duration,
    pub search_cache_ttl: Duration,
    pub call_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3_600);

impl ProviderPolicy {
    /// Unlimited policy used for plugin adapters without declared limits.
    pub fn unlimited(source_id: SourceId) -> Self {
        Self {
            source_id,
            quota_limit: None,
            quota_window: MINUTE,
            burst: 1,
            overflow: OverflowMode::FailFast,
            cache_ttl: MINUTE,
            search_cache_ttl: HOUR,
            call_timeout: Duration::from_secs(10),
            breaker: CircuitBreakerConfig::default(),
        }
    }

    /// SEC fair-access policy: 10 requests per second.
    pub fn sec_edgar_default() -> Self {
        Self {
            quota_limit: Some(10),
            quota_window: Duration::from_secs(1),
            overflow: OverflowMode::Block {
                max_wait: Duration::from_secs(2),
            },
            cache_ttl: HOUR,
            search_cache_ttl: Duration::from_secs(24 * 3_600),
            ..Self::unlimited(SourceId::SecEdgar)
        }
    }

    /// Free tier: 5 requests per minute, fail fast.
    pub fn alphavantage_default() -> Self {
        Self {
            quota_limit: Some(5),
            quota_window: MINUTE,
            overflow: OverflowMode::FailFast,
            cache_ttl: HOUR,
            ..Self::unlimited(SourceId::AlphaVantage)
        }
    }

    pub fn finnhub_default() -> Self {
        Self {
            quota_limit: Some(60),
            quota_window: MINUTE,
            overflow: OverflowMode::Block {
                max_wait: Duration::from_secs(1),
            },
            cache_ttl: MINUTE,
            ..Self::unlimited(SourceId::Finnhub)
        }
    }

    pub fn yahoo_default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(15),
            ..Self::unlimited(SourceId::Yahoo)
        }
    }

    pub fn default_for(source_id: SourceId) -> Self {
        match source_id {
            SourceId::SecEdgar => Self::sec_edgar_default(),
            SourceId::AlphaVantage => Self::alphavantage_default(),
            SourceId::Finnhub => Self::finnhub_default(),
            SourceId::Yahoo => Self::yahoo_default(),
            SourceId::Custom(_) => Self::unlimited(source_id),
        }
    }

    pub fn with_quota(mut self, limit: u32, window: Duration) -> Self {
        self.quota_limit = Some(limit);
        self.quota_window = window;
        self
    }

    pub fn without_quota(mut self) -> Self {
        self.quota_limit = None;
        self
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowMode) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Declared budget normalized to requests per minute.
    pub fn rate_limit(&self) -> RateLimit {
        match self.quota_limit {
            None => RateLimit::Unlimited,
            Some(limit) => {
                let window_secs = self.quota_window.as_secs_f64().max(0.001);
                let per_minute = (f64::from(limit) * 60.0 / window_secs).floor();
                RateLimit::PerMinute(per_minute.clamp(1.0, f64::from(u32::MAX)) as u32)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.quota_limit == Some(0) {
            return Err(ValidationError::InvalidConfig {
                field: "quota_limit",
                reason: String::from("must be at least 1 or unset"),
            });
        }
        if self.quota_window.is_zero() {
            return Err(ValidationError::InvalidConfig {
                field: "quota_window",
                reason: String::from("must be greater than zero"),
            });
        }
        if self.burst == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "burst",
                reason: String::from("must be at least 1"),
            });
        }
        if self.call_timeout.is_zero() {
            return Err(ValidationError::InvalidConfig {
                field: "call_timeout",
                reason: String::from("must be greater than zero"),
            });
        }
        Ok(())
    }
}
