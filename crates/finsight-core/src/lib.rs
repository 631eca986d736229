//! # FinSight Core
//!
//! Multi-source financial data federation: provider adapters, a capability
//! registry, rate-limited caching with request coalescing, and a federation
//! engine that cross-validates values without ever averaging them.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Provider adapters (SEC EDGAR, Yahoo, Alpha Vantage, Finnhub) |
//! | [`cache`] | Per-adapter TTL cache |
//! | [`circuit_breaker`] | Circuit breaker backing adapter health |
//! | [`data_source`] | Adapter trait, fetch request and source errors |
//! | [`domain`] | Tickers, concepts, capabilities, data points |
//! | [`error`] | Validation errors |
//! | [`federation`] | Federation engine and result types |
//! | [`guard`] | Cache, coalescing, breaker and throttle around provider calls |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`provider_policy`] | Per-provider budget and cache settings |
//! | [`reconcile`] | Median/tolerance consistency scoring |
//! | [`registry`] | Adapters indexed by capability |
//! | [`singleflight`] | Request coalescing primitive |
//! | [`source`] | Source identifiers |
//! | [`throttling`] | GCRA rate limiting |
//! | [`tier`] | Caller tiers and entitlements |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use finsight_core::{
//!     Concept, DefaultTierPolicy, FederationConfig, FederationEngine, FederationRequest,
//!     SourceRegistryBuilder, Ticker, Tier,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = SourceRegistryBuilder::new().with_env().build()?;
//!     let engine = FederationEngine::new(
//!         Arc::new(registry),
//!         Arc::new(DefaultTierPolicy::new()),
//!         FederationConfig::default(),
//!     )?;
//!
//!     let request = FederationRequest::new(
//!         Ticker::parse("AAPL")?,
//!         [Concept::parse("revenue")?, Concept::parse("pe_ratio")?],
//!         Tier::Professional,
//!     );
//!     let result = engine.fetch(request).await?;
//!     if let Some(revenue) = result.value("revenue") {
//!         println!("{} {} ({})", revenue.value, revenue.unit, revenue.citation.url());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │ FederationEngine │────▶│ TierPolicy       │
//! └────────┬─────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ SourceRegistry   │
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────────────────────┐
//! │ DataSource       │────▶│ SourceGuard                      │
//! │ (adapter trait)  │     │ cache ▸ singleflight ▸ breaker ▸ │
//! └──────────────────┘     │ throttle ▸ HttpClient            │
//!                          └──────────────────────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Adapter errors never escape [`FederationEngine::fetch`]; they become
//! per-concept statuses:
//!
//! ```rust
//! use finsight_core::{SourceError, SourceErrorKind};
//!
//! fn describe(error: &SourceError) -> &'static str {
//!     match error.kind() {
//!         SourceErrorKind::RateLimited | SourceErrorKind::Unavailable => "retry later",
//!         SourceErrorKind::NotFound => "no data",
//!         _ => "provider error",
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - API keys come from configuration or environment variables and are never logged
//! - Keys are kept out of citation URLs

pub mod adapters;
pub mod cache;
pub mod circuit_breaker;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod federation;
pub mod guard;
pub mod http_client;
pub mod provider_policy;
pub mod reconcile;
pub mod registry;
pub mod singleflight;
pub mod source;
pub mod throttling;
pub mod tier;

// Adapter implementations
pub use adapters::{AlphaVantageAdapter, FinnhubAdapter, SecEdgarAdapter, YahooAdapter};

// Caching and call guarding
pub use cache::{CacheKey, CacheStore};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use guard::{CachedBody, SourceGuard};
pub use singleflight::Singleflight;

// Data source trait and types
pub use data_source::{
    DataSource, FetchOutcome, FetchRequest, RateLimit, SourceError, SourceErrorKind,
};

// Domain models
pub use domain::{
    Capability, CapabilitySet, Citation, ClassSeparator, CompanyRef, Concept, ConceptDefinition,
    DataPoint, Period, PeriodType, Ticker, UtcDateTime, VOCABULARY,
};

// Error types
pub use error::ValidationError;

// Federation
pub use federation::{
    ConceptStatus, FederationConfig, FederationEngine, FederationError, FederationRequest,
    FederationResult, SourceFailure, SourceSnapshot,
};
pub use reconcile::{Observation, ValidationReport};

// HTTP client types
pub use http_client::{
    CannedHttpClient, HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};

// Provider policies and throttling
pub use provider_policy::{OverflowMode, ProviderPolicy};
pub use throttling::Throttle;

// Registry and tiers
pub use registry::{SourceRegistry, SourceRegistryBuilder};
pub use tier::{DefaultTierPolicy, Tier, TierPolicy};

// Source identifiers
pub use source::SourceId;
