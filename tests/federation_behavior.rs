use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use finsight_core::{
    AlphaVantageAdapter, CannedHttpClient, Capability, CapabilitySet, Citation, CompanyRef,
    Concept, ConceptStatus, DataPoint, DataSource, DefaultTierPolicy, FederationConfig,
    FederationEngine, FederationError, FederationRequest, FetchOutcome, FetchRequest, PeriodType,
    ProviderPolicy, RateLimit, SourceError, SourceErrorKind, SourceId, SourceRegistry, Ticker,
    Tier, UtcDateTime, YahooAdapter,
};
use futures::future::join_all;

/// In-test adapter answering from a fixed value table.
struct ScriptedSource {
    id: SourceId,
    capabilities: CapabilitySet,
    confidence: f64,
    values: HashMap<&'static str, f64>,
    concept_failures: HashMap<&'static str, SourceError>,
    failure: Option<SourceError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    closed: AtomicBool,
}

impl ScriptedSource {
    fn new(id: &'static str, capabilities: &[Capability], confidence: f64) -> Self {
        Self {
            id: SourceId::Custom(id),
            capabilities: CapabilitySet::new(capabilities),
            confidence,
            values: HashMap::new(),
            concept_failures: HashMap::new(),
            failure: None,
            delay: None,
            calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn fundamentals(id: &'static str, confidence: f64) -> Self {
        Self::new(id, &[Capability::Fundamentals], confidence)
    }

    fn with_value(mut self, concept: &'static str, value: f64) -> Self {
        self.values.insert(concept, value);
        self
    }

    fn failing(mut self, error: SourceError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Fails one concept while the rest of the call succeeds.
    fn failing_for(mut self, concept: &'static str, error: SourceError) -> Self {
        self.concept_failures.insert(concept, error);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, req: FetchRequest) -> Result<FetchOutcome, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let mut outcome = FetchOutcome::default();
        for concept in &req.concepts {
            if let Some(error) = self.concept_failures.get(concept.as_str()) {
                outcome.failed.push((concept.clone(), error.clone()));
            }
        }
        outcome.points = req
            .concepts
            .iter()
            .filter_map(|concept| {
                let value = self.values.get(concept.as_str())?;
                DataPoint::new(
                    self.id,
                    req.ticker.clone(),
                    concept.clone(),
                    *value,
                    concept.unit().unwrap_or("USD"),
                    req.period.label(),
                    PeriodType::Duration,
                    Citation::Provider {
                        endpoint: String::from("scripted"),
                        url: format!("https://{}.test/{}", self.id, req.ticker),
                    },
                    UtcDateTime::now(),
                    self.confidence,
                )
                .ok()
            })
            .collect();
        Ok(outcome)
    }
}

impl DataSource for ScriptedSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn confidence_for(&self, capability: Capability) -> f64 {
        if self.capabilities.contains(capability) {
            self.confidence
        } else {
            0.0
        }
    }

    fn supports_concept(&self, concept: &Concept) -> bool {
        concept
            .capability()
            .is_some_and(|capability| self.capabilities.contains(capability))
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit::Unlimited
    }

    fn fetch<'a>(
        &'a self,
        req: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FetchOutcome, SourceError>> + Send + 'a>> {
        Box::pin(self.answer(req))
    }

    fn search<'a>(
        &'a self,
        _query: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<CompanyRef>> + Send + 'a>> {
        Box::pin(async { Vec::new() })
    }

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move { !self.closed.load(Ordering::SeqCst) })
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move { self.closed.store(true, Ordering::SeqCst) })
    }
}

fn engine_with(sources: &[Arc<dyn DataSource>], config: FederationConfig) -> FederationEngine {
    let mut registry = SourceRegistry::new();
    for source in sources {
        registry.register(Arc::clone(source));
    }
    FederationEngine::new(
        Arc::new(registry),
        Arc::new(DefaultTierPolicy::new()),
        config,
    )
    .expect("valid engine")
}

fn request(concepts: &[&str], tier: Tier) -> FederationRequest {
    FederationRequest::new(
        Ticker::parse("AAPL").expect("valid ticker"),
        concepts
            .iter()
            .map(|name| Concept::parse(name).expect("valid concept")),
        tier,
    )
}

#[tokio::test]
async fn free_tier_resolves_single_source_without_validation() {
    let source = Arc::new(
        ScriptedSource::fundamentals("filings_feed", 0.95).with_value("revenue", 1_000_000.0),
    );
    let engine = engine_with(&[source.clone()], FederationConfig::default());

    let result = engine
        .fetch(request(&["revenue"], Tier::Free))
        .await
        .expect("resolved");

    assert_eq!(result.status("revenue"), Some(ConceptStatus::Resolved));
    assert_eq!(result.data.len(), 1);
    let point = result.value("revenue").expect("revenue point");
    assert_eq!(point.value, 1_000_000.0);
    assert_eq!(point.unit, "USD");
    assert!(!point.citation.url().is_empty());
    assert!(result.validation.is_none());
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn professional_tier_cross_validates_close_values() {
    let primary = Arc::new(
        ScriptedSource::fundamentals("primary", 0.95).with_value("revenue", 1_000_000.0),
    );
    let secondary = Arc::new(
        ScriptedSource::fundamentals("secondary", 0.85).with_value("revenue", 1_015_000.0),
    );
    let engine = engine_with(
        &[secondary.clone(), primary.clone()],
        FederationConfig::default().with_tolerance(0.02),
    );

    let result = engine
        .fetch(request(&["revenue"], Tier::Professional))
        .await
        .expect("resolved");

    assert_eq!(result.status("revenue"), Some(ConceptStatus::Resolved));
    let point = result.value("revenue").expect("revenue point");
    assert_eq!(point.value, 1_000_000.0, "highest-priority source wins");
    assert_eq!(point.source_id, SourceId::Custom("primary"));

    let report = result.report("revenue").expect("validation report");
    assert_eq!(report.consistency_score, 1.0);
    assert_eq!(report.observations.len(), 2);
    assert!(!report.conflict);
    assert!(result.warnings.is_empty());
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);
}

#[tokio::test]
async fn consistency_score_counts_values_near_the_median() {
    let sources: Vec<Arc<dyn DataSource>> = vec![
        Arc::new(ScriptedSource::fundamentals("a", 0.9).with_value("revenue", 100.0)),
        Arc::new(ScriptedSource::fundamentals("b", 0.8).with_value("revenue", 101.0)),
        Arc::new(ScriptedSource::fundamentals("c", 0.7).with_value("revenue", 150.0)),
    ];
    let engine = engine_with(
        &sources,
        FederationConfig::default()
            .with_tolerance(0.05)
            .with_cross_validation_sources(3),
    );

    let result = engine
        .fetch(request(&["revenue"], Tier::Enterprise))
        .await
        .expect("resolved");

    let report = result.report("revenue").expect("validation report");
    assert!((report.consistency_score - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(report.chosen.value, 100.0);
    assert_eq!(report.chosen.source_id, SourceId::Custom("a"));
    assert_eq!(result.value("revenue").map(|point| point.value), Some(100.0));
}

#[tokio::test]
async fn disagreement_is_reported_as_conflict_warning() {
    let sources: Vec<Arc<dyn DataSource>> = vec![
        Arc::new(ScriptedSource::fundamentals("a", 0.9).with_value("net_income", 100.0)),
        Arc::new(ScriptedSource::fundamentals("b", 0.8).with_value("net_income", 200.0)),
    ];
    let engine = engine_with(&sources, FederationConfig::default());

    let result = engine
        .fetch(request(&["net_income"], Tier::Professional))
        .await
        .expect("resolved");

    let report = result.report("net_income").expect("validation report");
    assert!(report.conflict);
    assert_eq!(result.value("net_income").map(|point| point.value), Some(100.0));
    assert!(result
        .warnings
        .iter()
        .any(|warning| warning.contains("sources disagree")));
}

#[tokio::test]
async fn unavailable_primary_falls_back_to_secondary() {
    let primary = Arc::new(
        ScriptedSource::fundamentals("primary", 0.95)
            .failing(SourceError::unavailable("upstream returned status 503")),
    );
    let secondary = Arc::new(
        ScriptedSource::fundamentals("secondary", 0.80).with_value("revenue", 42.0),
    );
    let engine = engine_with(&[primary.clone(), secondary.clone()], FederationConfig::default());

    let result = engine
        .fetch(request(&["revenue"], Tier::Free))
        .await
        .expect("fallback succeeds");

    assert_eq!(result.status("revenue"), Some(ConceptStatus::Resolved));
    let point = result.value("revenue").expect("revenue point");
    assert_eq!(point.value, 42.0);
    assert_eq!(point.source_id, SourceId::Custom("secondary"));

    assert_eq!(result.failures.len(), 1);
    let failure = &result.failures[0];
    assert_eq!(failure.source_id, SourceId::Custom("primary"));
    assert_eq!(failure.kind, SourceErrorKind::Unavailable);
    assert!(failure.retryable);
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);
}

#[tokio::test]
async fn concept_failed_inside_a_successful_call_falls_back() {
    let primary = Arc::new(
        ScriptedSource::fundamentals("primary", 0.95)
            .with_value("revenue", 10.0)
            .failing_for("eps", SourceError::rate_limited("statement endpoint throttled")),
    );
    let secondary = Arc::new(
        ScriptedSource::fundamentals("secondary", 0.80)
            .with_value("revenue", 11.0)
            .with_value("eps", 1.5),
    );
    let engine = engine_with(&[primary.clone(), secondary.clone()], FederationConfig::default());

    let result = engine
        .fetch(request(&["revenue", "eps"], Tier::Free))
        .await
        .expect("resolved");

    assert_eq!(result.status("revenue"), Some(ConceptStatus::Resolved));
    assert_eq!(
        result.value("revenue").map(|point| point.source_id),
        Some(SourceId::Custom("primary"))
    );
    assert_eq!(result.status("eps"), Some(ConceptStatus::Resolved));
    assert_eq!(
        result.value("eps").map(|point| point.source_id),
        Some(SourceId::Custom("secondary"))
    );

    assert_eq!(result.failures.len(), 1);
    let failure = &result.failures[0];
    assert_eq!(failure.source_id, SourceId::Custom("primary"));
    assert_eq!(failure.concepts, vec![Concept::parse("eps").expect("valid concept")]);
    assert_eq!(failure.kind, SourceErrorKind::RateLimited);
    assert_eq!(secondary.calls(), 1);
}

#[tokio::test]
async fn concept_failed_inside_a_successful_call_is_degraded_without_fallback() {
    let only = Arc::new(
        ScriptedSource::fundamentals("only", 0.95)
            .with_value("revenue", 10.0)
            .failing_for("eps", SourceError::unavailable("statement endpoint down")),
    );
    let engine = engine_with(&[only], FederationConfig::default());

    let result = engine
        .fetch(request(&["revenue", "eps"], Tier::Free))
        .await
        .expect("revenue resolved");

    assert_eq!(result.status("revenue"), Some(ConceptStatus::Resolved));
    assert_eq!(result.status("eps"), Some(ConceptStatus::AllSourcesFailed));
    assert!(result.is_partial());
    assert_eq!(result.failures.len(), 1);
}

#[tokio::test]
async fn tier_gating_never_attempts_excluded_sources() {
    let market = Arc::new(
        ScriptedSource::new("market_feed", &[Capability::MarketData], 0.9)
            .with_value("price", 189.5),
    );
    let filings = Arc::new(
        ScriptedSource::fundamentals("filings_feed", 0.95).with_value("revenue", 10.0),
    );
    let engine = engine_with(&[market.clone(), filings.clone()], FederationConfig::default());

    let result = engine
        .fetch(request(&["price", "revenue"], Tier::Free))
        .await
        .expect("partially resolved");

    assert_eq!(result.status("price"), Some(ConceptStatus::UnavailableForTier));
    assert_eq!(result.status("revenue"), Some(ConceptStatus::Resolved));
    assert!(result.value("price").is_none());
    assert!(result.is_partial());
    assert_eq!(market.calls(), 0);
}

#[tokio::test]
async fn not_found_everywhere_is_no_data_not_a_failure() {
    let source = Arc::new(
        ScriptedSource::fundamentals("filings_feed", 0.95)
            .failing(SourceError::not_found("unknown ticker")),
    );
    let engine = engine_with(&[source], FederationConfig::default());

    let result = engine
        .fetch(request(&["revenue"], Tier::Free))
        .await
        .expect("no data is not fatal");

    assert_eq!(result.status("revenue"), Some(ConceptStatus::NoData));
    assert!(!result.status("revenue").expect("status").is_degraded());
    assert_eq!(result.failures.len(), 1);
}

#[tokio::test]
async fn every_attempt_failing_upstream_is_request_fatal() {
    let first = Arc::new(
        ScriptedSource::fundamentals("first", 0.95).failing(SourceError::unavailable("down")),
    );
    let second = Arc::new(
        ScriptedSource::fundamentals("second", 0.90).failing(SourceError::rate_limited("429")),
    );
    let engine = engine_with(&[first, second], FederationConfig::default());

    let error = engine
        .fetch(request(&["revenue", "eps"], Tier::Free))
        .await
        .expect_err("all sources failed");

    let FederationError::AllSourcesFailed { failures } = &error else {
        panic!("expected AllSourcesFailed, got {error}");
    };
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|failure| failure.retryable));
}

#[tokio::test]
async fn hanging_source_times_out_while_other_concepts_resolve() {
    let filings = Arc::new(
        ScriptedSource::fundamentals("filings_feed", 0.95).with_value("revenue", 10.0),
    );
    let hanging = Arc::new(
        ScriptedSource::new("slow_quotes", &[Capability::MarketData], 0.9)
            .with_value("price", 1.0)
            .with_delay(Duration::from_secs(30)),
    );
    let engine = engine_with(
        &[filings, hanging.clone()],
        FederationConfig::default()
            .with_call_timeout(Duration::from_secs(60))
            .with_request_deadline(Duration::from_millis(200)),
    );

    let result = engine
        .fetch(request(&["revenue", "price"], Tier::Starter))
        .await
        .expect("partial result");

    assert_eq!(result.status("revenue"), Some(ConceptStatus::Resolved));
    assert_eq!(result.status("price"), Some(ConceptStatus::TimedOut));
    assert!(result.status("price").expect("status").is_degraded());
    assert!(result
        .warnings
        .iter()
        .any(|warning| warning.contains("deadline")));
    assert!(result.latency_ms < 5_000);
    assert_eq!(hanging.calls(), 1);
}

const AV_OVERVIEW: &str =
    r#"{"Symbol": "AAPL", "MarketCapitalization": "2950000000000", "PERatio": "31.2"}"#;

#[tokio::test]
async fn repeated_fetches_within_ttl_hit_the_provider_once() {
    let http = Arc::new(CannedHttpClient::new().route("function=OVERVIEW", 200, AV_OVERVIEW));
    let adapter: Arc<dyn DataSource> = Arc::new(
        AlphaVantageAdapter::new(http.clone(), "demo-key")
            .with_policy(ProviderPolicy::unlimited(SourceId::AlphaVantage)),
    );
    let engine = engine_with(&[adapter], FederationConfig::default());

    let first = engine
        .fetch(request(&["market_cap"], Tier::Free))
        .await
        .expect("first");
    let second = engine
        .fetch(request(&["market_cap"], Tier::Free))
        .await
        .expect("second");

    assert_eq!(first.data, second.data);
    assert_eq!(http.calls_matching("function=OVERVIEW"), 1);
}

#[tokio::test]
async fn concurrent_callers_share_one_provider_call() {
    let http = Arc::new(
        CannedHttpClient::new()
            .route("fc.yahoo.com", 404, "")
            .route("getcrumb", 200, "crumb-1")
            .route(
                "v7/finance/quote",
                200,
                r#"{"quoteResponse": {"result": [{"symbol": "AAPL", "marketCap": 2950000000000}], "error": null}}"#,
            )
            .with_delay(Duration::from_millis(50)),
    );
    let adapter: Arc<dyn DataSource> = Arc::new(
        YahooAdapter::new(http.clone()).with_policy(ProviderPolicy::unlimited(SourceId::Yahoo)),
    );
    let engine = engine_with(&[adapter], FederationConfig::default());

    let results =
        join_all((0..8).map(|_| engine.fetch(request(&["market_cap"], Tier::Free)))).await;

    for result in results {
        let result = result.expect("resolved");
        assert_eq!(
            result.value("market_cap").map(|point| point.value),
            Some(2_950_000_000_000.0)
        );
    }
    assert_eq!(http.calls_matching("v7/finance/quote"), 1);
}

#[tokio::test]
async fn throttled_alpha_vantage_endpoint_degrades_only_its_concepts() {
    let http = Arc::new(
        CannedHttpClient::new()
            .route("function=OVERVIEW", 200, AV_OVERVIEW)
            .route(
                "function=INCOME_STATEMENT",
                200,
                r#"{"symbol": "AAPL", "annualReports": [{"fiscalDateEnding": "2023-09-30", "totalRevenue": "383285000000"}], "quarterlyReports": []}"#,
            ),
    );
    let adapter: Arc<dyn DataSource> =
        Arc::new(AlphaVantageAdapter::new(http.clone(), "demo-key"));
    let engine = engine_with(&[adapter], FederationConfig::default());

    let result = engine
        .fetch(request(&["revenue", "market_cap"], Tier::Free))
        .await
        .expect("market cap resolved");

    assert_eq!(result.status("market_cap"), Some(ConceptStatus::Resolved));
    assert_eq!(result.status("revenue"), Some(ConceptStatus::AllSourcesFailed));
    assert!(result.status("revenue").expect("status").is_degraded());
    assert!(result.value("revenue").is_none());
    assert!(result.failures.iter().any(|failure| {
        failure.source_id == SourceId::AlphaVantage
            && failure.kind == SourceErrorKind::RateLimited
            && failure.concepts.iter().any(|concept| concept.as_str() == "revenue")
    }));
    assert_eq!(http.calls_matching("function=INCOME_STATEMENT"), 0);
}

#[tokio::test]
async fn fail_fast_limiter_never_exceeds_the_declared_budget() {
    let http = Arc::new(CannedHttpClient::new().route("function=OVERVIEW", 200, AV_OVERVIEW));
    let adapter = AlphaVantageAdapter::new(http.clone(), "demo-key");
    assert_eq!(adapter.rate_limit(), RateLimit::PerMinute(5));

    let mut rate_limited = 0;
    for symbol in ["AAPL", "MSFT", "IBM", "GOOG", "AMZN", "NVDA", "META", "TSLA"] {
        let req = FetchRequest::new(
            Ticker::parse(symbol).expect("valid ticker"),
            vec![Concept::parse("market_cap").expect("valid concept")],
            None,
        )
        .expect("valid request");
        if let Err(error) = adapter.fetch(req).await {
            assert_eq!(error.kind(), SourceErrorKind::RateLimited);
            rate_limited += 1;
        }
    }

    let calls = http.calls_matching("function=OVERVIEW");
    assert!(calls >= 1);
    assert!(calls <= 5, "{calls} calls exceeded the 5/min budget");
    assert_eq!(calls + rate_limited, 8);
}

#[tokio::test]
async fn health_and_close_cover_every_registered_source() {
    let healthy: Arc<dyn DataSource> = Arc::new(ScriptedSource::fundamentals("up", 0.9));
    let engine = engine_with(&[healthy], FederationConfig::default());

    let health = engine.health().await;
    assert_eq!(health.get(&SourceId::Custom("up")), Some(&true));

    let snapshots = engine.sources().await;
    assert_eq!(snapshots.len(), 1);
    assert!(snapshots[0].unlimited);
    assert!(snapshots[0].healthy);

    engine.close().await;
    assert_eq!(engine.health().await.get(&SourceId::Custom("up")), Some(&false));
}
