use std::sync::Arc;

use finsight_core::{
    AlphaVantageAdapter, CannedHttpClient, Capability, Concept, DataSource, FetchRequest,
    FinnhubAdapter, ProviderPolicy, SecEdgarAdapter, SourceErrorKind, SourceId, Ticker,
    YahooAdapter,
};

const SEC_TICKERS: &str = r#"{
    "0": {"cik_str": 320193, "ticker": "AAPL", "title": "Apple Inc."}
}"#;

const SEC_FACTS: &str = r#"{
    "cik": 320193,
    "entityName": "Apple Inc.",
    "facts": {
        "us-gaap": {
            "Revenues": {
                "units": {"USD": [
                    {"start": "2022-09-25", "end": "2023-09-30", "val": 383285000000,
                     "accn": "0000320193-23-000106", "fy": 2023, "fp": "FY", "form": "10-K", "filed": "2023-11-03"}
                ]}
            }
        }
    }
}"#;

const YAHOO_QUOTE: &str = r#"{
    "quoteResponse": {
        "result": [{"symbol": "AAPL", "regularMarketPrice": 189.95, "marketCap": 2950000000000}],
        "error": null
    }
}"#;

const AV_OVERVIEW: &str = r#"{"Symbol": "AAPL", "MarketCapitalization": "2950000000000", "PERatio": "31.2"}"#;

const FINNHUB_METRIC: &str =
    r#"{"symbol": "AAPL", "metric": {"marketCapitalization": 2950000.0, "peNormalizedAnnual": 30.1}}"#;

struct SourceCase {
    id: SourceId,
    source: Arc<dyn DataSource>,
    concepts: &'static [&'static str],
}

fn adapter(id: SourceId, http: Arc<CannedHttpClient>) -> Arc<dyn DataSource> {
    let policy = ProviderPolicy::unlimited(id);
    match id {
        SourceId::SecEdgar => Arc::new(SecEdgarAdapter::new(http).with_policy(policy)),
        SourceId::Yahoo => Arc::new(YahooAdapter::new(http).with_policy(policy)),
        SourceId::AlphaVantage => {
            Arc::new(AlphaVantageAdapter::new(http, "contract-key").with_policy(policy))
        }
        SourceId::Finnhub => {
            Arc::new(FinnhubAdapter::new(http, "contract-key").with_policy(policy))
        }
        SourceId::Custom(name) => panic!("no built-in adapter named '{name}'"),
    }
}

fn fixtures(id: SourceId) -> CannedHttpClient {
    match id {
        SourceId::SecEdgar => CannedHttpClient::new()
            .route("company_tickers.json", 200, SEC_TICKERS)
            .route("CIK0000320193.json", 200, SEC_FACTS),
        SourceId::Yahoo => CannedHttpClient::new()
            .route("fc.yahoo.com", 404, "")
            .route("getcrumb", 200, "contract-crumb")
            .route("v7/finance/quote", 200, YAHOO_QUOTE),
        SourceId::AlphaVantage => {
            CannedHttpClient::new().route("function=OVERVIEW", 200, AV_OVERVIEW)
        }
        SourceId::Finnhub => CannedHttpClient::new().route("stock/metric", 200, FINNHUB_METRIC),
        SourceId::Custom(_) => CannedHttpClient::new(),
    }
}

fn concepts_for(id: SourceId) -> &'static [&'static str] {
    match id {
        SourceId::SecEdgar => &["revenue"],
        SourceId::Yahoo => &["price", "market_cap"],
        SourceId::AlphaVantage | SourceId::Finnhub => &["market_cap", "pe_ratio"],
        SourceId::Custom(_) => &[],
    }
}

fn source_cases() -> Vec<SourceCase> {
    source_cases_with(fixtures)
}

fn source_cases_with(http: impl Fn(SourceId) -> CannedHttpClient) -> Vec<SourceCase> {
    SourceId::BUILT_IN
        .iter()
        .map(|id| SourceCase {
            id: *id,
            source: adapter(*id, Arc::new(http(*id))),
            concepts: concepts_for(*id),
        })
        .collect()
}

fn request(concepts: &[&str]) -> FetchRequest {
    FetchRequest::new(
        Ticker::parse("AAPL").expect("valid ticker"),
        concepts
            .iter()
            .map(|name| Concept::parse(name).expect("valid concept"))
            .collect(),
        None,
    )
    .expect("valid fetch request")
}

#[test]
fn metadata_is_consistent_for_all_sources() {
    for case in source_cases() {
        let source = &case.source;
        assert_eq!(source.id(), case.id, "source '{}': id", case.id);
        assert!(
            !source.capabilities().is_empty(),
            "source '{}': declares capabilities",
            case.id
        );

        for capability in Capability::ALL {
            let confidence = source.confidence_for(capability);
            assert!(
                (0.0..=1.0).contains(&confidence),
                "source '{}': confidence for {capability:?} in [0, 1]",
                case.id
            );
            if !source.capabilities().contains(capability) {
                assert_eq!(
                    confidence, 0.0,
                    "source '{}': undeclared {capability:?} has zero confidence",
                    case.id
                );
            }
        }

        for name in case.concepts {
            let concept = Concept::parse(name).expect("valid concept");
            assert!(
                source.supports_concept(&concept),
                "source '{}': supports {name}",
                case.id
            );
        }
        let unknown = Concept::parse("unknown_metric").expect("valid concept");
        assert!(
            !source.supports_concept(&unknown),
            "source '{}': unknown concepts are unsupported",
            case.id
        );
    }
}

#[tokio::test]
async fn fetch_returns_well_formed_points_for_all_sources() {
    for case in source_cases() {
        let points = case
            .source
            .fetch(request(case.concepts))
            .await
            .unwrap_or_else(|error| panic!("source '{}' fetch failed: {error}", case.id))
            .points;
        assert!(!points.is_empty(), "source '{}': returns points", case.id);

        for point in &points {
            assert!(
                case.concepts.contains(&point.concept.as_str()),
                "source '{}': only requested concepts, got {}",
                case.id,
                point.concept
            );
            assert_eq!(point.source_id, case.id, "source '{}': point source", case.id);
            assert_eq!(point.ticker.as_str(), "AAPL", "source '{}': ticker", case.id);
            assert!(point.value.is_finite(), "source '{}': finite value", case.id);
            assert!(!point.unit.is_empty(), "source '{}': unit present", case.id);
            assert!(
                point.citation.url().starts_with("https://"),
                "source '{}': citation url",
                case.id
            );
            assert!(
                !point.citation.url().contains("contract-key"),
                "source '{}': api key kept out of citations",
                case.id
            );

            let capability = point.concept.capability().expect("known concept");
            assert_eq!(
                point.confidence,
                case.source.confidence_for(capability),
                "source '{}': confidence follows the static table",
                case.id
            );
        }
    }
}

#[tokio::test]
async fn unmapped_concepts_are_omitted_without_error() {
    for case in source_cases() {
        let outcome = case
            .source
            .fetch(request(&["unknown_metric"]))
            .await
            .unwrap_or_else(|error| panic!("source '{}' errored: {error}", case.id));
        assert!(outcome.points.is_empty(), "source '{}': nothing for unknown", case.id);
        assert!(!outcome.is_partial(), "source '{}': nothing failed", case.id);
    }
}

#[tokio::test]
async fn transport_failures_map_to_unavailable() {
    let cases = source_cases_with(|_| CannedHttpClient::new().fail("", "connection refused"));

    for case in cases {
        let error = case
            .source
            .fetch(request(case.concepts))
            .await
            .expect_err("transport failure must error");
        assert_eq!(
            error.kind(),
            SourceErrorKind::Unavailable,
            "source '{}': transport failure kind",
            case.id
        );
        assert!(error.retryable(), "source '{}': retryable", case.id);
    }
}

#[tokio::test]
async fn http_429_maps_to_rate_limited() {
    let cases = source_cases_with(|_| CannedHttpClient::new().route("", 429, ""));

    for case in cases {
        let error = case
            .source
            .fetch(request(case.concepts))
            .await
            .expect_err("429 must error");
        assert_eq!(
            error.kind(),
            SourceErrorKind::RateLimited,
            "source '{}': 429 kind",
            case.id
        );
    }
}

#[tokio::test]
async fn search_failures_yield_empty_results() {
    let cases = source_cases_with(|_| CannedHttpClient::new().fail("", "connection refused"));

    for case in cases {
        let results = case.source.search("apple").await;
        assert!(results.is_empty(), "source '{}': empty on failure", case.id);
    }
}

#[tokio::test]
async fn close_makes_sources_unhealthy_and_rejects_fetches() {
    for case in source_cases() {
        assert!(
            case.source.health_check().await,
            "source '{}': healthy before close",
            case.id
        );

        case.source.close().await;

        assert!(
            !case.source.health_check().await,
            "source '{}': unhealthy after close",
            case.id
        );
        let error = case
            .source
            .fetch(request(case.concepts))
            .await
            .expect_err("closed source must error");
        assert_eq!(
            error.kind(),
            SourceErrorKind::Unavailable,
            "source '{}': closed kind",
            case.id
        );
    }
}
