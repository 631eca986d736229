use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::adapters::{ensure_json, parse_json, validation_to_error};
use crate::cache::CacheKey;
use crate::data_source::{DataSource, FetchOutcome, FetchRequest, RateLimit, SourceError};
use crate::guard::{execute_get, CachedBody, SourceGuard};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::{
    Capability, CapabilitySet, Citation, CompanyRef, Concept, DataPoint, PeriodType, SourceId,
    Ticker,
};

const BASE_URL: &str = "https://finnhub.io/api/v1";
const TOKEN_HEADER: &str = "X-Finnhub-Token";
const FUNDAMENTALS_CONFIDENCE: f64 = 0.90;
const MARKET_CONFIDENCE: f64 = 0.85;
const SEARCH_LIMIT: usize = 10;

const CAPABILITIES: CapabilitySet = CapabilitySet::new(&[
    Capability::News,
    Capability::Fundamentals,
    Capability::MarketData,
    Capability::InsiderTrading,
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Endpoint {
    Metric,
    Profile,
    Quote,
}

impl Endpoint {
    const fn path(self) -> &'static str {
        match self {
            Self::Metric => "stock/metric",
            Self::Profile => "stock/profile2",
            Self::Quote => "quote",
        }
    }

    const fn extra_query(self) -> &'static str {
        match self {
            Self::Metric => "&metric=all",
            Self::Profile | Self::Quote => "",
        }
    }
}

/// Field mapping with a scale into the concept's canonical unit. Finnhub
/// reports capitalization and share counts in millions and yields in percent.
struct FieldMapping {
    concept: &'static str,
    endpoint: Endpoint,
    field: &'static str,
    scale: f64,
}

const fn map(
    concept: &'static str,
    endpoint: Endpoint,
    field: &'static str,
    scale: f64,
) -> FieldMapping {
    FieldMapping {
        concept,
        endpoint,
        field,
        scale,
    }
}

const FIELD_MAPPINGS: &[FieldMapping] = &[
    map("market_cap", Endpoint::Metric, "marketCapitalization", 1e6),
    map("pe_ratio", Endpoint::Metric, "peNormalizedAnnual", 1.0),
    map("pb_ratio", Endpoint::Metric, "pbAnnual", 1.0),
    map("eps", Endpoint::Metric, "epsAnnual", 1.0),
    map("book_value", Endpoint::Metric, "bookValuePerShareAnnual", 1.0),
    map("dividend_yield", Endpoint::Metric, "currentDividendYieldTTM", 0.01),
    map("profit_margin", Endpoint::Metric, "netProfitMarginTTM", 0.01),
    map("beta", Endpoint::Metric, "beta", 1.0),
    map("week_52_high", Endpoint::Metric, "52WeekHigh", 1.0),
    map("week_52_low", Endpoint::Metric, "52WeekLow", 1.0),
    map("shares_outstanding", Endpoint::Profile, "shareOutstanding", 1e6),
    map("price", Endpoint::Quote, "c", 1.0),
    map("open", Endpoint::Quote, "o", 1.0),
    map("previous_close", Endpoint::Quote, "pc", 1.0),
    map("day_high", Endpoint::Quote, "h", 1.0),
    map("day_low", Endpoint::Quote, "l", 1.0),
];

fn mapping(concept: &Concept) -> Option<&'static FieldMapping> {
    FIELD_MAPPINGS
        .iter()
        .find(|mapping| mapping.concept == concept.as_str())
}

/// Finnhub adapter: metrics, profile and quote snapshots.
pub struct FinnhubAdapter {
    http_client: Arc<dyn HttpClient>,
    guard: SourceGuard,
    auth: HttpAuth,
    base_url: String,
}

impl FinnhubAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            guard: SourceGuard::new(ProviderPolicy::finnhub_default()),
            auth: HttpAuth::Header {
                name: String::from(TOKEN_HEADER),
                value: api_key.into(),
            },
            base_url: String::from(BASE_URL),
        }
    }

    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.guard = SourceGuard::new(policy);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    fn has_key(&self) -> bool {
        matches!(&self.auth, HttpAuth::Header { value, .. } if !value.trim().is_empty())
    }

    fn url(&self, path: &str, query: &str) -> String {
        format!("{}/{path}?{query}", self.base_url)
    }

    async fn call(&self, url: &str) -> Result<String, SourceError> {
        let request = HttpRequest::get(url)
            .with_auth(&self.auth)
            .with_timeout(self.guard.call_timeout());
        let body = execute_get(self.http_client.as_ref(), SourceId::Finnhub, request).await?;
        let body = ensure_json(SourceId::Finnhub, body)?;
        check_error(&body)?;
        Ok(body)
    }

    async fn load(&self, ticker: &Ticker, endpoint: Endpoint) -> Result<CachedBody, SourceError> {
        let url = self.url(
            endpoint.path(),
            &format!(
                "symbol={}{}",
                urlencoding::encode(ticker.as_str()),
                endpoint.extra_query()
            ),
        );
        self.guard
            .load(
                CacheKey::new(ticker.as_str(), endpoint.path(), "current"),
                None,
                || self.call(&url),
            )
            .await
    }

    async fn fetch_endpoints(&self, req: FetchRequest) -> Result<FetchOutcome, SourceError> {
        if !req.period.is_latest() {
            return Ok(FetchOutcome::default());
        }

        let mut groups: Vec<(Endpoint, Vec<(&Concept, &'static FieldMapping)>)> = Vec::new();
        for concept in &req.concepts {
            let Some(mapping) = mapping(concept) else {
                continue;
            };
            match groups.iter_mut().find(|(endpoint, _)| *endpoint == mapping.endpoint) {
                Some((_, concepts)) => concepts.push((concept, mapping)),
                None => groups.push((mapping.endpoint, vec![(concept, mapping)])),
            }
        }
        groups.sort_by_key(|(endpoint, _)| *endpoint);

        let mut outcome = FetchOutcome::default();
        let mut loaded_any = false;
        let mut groups = groups.into_iter();
        while let Some((endpoint, concepts)) = groups.next() {
            let loaded = match self.load(&req.ticker, endpoint).await {
                Ok(loaded) => loaded,
                Err(error) if loaded_any => {
                    warn!(
                        source = %SourceId::Finnhub,
                        ticker = %req.ticker,
                        endpoint = endpoint.path(),
                        code = error.code(),
                        "returning partial result"
                    );
                    outcome.fail_all(concepts.iter().map(|(concept, _)| *concept), &error);
                    for (_, rest) in groups.by_ref() {
                        outcome.fail_all(rest.iter().map(|(concept, _)| *concept), &error);
                    }
                    break;
                }
                Err(error) => return Err(error),
            };
            loaded_any = true;

            let fields = extract_fields(endpoint, &loaded.body)?;
            let citation = Citation::Provider {
                endpoint: endpoint.path().to_owned(),
                url: self.url(
                    endpoint.path(),
                    &format!("symbol={}", urlencoding::encode(req.ticker.as_str())),
                ),
            };
            let (period, period_type, confidence) = match endpoint {
                Endpoint::Metric => ("ttm", PeriodType::Duration, FUNDAMENTALS_CONFIDENCE),
                Endpoint::Profile => ("current", PeriodType::Instant, FUNDAMENTALS_CONFIDENCE),
                Endpoint::Quote => ("current", PeriodType::Instant, MARKET_CONFIDENCE),
            };

            for (concept, mapping) in concepts {
                let Some(raw) = fields.get(mapping.field).and_then(Value::as_f64) else {
                    continue;
                };
                let value = raw * mapping.scale;
                if !value.is_finite() {
                    continue;
                }
                let point = DataPoint::new(
                    SourceId::Finnhub,
                    req.ticker.clone(),
                    concept.clone(),
                    value,
                    concept.unit().unwrap_or("USD"),
                    period,
                    period_type,
                    citation.clone(),
                    loaded.retrieved_at,
                    confidence,
                )
                .map_err(validation_to_error)?;
                outcome.points.push(point);
            }
        }
        Ok(outcome)
    }

    async fn symbol_search(&self, query: &str) -> Result<Vec<CompanyRef>, SourceError> {
        let url = self.url("search", &format!("q={}", urlencoding::encode(query.trim())));
        let body = self.call(&url).await?;
        let parsed: SearchResponse = parse_json(SourceId::Finnhub, &body)?;

        Ok(parsed
            .result
            .into_iter()
            .filter_map(|hit| {
                let ticker = Ticker::parse(&hit.symbol).ok()?;
                Some(CompanyRef {
                    ticker,
                    name: hit.description,
                    exchange: None,
                    source_id: SourceId::Finnhub,
                })
            })
            .take(SEARCH_LIMIT)
            .collect())
    }
}

fn check_error(body: &str) -> Result<(), SourceError> {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(body) else {
        return Ok(());
    };
    match object.get("error").and_then(Value::as_str) {
        Some(message) if message.to_ascii_lowercase().contains("limit") => Err(
            SourceError::rate_limited(format!("finnhub throttled the request: {message}")),
        ),
        Some(message) => Err(SourceError::unavailable(format!(
            "finnhub rejected the request: {message}"
        ))),
        None => Ok(()),
    }
}

/// Flattens one endpoint body into field values. Empty answers mean the
/// symbol is unknown to Finnhub.
fn extract_fields(endpoint: Endpoint, body: &str) -> Result<HashMap<String, Value>, SourceError> {
    let fields = match endpoint {
        Endpoint::Metric => {
            let metric: MetricResponse = parse_json(SourceId::Finnhub, body)?;
            metric.metric
        }
        Endpoint::Profile => parse_json(SourceId::Finnhub, body)?,
        Endpoint::Quote => {
            let quote: HashMap<String, Value> = parse_json(SourceId::Finnhub, body)?;
            let timestamp = quote.get("t").and_then(Value::as_i64).unwrap_or(0);
            if timestamp == 0 {
                HashMap::new()
            } else {
                quote
            }
        }
    };
    if fields.is_empty() {
        return Err(SourceError::not_found(format!(
            "finnhub {} has no data for symbol",
            endpoint.path()
        )));
    }
    Ok(fields)
}

impl DataSource for FinnhubAdapter {
    fn id(&self) -> SourceId {
        SourceId::Finnhub
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPABILITIES
    }

    fn confidence_for(&self, capability: Capability) -> f64 {
        match capability {
            Capability::Fundamentals | Capability::News | Capability::InsiderTrading => {
                FUNDAMENTALS_CONFIDENCE
            }
            Capability::MarketData => MARKET_CONFIDENCE,
            _ => 0.0,
        }
    }

    fn supports_concept(&self, concept: &Concept) -> bool {
        mapping(concept).is_some()
    }

    fn rate_limit(&self) -> RateLimit {
        self.guard.rate_limit()
    }

    fn fetch<'a>(
        &'a self,
        req: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FetchOutcome, SourceError>> + Send + 'a>> {
        Box::pin(self.fetch_endpoints(req))
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<CompanyRef>> + Send + 'a>> {
        Box::pin(self.guard.search(query, move || self.symbol_search(query)))
    }

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move { self.has_key() && self.guard.is_healthy() })
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.guard.close())
    }
}

#[derive(Debug, Deserialize)]
struct MetricResponse {
    #[serde(default)]
    metric: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    symbol: String,
    description: String,
}
