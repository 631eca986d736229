use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::adapters::{ensure_json, parse_json, validation_to_error};
use crate::cache::CacheKey;
use crate::data_source::{DataSource, FetchOutcome, FetchRequest, RateLimit, SourceError};
use crate::guard::{response_body, transport_error, SourceGuard};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::{
    Capability, CapabilitySet, Citation, ClassSeparator, CompanyRef, Concept, DataPoint,
    PeriodType, SourceId, Ticker, UtcDateTime,
};

const QUERY_BASE_URL: &str = "https://query1.finance.yahoo.com";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const REFERER: &str = "https://finance.yahoo.com/";
const CRUMB_TTL: Duration = Duration::from_secs(3_600);
const SEARCH_LIMIT: usize = 10;
const MARKET_CONFIDENCE: f64 = 0.80;
const FUNDAMENTALS_CONFIDENCE: f64 = 0.70;

const CAPABILITIES: CapabilitySet = CapabilitySet::new(&[
    Capability::MarketData,
    Capability::RealTime,
    Capability::Historical,
    Capability::Fundamentals,
]);

struct QuoteField {
    concept: &'static str,
    capability: Capability,
    period: &'static str,
    period_type: PeriodType,
}

const fn field(
    concept: &'static str,
    capability: Capability,
    period: &'static str,
    period_type: PeriodType,
) -> QuoteField {
    QuoteField {
        concept,
        capability,
        period,
        period_type,
    }
}

const QUOTE_FIELDS: &[QuoteField] = &[
    field("price", Capability::MarketData, "current", PeriodType::Instant),
    field("open", Capability::MarketData, "current", PeriodType::Instant),
    field("previous_close", Capability::MarketData, "current", PeriodType::Instant),
    field("day_high", Capability::MarketData, "current", PeriodType::Instant),
    field("day_low", Capability::MarketData, "current", PeriodType::Instant),
    field("volume", Capability::MarketData, "current", PeriodType::Duration),
    field("market_cap", Capability::Fundamentals, "current", PeriodType::Instant),
    field("shares_outstanding", Capability::Fundamentals, "current", PeriodType::Instant),
    field("pe_ratio", Capability::Fundamentals, "ttm", PeriodType::Duration),
    field("pb_ratio", Capability::Fundamentals, "current", PeriodType::Instant),
    field("eps", Capability::Fundamentals, "ttm", PeriodType::Duration),
    field("book_value", Capability::Fundamentals, "current", PeriodType::Instant),
    field("dividend_yield", Capability::Fundamentals, "ttm", PeriodType::Duration),
    field("week_52_high", Capability::Fundamentals, "ttm", PeriodType::Duration),
    field("week_52_low", Capability::Fundamentals, "ttm", PeriodType::Duration),
];

/// Cookie/crumb session required by Yahoo's quote endpoint.
///
/// The session cookie lives in the HTTP client's jar; the crumb is cached
/// here and passed as a query parameter. The mutex serializes refreshes.
#[derive(Debug, Default)]
struct YahooSession {
    crumb: Mutex<Option<(String, Instant)>>,
}

impl YahooSession {
    async fn crumb(
        &self,
        http_client: &dyn HttpClient,
        query_base_url: &str,
        timeout: Duration,
    ) -> Result<String, SourceError> {
        let mut cached = self.crumb.lock().await;
        if let Some((crumb, fetched_at)) = cached.as_ref() {
            if fetched_at.elapsed() < CRUMB_TTL {
                return Ok(crumb.clone());
            }
        }

        let cookie_request = HttpRequest::get(COOKIE_URL)
            .with_header("referer", REFERER)
            .with_timeout(timeout);
        http_client
            .execute(cookie_request)
            .await
            .map_err(|error| transport_error(SourceId::Yahoo, &error))?;

        let crumb_request = HttpRequest::get(format!("{query_base_url}/v1/test/getcrumb"))
            .with_header("referer", REFERER)
            .with_timeout(timeout);
        let response = http_client
            .execute(crumb_request)
            .await
            .map_err(|error| transport_error(SourceId::Yahoo, &error))?;
        let body = response_body(SourceId::Yahoo, response)?;
        let crumb = body.trim();

        let plausible = !crumb.is_empty()
            && crumb.len() < 100
            && !crumb.contains(' ')
            && !crumb.contains('<');
        if !plausible {
            return Err(SourceError::unavailable("yahoo returned no usable crumb"));
        }

        debug!("refreshed yahoo crumb");
        *cached = Some((crumb.to_owned(), Instant::now()));
        Ok(crumb.to_owned())
    }

    async fn invalidate(&self) {
        *self.crumb.lock().await = None;
    }
}

/// Yahoo Finance quote adapter (current snapshot only).
pub struct YahooAdapter {
    http_client: Arc<dyn HttpClient>,
    guard: SourceGuard,
    session: YahooSession,
    query_base_url: String,
}

impl YahooAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            guard: SourceGuard::new(ProviderPolicy::yahoo_default()),
            session: YahooSession::default(),
            query_base_url: String::from(QUERY_BASE_URL),
        }
    }

    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.guard = SourceGuard::new(policy);
        self
    }

    pub fn with_base_url(mut self, query_base_url: impl Into<String>) -> Self {
        self.query_base_url = query_base_url.into().trim_end_matches('/').to_owned();
        self
    }

    fn quote_url(&self, ticker: &Ticker, crumb: &str) -> String {
        format!(
            "{}/v7/finance/quote?symbols={}&crumb={}",
            self.query_base_url,
            urlencoding::encode(&ticker.provider_symbol(ClassSeparator::Dash)),
            urlencoding::encode(crumb)
        )
    }

    /// Quote call with one crumb refresh on 401.
    async fn quote_body(&self, ticker: &Ticker) -> Result<String, SourceError> {
        let timeout = self.guard.call_timeout();
        let http = self.http_client.as_ref();

        let mut refreshed = false;
        loop {
            let crumb = self
                .session
                .crumb(http, &self.query_base_url, timeout)
                .await?;
            let request = HttpRequest::get(self.quote_url(ticker, &crumb))
                .with_header("referer", REFERER)
                .with_timeout(timeout);
            let response = http
                .execute(request)
                .await
                .map_err(|error| transport_error(SourceId::Yahoo, &error))?;

            if response.status == 401 && !refreshed {
                debug!(ticker = %ticker, "yahoo rejected crumb; refreshing");
                self.session.invalidate().await;
                refreshed = true;
                continue;
            }

            let body = response_body(SourceId::Yahoo, response)?;
            return ensure_json(SourceId::Yahoo, body);
        }
    }

    async fn fetch_quote(&self, req: FetchRequest) -> Result<Vec<DataPoint>, SourceError> {
        let wanted = req
            .concepts
            .iter()
            .filter_map(|concept| quote_field(concept).map(|field| (concept, field)))
            .collect::<Vec<_>>();
        if wanted.is_empty() || !req.period.is_latest() {
            return Ok(Vec::new());
        }

        let cached = self
            .guard
            .load(
                CacheKey::new(req.ticker.as_str(), "quote", "current"),
                None,
                || self.quote_body(&req.ticker),
            )
            .await?;

        let response: YahooQuoteResponse = parse_json(SourceId::Yahoo, &cached.body)?;
        if let Some(error) = response.quote_response.error.filter(|error| !error.is_null()) {
            return Err(SourceError::unavailable(format!("yahoo API error: {error}")));
        }
        let symbol = req.ticker.provider_symbol(ClassSeparator::Dash);
        let quote = response
            .quote_response
            .result
            .into_iter()
            .find(|quote| quote.symbol.eq_ignore_ascii_case(&symbol))
            .ok_or_else(|| {
                SourceError::not_found(format!("yahoo has no quote for '{}'", req.ticker))
            })?;

        let page = format!("https://finance.yahoo.com/quote/{symbol}");
        let delayed = quote.exchange_data_delayed_by.unwrap_or(0) > 0;
        let as_of = quote
            .regular_market_time
            .and_then(|seconds| UtcDateTime::from_unix_seconds(seconds).ok());

        let mut points = Vec::with_capacity(wanted.len());
        for (concept, field) in wanted {
            let Some(value) = quote.value(field.concept) else {
                continue;
            };
            let (citation, confidence) = match field.capability {
                Capability::MarketData => (
                    Citation::Quote {
                        delayed,
                        as_of,
                        url: page.clone(),
                    },
                    MARKET_CONFIDENCE,
                ),
                _ => (
                    Citation::Provider {
                        endpoint: String::from("v7/finance/quote"),
                        url: page.clone(),
                    },
                    FUNDAMENTALS_CONFIDENCE,
                ),
            };

            let point = DataPoint::new(
                SourceId::Yahoo,
                req.ticker.clone(),
                concept.clone(),
                value,
                concept.unit().unwrap_or("USD"),
                field.period,
                field.period_type,
                citation,
                cached.retrieved_at,
                confidence,
            )
            .map_err(validation_to_error)?;
            points.push(point);
        }

        Ok(points)
    }

    async fn search_quotes(&self, query: &str) -> Result<Vec<CompanyRef>, SourceError> {
        let url = format!(
            "{}/v1/finance/search?q={}&quotesCount={}&newsCount=0",
            self.query_base_url,
            urlencoding::encode(query.trim()),
            SEARCH_LIMIT
        );
        let request = HttpRequest::get(url)
            .with_header("referer", REFERER)
            .with_timeout(self.guard.call_timeout());
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| transport_error(SourceId::Yahoo, &error))?;
        let body = response_body(SourceId::Yahoo, response)?;
        let parsed: YahooSearchResponse = parse_json(SourceId::Yahoo, &body)?;

        Ok(parsed
            .quotes
            .into_iter()
            .filter_map(|hit| {
                let ticker = Ticker::parse(&hit.symbol).ok()?;
                let name = hit.long_name.or(hit.short_name)?;
                Some(CompanyRef {
                    ticker,
                    name,
                    exchange: hit.exchange,
                    source_id: SourceId::Yahoo,
                })
            })
            .take(SEARCH_LIMIT)
            .collect())
    }
}

fn quote_field(concept: &Concept) -> Option<&'static QuoteField> {
    QUOTE_FIELDS
        .iter()
        .find(|field| field.concept == concept.as_str())
}

impl DataSource for YahooAdapter {
    fn id(&self) -> SourceId {
        SourceId::Yahoo
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPABILITIES
    }

    fn confidence_for(&self, capability: Capability) -> f64 {
        match capability {
            Capability::Fundamentals => FUNDAMENTALS_CONFIDENCE,
            other if CAPABILITIES.contains(other) => MARKET_CONFIDENCE,
            _ => 0.0,
        }
    }

    fn supports_concept(&self, concept: &Concept) -> bool {
        quote_field(concept).is_some()
    }

    fn rate_limit(&self) -> RateLimit {
        self.guard.rate_limit()
    }

    fn fetch<'a>(
        &'a self,
        req: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FetchOutcome, SourceError>> + Send + 'a>> {
        Box::pin(async move { self.fetch_quote(req).await.map(FetchOutcome::complete) })
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<CompanyRef>> + Send + 'a>> {
        Box::pin(self.guard.search(query, move || self.search_quotes(query)))
    }

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move { self.guard.is_healthy() })
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.guard.close().await;
            self.session.invalidate().await;
        })
    }
}

#[derive(Debug, Deserialize)]
struct YahooQuoteResponse {
    #[serde(rename = "quoteResponse")]
    quote_response: YahooQuoteEnvelope,
}

#[derive(Debug, Deserialize)]
struct YahooQuoteEnvelope {
    #[serde(default)]
    result: Vec<YahooQuote>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooQuote {
    symbol: String,
    regular_market_price: Option<f64>,
    regular_market_open: Option<f64>,
    regular_market_previous_close: Option<f64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    regular_market_volume: Option<f64>,
    market_cap: Option<f64>,
    shares_outstanding: Option<f64>,
    #[serde(rename = "trailingPE")]
    trailing_pe: Option<f64>,
    price_to_book: Option<f64>,
    eps_trailing_twelve_months: Option<f64>,
    book_value: Option<f64>,
    trailing_annual_dividend_yield: Option<f64>,
    fifty_two_week_high: Option<f64>,
    fifty_two_week_low: Option<f64>,
    exchange_data_delayed_by: Option<i64>,
    regular_market_time: Option<i64>,
}

impl YahooQuote {
    fn value(&self, concept: &str) -> Option<f64> {
        let value = match concept {
            "price" => self.regular_market_price,
            "open" => self.regular_market_open,
            "previous_close" => self.regular_market_previous_close,
            "day_high" => self.regular_market_day_high,
            "day_low" => self.regular_market_day_low,
            "volume" => self.regular_market_volume,
            "market_cap" => self.market_cap,
            "shares_outstanding" => self.shares_outstanding,
            "pe_ratio" => self.trailing_pe,
            "pb_ratio" => self.price_to_book,
            "eps" => self.eps_trailing_twelve_months,
            "book_value" => self.book_value,
            "dividend_yield" => self.trailing_annual_dividend_yield,
            "week_52_high" => self.fifty_two_week_high,
            "week_52_low" => self.fifty_two_week_low,
            _ => None,
        };
        value.filter(|value| value.is_finite())
    }
}

#[derive(Debug, Deserialize)]
struct YahooSearchResponse {
    #[serde(default)]
    quotes: Vec<YahooSearchHit>,
}

#[derive(Debug, Deserialize)]
struct YahooSearchHit {
    symbol: String,
    #[serde(rename = "shortname")]
    short_name: Option<String>,
    #[serde(rename = "longname")]
    long_name: Option<String>,
    #[serde(rename = "exchDisp")]
    exchange: Option<String>,
}
