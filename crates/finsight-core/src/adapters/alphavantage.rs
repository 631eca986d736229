use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::adapters::{ensure_json, parse_json, parse_number, validation_to_error};
use crate::cache::CacheKey;
use crate::data_source::{DataSource, FetchOutcome, FetchRequest, RateLimit, SourceError};
use crate::guard::{execute_get, CachedBody, SourceGuard};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::{
    Capability, CapabilitySet, Citation, CompanyRef, Concept, DataPoint, Period, PeriodType,
    SourceId, Ticker, UtcDateTime,
};

const BASE_URL: &str = "https://www.alphavantage.co";
const FUNDAMENTALS_CONFIDENCE: f64 = 0.85;
const MARKET_CONFIDENCE: f64 = 0.75;
const SEARCH_LIMIT: usize = 10;

const CAPABILITIES: CapabilitySet = CapabilitySet::new(&[
    Capability::Fundamentals,
    Capability::Earnings,
    Capability::MarketData,
]);

/// Alpha Vantage `function=` endpoints, in the order a fetch visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Function {
    Overview,
    IncomeStatement,
    BalanceSheet,
    CashFlow,
    Earnings,
    GlobalQuote,
}

impl Function {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Overview => "OVERVIEW",
            Self::IncomeStatement => "INCOME_STATEMENT",
            Self::BalanceSheet => "BALANCE_SHEET",
            Self::CashFlow => "CASH_FLOW",
            Self::Earnings => "EARNINGS",
            Self::GlobalQuote => "GLOBAL_QUOTE",
        }
    }

    const fn period_type(self) -> PeriodType {
        match self {
            Self::BalanceSheet | Self::GlobalQuote => PeriodType::Instant,
            _ => PeriodType::Duration,
        }
    }

    /// Overview and quote snapshots have no history.
    fn serves(self, period: Period) -> bool {
        match self {
            Self::Overview | Self::GlobalQuote => period.is_latest(),
            Self::IncomeStatement | Self::BalanceSheet | Self::CashFlow | Self::Earnings => {
                !matches!(period, Period::FiscalQuarter { .. })
            }
        }
    }
}

struct FieldMapping {
    concept: &'static str,
    function: Function,
    field: &'static str,
}

const fn map(concept: &'static str, function: Function, field: &'static str) -> FieldMapping {
    FieldMapping {
        concept,
        function,
        field,
    }
}

const FIELD_MAPPINGS: &[FieldMapping] = &[
    map("market_cap", Function::Overview, "MarketCapitalization"),
    map("pe_ratio", Function::Overview, "PERatio"),
    map("pb_ratio", Function::Overview, "PriceToBookRatio"),
    map("book_value", Function::Overview, "BookValue"),
    map("dividend_yield", Function::Overview, "DividendYield"),
    map("eps", Function::Overview, "EPS"),
    map("profit_margin", Function::Overview, "ProfitMargin"),
    map("week_52_high", Function::Overview, "52WeekHigh"),
    map("week_52_low", Function::Overview, "52WeekLow"),
    map("beta", Function::Overview, "Beta"),
    map("shares_outstanding", Function::Overview, "SharesOutstanding"),
    map("revenue", Function::IncomeStatement, "totalRevenue"),
    map("gross_profit", Function::IncomeStatement, "grossProfit"),
    map("operating_income", Function::IncomeStatement, "operatingIncome"),
    map("net_income", Function::IncomeStatement, "netIncome"),
    map("ebitda", Function::IncomeStatement, "ebitda"),
    map("total_assets", Function::BalanceSheet, "totalAssets"),
    map("total_liabilities", Function::BalanceSheet, "totalLiabilities"),
    map("shareholders_equity", Function::BalanceSheet, "totalShareholderEquity"),
    map("current_assets", Function::BalanceSheet, "totalCurrentAssets"),
    map("current_liabilities", Function::BalanceSheet, "totalCurrentLiabilities"),
    map(
        "cash_and_equivalents",
        Function::BalanceSheet,
        "cashAndCashEquivalentsAtCarryingValue",
    ),
    map("total_debt", Function::BalanceSheet, "shortLongTermDebtTotal"),
    map("operating_cash_flow", Function::CashFlow, "operatingCashflow"),
    map("reported_eps", Function::Earnings, "reportedEPS"),
    map("estimated_eps", Function::Earnings, "estimatedEPS"),
    map("price", Function::GlobalQuote, "05. price"),
    map("open", Function::GlobalQuote, "02. open"),
    map("day_high", Function::GlobalQuote, "03. high"),
    map("day_low", Function::GlobalQuote, "04. low"),
    map("volume", Function::GlobalQuote, "06. volume"),
    map("previous_close", Function::GlobalQuote, "08. previous close"),
];

fn mapping(concept: &Concept) -> Option<&'static FieldMapping> {
    FIELD_MAPPINGS
        .iter()
        .find(|mapping| mapping.concept == concept.as_str())
}

type Record = HashMap<String, Value>;

fn record_number(record: &Record, field: &str) -> Option<f64> {
    match record.get(field)? {
        Value::String(raw) => parse_number(raw),
        Value::Number(number) => number.as_f64().filter(|value| value.is_finite()),
        _ => None,
    }
}

fn record_str<'r>(record: &'r Record, field: &str) -> Option<&'r str> {
    record.get(field).and_then(Value::as_str)
}

/// Alpha Vantage adapter. Free keys allow 5 calls per minute, so one fetch
/// issues at most one call per endpoint and keeps whatever it resolved when
/// a later endpoint is throttled.
pub struct AlphaVantageAdapter {
    http_client: Arc<dyn HttpClient>,
    guard: SourceGuard,
    api_key: String,
    base_url: String,
}

impl AlphaVantageAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            http_client,
            guard: SourceGuard::new(ProviderPolicy::alphavantage_default()),
            api_key: api_key.into(),
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

    /// Public URL used in citations; never carries the key.
    fn public_url(&self, function: &str, query: &str) -> String {
        format!("{}/query?function={function}&{query}", self.base_url)
    }

    async fn call(&self, function: &str, query: &str) -> Result<String, SourceError> {
        let url = format!(
            "{}&apikey={}",
            self.public_url(function, query),
            urlencoding::encode(&self.api_key)
        );
        let request = HttpRequest::get(url).with_timeout(self.guard.call_timeout());
        let body = execute_get(self.http_client.as_ref(), SourceId::AlphaVantage, request).await?;
        let body = ensure_json(SourceId::AlphaVantage, body)?;
        check_notices(&body)?;
        Ok(body)
    }

    async fn load(&self, ticker: &Ticker, function: Function) -> Result<CachedBody, SourceError> {
        let query = format!("symbol={}", urlencoding::encode(ticker.as_str()));
        self.guard
            .load(
                CacheKey::new(ticker.as_str(), function.as_str(), ""),
                None,
                || self.call(function.as_str(), &query),
            )
            .await
    }

    async fn fetch_functions(&self, req: FetchRequest) -> Result<FetchOutcome, SourceError> {
        let mut groups: Vec<(Function, Vec<(&Concept, &'static FieldMapping)>)> = Vec::new();
        for concept in &req.concepts {
            let Some(mapping) = mapping(concept) else {
                continue;
            };
            if !mapping.function.serves(req.period) {
                continue;
            }
            match groups.iter_mut().find(|(function, _)| *function == mapping.function) {
                Some((_, concepts)) => concepts.push((concept, mapping)),
                None => groups.push((mapping.function, vec![(concept, mapping)])),
            }
        }
        groups.sort_by_key(|(function, _)| *function);

        let mut outcome = FetchOutcome::default();
        let mut loaded_any = false;
        let mut groups = groups.into_iter();
        while let Some((function, concepts)) = groups.next() {
            let loaded = match self.load(&req.ticker, function).await {
                Ok(loaded) => loaded,
                Err(error) if loaded_any => {
                    warn!(
                        source = %SourceId::AlphaVantage,
                        ticker = %req.ticker,
                        function = function.as_str(),
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

            let Some((record, period)) = select_record(function, &loaded.body, req.period)? else {
                continue;
            };
            let url = self.public_url(
                function.as_str(),
                &format!("symbol={}", urlencoding::encode(req.ticker.as_str())),
            );
            for (concept, mapping) in concepts {
                let Some(value) = record_number(&record, mapping.field) else {
                    continue;
                };
                outcome.points.push(self.point(
                    &req.ticker,
                    concept,
                    value,
                    &period,
                    function,
                    &url,
                    loaded.retrieved_at,
                )?);
            }
        }
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn point(
        &self,
        ticker: &Ticker,
        concept: &Concept,
        value: f64,
        period: &str,
        function: Function,
        url: &str,
        retrieved_at: UtcDateTime,
    ) -> Result<DataPoint, SourceError> {
        let confidence = if function == Function::GlobalQuote {
            MARKET_CONFIDENCE
        } else {
            FUNDAMENTALS_CONFIDENCE
        };
        DataPoint::new(
            SourceId::AlphaVantage,
            ticker.clone(),
            concept.clone(),
            value,
            concept.unit().unwrap_or("USD"),
            period,
            function.period_type(),
            Citation::Provider {
                endpoint: function.as_str().to_owned(),
                url: url.to_owned(),
            },
            retrieved_at,
            confidence,
        )
        .map_err(validation_to_error)
    }

    async fn symbol_search(&self, query: &str) -> Result<Vec<CompanyRef>, SourceError> {
        let keywords = format!("keywords={}", urlencoding::encode(query.trim()));
        let body = self.call("SYMBOL_SEARCH", &keywords).await?;
        let parsed: SymbolSearchResponse = parse_json(SourceId::AlphaVantage, &body)?;

        Ok(parsed
            .best_matches
            .iter()
            .filter_map(|hit| {
                let ticker = Ticker::parse(record_str(hit, "1. symbol")?).ok()?;
                Some(CompanyRef {
                    ticker,
                    name: record_str(hit, "2. name")?.to_owned(),
                    exchange: record_str(hit, "4. region").map(str::to_owned),
                    source_id: SourceId::AlphaVantage,
                })
            })
            .take(SEARCH_LIMIT)
            .collect())
    }
}

/// Phrases Alpha Vantage uses when a key has run out of call budget.
const THROTTLE_PHRASES: &[&str] = &[
    "call frequency",
    "rate limit",
    "requests per",
    "calls per",
    "per minute",
    "per day",
];

/// Alpha Vantage answers throttling, bad symbols and plan problems with HTTP 200.
///
/// `Error Message` is a bad symbol unless it complains about the key. `Note`
/// and `Information` are throttling only when they talk about call budget;
/// premium-only endpoints and key problems are unavailable and not worth
/// retrying.
fn check_notices(body: &str) -> Result<(), SourceError> {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(body) else {
        return Ok(());
    };
    if let Some(message) = object.get("Error Message").and_then(Value::as_str) {
        if message.to_ascii_lowercase().contains("apikey") {
            return Err(SourceError::unavailable(format!(
                "alphavantage rejected the api key: {message}"
            ))
            .non_retryable());
        }
        return Err(SourceError::not_found(format!(
            "alphavantage rejected the request: {message}"
        )));
    }
    for notice in ["Note", "Information"] {
        let Some(message) = object.get(notice).and_then(Value::as_str) else {
            continue;
        };
        let lowered = message.to_ascii_lowercase();
        if THROTTLE_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
            return Err(SourceError::rate_limited(format!(
                "alphavantage throttled the request: {message}"
            )));
        }
        return Err(SourceError::unavailable(format!(
            "alphavantage refused the request: {message}"
        ))
        .non_retryable());
    }
    Ok(())
}

/// Picks the record and period label answering `period` for one endpoint.
fn select_record(
    function: Function,
    body: &str,
    period: Period,
) -> Result<Option<(Record, String)>, SourceError> {
    match function {
        Function::Overview => {
            let overview: Record = parse_json(SourceId::AlphaVantage, body)?;
            if record_str(&overview, "Symbol").is_none() {
                return Err(SourceError::not_found("alphavantage has no overview for symbol"));
            }
            Ok(Some((overview, String::from("ttm"))))
        }
        Function::GlobalQuote => {
            let quote: GlobalQuoteResponse = parse_json(SourceId::AlphaVantage, body)?;
            if quote.global_quote.is_empty() {
                return Err(SourceError::not_found("alphavantage has no quote for symbol"));
            }
            Ok(Some((quote.global_quote, String::from("current"))))
        }
        Function::IncomeStatement | Function::BalanceSheet | Function::CashFlow => {
            let statement: StatementResponse = parse_json(SourceId::AlphaVantage, body)?;
            Ok(pick_annual(statement.annual_reports, period))
        }
        Function::Earnings => {
            let earnings: EarningsResponse = parse_json(SourceId::AlphaVantage, body)?;
            match period {
                Period::Latest => Ok(earnings
                    .quarterly_earnings
                    .into_iter()
                    .next()
                    .map(|record| {
                        let label = quarter_label(&record);
                        (record, label)
                    })),
                _ => Ok(pick_annual(earnings.annual_earnings, period)),
            }
        }
    }
}

fn fiscal_year(record: &Record) -> Option<i32> {
    record_str(record, "fiscalDateEnding")?
        .get(..4)?
        .parse()
        .ok()
}

fn pick_annual(reports: Vec<Record>, period: Period) -> Option<(Record, String)> {
    let report = match period {
        Period::Latest => reports.into_iter().max_by(|left, right| {
            record_str(left, "fiscalDateEnding").cmp(&record_str(right, "fiscalDateEnding"))
        })?,
        Period::FiscalYear(year) => reports
            .into_iter()
            .find(|report| fiscal_year(report) == Some(year))?,
        Period::FiscalQuarter { .. } => return None,
    };
    let label = fiscal_year(&report)?.to_string();
    Some((report, label))
}

fn quarter_label(record: &Record) -> String {
    record_str(record, "fiscalDateEnding")
        .and_then(|date| {
            let year = date.get(..4)?;
            let month: u32 = date.get(5..7)?.parse().ok()?;
            Some(format!("{year}-Q{}", (month + 2) / 3))
        })
        .unwrap_or_else(|| String::from("latest"))
}

impl DataSource for AlphaVantageAdapter {
    fn id(&self) -> SourceId {
        SourceId::AlphaVantage
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPABILITIES
    }

    fn confidence_for(&self, capability: Capability) -> f64 {
        match capability {
            Capability::Fundamentals | Capability::Earnings => FUNDAMENTALS_CONFIDENCE,
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
        Box::pin(self.fetch_functions(req))
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<CompanyRef>> + Send + 'a>> {
        Box::pin(self.guard.search(query, move || self.symbol_search(query)))
    }

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move { !self.api_key.trim().is_empty() && self.guard.is_healthy() })
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.guard.close())
    }
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    #[serde(default, rename = "annualReports")]
    annual_reports: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct EarningsResponse {
    #[serde(default, rename = "annualEarnings")]
    annual_earnings: Vec<Record>,
    #[serde(default, rename = "quarterlyEarnings")]
    quarterly_earnings: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(default, rename = "Global Quote")]
    global_quote: Record,
}

#[derive(Debug, Deserialize)]
struct SymbolSearchResponse {
    #[serde(default, rename = "bestMatches")]
    best_matches: Vec<Record>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::CannedHttpClient;

    const OVERVIEW: &str = r#"{
        "Symbol": "IBM",
        "MarketCapitalization": "175000000000",
        "PERatio": "22.5",
        "DividendYield": "0.0385",
        "EPS": "8.14",
        "Beta": "None",
        "LatestQuarter": "2024-03-31"
    }"#;

    const INCOME: &str = r#"{
        "symbol": "IBM",
        "annualReports": [
            {"fiscalDateEnding": "2023-12-31", "totalRevenue": "61860000000", "netIncome": "7502000000"},
            {"fiscalDateEnding": "2022-12-31", "totalRevenue": "60530000000", "netIncome": "1639000000"}
        ],
        "quarterlyReports": []
    }"#;

    const EARNINGS: &str = r#"{
        "symbol": "IBM",
        "annualEarnings": [{"fiscalDateEnding": "2023-12-31", "reportedEPS": "9.62"}],
        "quarterlyEarnings": [
            {"fiscalDateEnding": "2024-03-31", "reportedEPS": "1.68", "estimatedEPS": "1.6"}
        ]
    }"#;

    const QUOTE: &str = r#"{
        "Global Quote": {"01. symbol": "IBM", "05. price": "183.8000", "06. volume": "3425000"}
    }"#;

    const SEARCH: &str = r#"{
        "bestMatches": [
            {"1. symbol": "IBM", "2. name": "International Business Machines Corp", "4. region": "United States"},
            {"1. symbol": "IBM.LON", "2. name": "International Business Machines Corp", "4. region": "United Kingdom"}
        ]
    }"#;

    fn canned() -> Arc<CannedHttpClient> {
        Arc::new(
            CannedHttpClient::new()
                .route("function=OVERVIEW", 200, OVERVIEW)
                .route("function=INCOME_STATEMENT", 200, INCOME)
                .route("function=EARNINGS", 200, EARNINGS)
                .route("function=GLOBAL_QUOTE", 200, QUOTE)
                .route("function=SYMBOL_SEARCH", 200, SEARCH),
        )
    }

    fn unthrottled(http: Arc<CannedHttpClient>) -> AlphaVantageAdapter {
        AlphaVantageAdapter::new(http, "demo-key")
            .with_policy(ProviderPolicy::unlimited(SourceId::AlphaVantage))
    }

    fn request(concepts: &[&str], period: Option<Period>) -> FetchRequest {
        FetchRequest::new(
            Ticker::parse("IBM").expect("ticker"),
            concepts
                .iter()
                .map(|name| Concept::parse(name).expect("concept"))
                .collect(),
            period,
        )
        .expect("request")
    }

    #[tokio::test]
    async fn maps_overview_fields_and_skips_placeholders() {
        let adapter = unthrottled(canned());
        let points = adapter
            .fetch(request(&["market_cap", "dividend_yield", "beta"], None))
            .await
            .expect("fetch")
            .points;

        assert_eq!(points.len(), 2, "Beta is 'None'");
        assert_eq!(points[0].value, 175_000_000_000.0);
        assert_eq!(points[0].period, "ttm");
        assert_eq!(points[0].confidence, 0.85);
        assert_eq!(points[1].value, 0.0385);
    }

    #[tokio::test]
    async fn citations_never_carry_the_api_key() {
        let http = canned();
        let adapter = unthrottled(http.clone());
        let points = adapter
            .fetch(request(&["revenue"], None))
            .await
            .expect("fetch")
            .points;

        assert!(!points[0].citation.url().contains("demo-key"));
        assert!(http.requests()[0].url.contains("apikey=demo-key"));
    }

    #[tokio::test]
    async fn statements_answer_latest_and_fiscal_year() {
        let adapter = unthrottled(canned());

        let latest = adapter
            .fetch(request(&["revenue"], None))
            .await
            .expect("latest")
            .points;
        assert_eq!(latest[0].value, 61_860_000_000.0);
        assert_eq!(latest[0].period, "2023");

        let fy2022 = adapter
            .fetch(request(&["net_income"], Some(Period::FiscalYear(2022))))
            .await
            .expect("fy2022")
            .points;
        assert_eq!(fy2022[0].value, 1_639_000_000.0);

        let quarter = adapter
            .fetch(request(
                &["revenue"],
                Some(Period::FiscalQuarter {
                    year: 2023,
                    quarter: 4,
                }),
            ))
            .await
            .expect("quarter")
            .points;
        assert!(quarter.is_empty());
    }

    #[tokio::test]
    async fn earnings_and_quote_are_mapped() {
        let adapter = unthrottled(canned());
        let points = adapter
            .fetch(request(&["reported_eps", "estimated_eps", "price"], None))
            .await
            .expect("fetch")
            .points;

        assert_eq!(points.len(), 3);
        assert_eq!(points[0].period, "2024-Q1");
        assert_eq!(points[1].value, 1.6);
        assert_eq!(points[2].value, 183.8);
        assert_eq!(points[2].confidence, 0.75);
    }

    #[tokio::test]
    async fn throttled_second_endpoint_reports_its_concepts_as_failed() {
        let http = canned();
        let adapter = AlphaVantageAdapter::new(http.clone(), "demo-key");

        let outcome = adapter
            .fetch(request(&["revenue", "net_income", "market_cap"], None))
            .await
            .expect("partial result");

        assert_eq!(outcome.points.len(), 1);
        assert_eq!(outcome.points[0].concept.as_str(), "market_cap");
        assert!(outcome.is_partial());
        let failed = outcome
            .failed
            .iter()
            .map(|(concept, error)| (concept.as_str(), error.kind()))
            .collect::<Vec<_>>();
        assert_eq!(
            failed,
            vec![
                ("revenue", SourceErrorKind::RateLimited),
                ("net_income", SourceErrorKind::RateLimited),
            ]
        );
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn throttle_note_maps_to_rate_limited() {
        let http = Arc::new(CannedHttpClient::new().route(
            "function=OVERVIEW",
            200,
            r#"{"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#,
        ));
        let adapter = unthrottled(http);

        let err = adapter
            .fetch(request(&["market_cap"], None))
            .await
            .expect_err("note");
        assert_eq!(err.kind(), SourceErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn daily_budget_information_maps_to_rate_limited() {
        let http = Arc::new(CannedHttpClient::new().route(
            "function=OVERVIEW",
            200,
            r#"{"Information": "We have detected your API key as DEMO and our standard API rate limit is 25 requests per day."}"#,
        ));
        let adapter = unthrottled(http);

        let err = adapter
            .fetch(request(&["market_cap"], None))
            .await
            .expect_err("daily budget");
        assert_eq!(err.kind(), SourceErrorKind::RateLimited);
        assert!(err.retryable());
    }

    #[tokio::test]
    async fn premium_and_key_notices_are_unavailable_without_retry() {
        let http = Arc::new(
            CannedHttpClient::new()
                .route(
                    "function=OVERVIEW",
                    200,
                    r#"{"Information": "Thank you for using Alpha Vantage! This is a premium endpoint. You may subscribe to any of the premium plans to instantly unlock all premium endpoints"}"#,
                )
                .route(
                    "function=INCOME_STATEMENT",
                    200,
                    r#"{"Error Message": "the parameter apikey is invalid or missing. Please claim your free API key."}"#,
                ),
        );
        let adapter = unthrottled(http);

        let premium = adapter
            .fetch(request(&["market_cap"], None))
            .await
            .expect_err("premium endpoint");
        assert_eq!(premium.kind(), SourceErrorKind::Unavailable);
        assert!(!premium.retryable());

        let bad_key = adapter
            .fetch(request(&["revenue"], None))
            .await
            .expect_err("invalid key");
        assert_eq!(bad_key.kind(), SourceErrorKind::Unavailable);
        assert!(!bad_key.retryable());
    }

    #[tokio::test]
    async fn error_message_and_empty_overview_are_not_found() {
        let http = Arc::new(
            CannedHttpClient::new()
                .route("function=OVERVIEW", 200, "{}")
                .route(
                    "function=INCOME_STATEMENT",
                    200,
                    r#"{"Error Message": "Invalid API call."}"#,
                ),
        );
        let adapter = unthrottled(http);

        let overview = adapter
            .fetch(request(&["market_cap"], None))
            .await
            .expect_err("empty overview");
        assert_eq!(overview.kind(), SourceErrorKind::NotFound);

        let income = adapter
            .fetch(request(&["revenue"], None))
            .await
            .expect_err("error message");
        assert_eq!(income.kind(), SourceErrorKind::NotFound);
    }

    #[tokio::test]
    async fn search_maps_best_matches() {
        let adapter = unthrottled(canned());
        let results = adapter.search("international business").await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].ticker.as_str(), "IBM");
        assert_eq!(results[1].exchange.as_deref(), Some("United Kingdom"));
    }

    #[tokio::test]
    async fn health_requires_an_api_key() {
        assert!(unthrottled(canned()).health_check().await);
        assert!(!AlphaVantageAdapter::new(canned(), " ").health_check().await);
    }
}
