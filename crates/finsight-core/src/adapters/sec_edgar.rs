use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::adapters::{ensure_json, parse_json, validation_to_error};
use crate::cache::CacheKey;
use crate::data_source::{DataSource, FetchOutcome, FetchRequest, RateLimit, SourceError};
use crate::guard::{execute_get, SourceGuard};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;
use crate::{
    Capability, CapabilitySet, Citation, CompanyRef, Concept, DataPoint, Period, PeriodType,
    SourceId, Ticker, UtcDateTime,
};

const DEFAULT_USER_AGENT: &str = "finsight-federation admin@example.com";
const DATA_BASE_URL: &str = "https://data.sec.gov";
const WWW_BASE_URL: &str = "https://www.sec.gov";
const CONFIDENCE: f64 = 0.98;
const SEARCH_LIMIT: usize = 10;
const PERIODIC_FORMS: [&str; 4] = ["10-K", "10-Q", "10-K/A", "10-Q/A"];

const CAPABILITIES: CapabilitySet =
    CapabilitySet::new(&[Capability::Filings, Capability::Fundamentals]);

/// XBRL tag candidates per concept, tried in order.
struct FactTag {
    concept: &'static str,
    taxonomy: &'static str,
    tag: &'static str,
    unit: &'static str,
}

const fn tag(
    concept: &'static str,
    taxonomy: &'static str,
    tag: &'static str,
    unit: &'static str,
) -> FactTag {
    FactTag {
        concept,
        taxonomy,
        tag,
        unit,
    }
}

const FACT_TAGS: &[FactTag] = &[
    tag("revenue", "us-gaap", "Revenues", "USD"),
    tag(
        "revenue",
        "us-gaap",
        "RevenueFromContractWithCustomerExcludingAssessedTax",
        "USD",
    ),
    tag("revenue", "us-gaap", "SalesRevenueNet", "USD"),
    tag("net_income", "us-gaap", "NetIncomeLoss", "USD"),
    tag("gross_profit", "us-gaap", "GrossProfit", "USD"),
    tag("operating_income", "us-gaap", "OperatingIncomeLoss", "USD"),
    tag("eps", "us-gaap", "EarningsPerShareDiluted", "USD/shares"),
    tag("eps", "us-gaap", "EarningsPerShareBasic", "USD/shares"),
    tag("total_assets", "us-gaap", "Assets", "USD"),
    tag("total_liabilities", "us-gaap", "Liabilities", "USD"),
    tag("shareholders_equity", "us-gaap", "StockholdersEquity", "USD"),
    tag("current_assets", "us-gaap", "AssetsCurrent", "USD"),
    tag("current_liabilities", "us-gaap", "LiabilitiesCurrent", "USD"),
    tag(
        "cash_and_equivalents",
        "us-gaap",
        "CashAndCashEquivalentsAtCarryingValue",
        "USD",
    ),
    tag("total_debt", "us-gaap", "LongTermDebt", "USD"),
    tag(
        "operating_cash_flow",
        "us-gaap",
        "NetCashProvidedByUsedInOperatingActivities",
        "USD",
    ),
    tag(
        "shares_outstanding",
        "dei",
        "EntityCommonStockSharesOutstanding",
        "shares",
    ),
];

/// SEC EDGAR XBRL company-facts adapter.
///
/// Resolves tickers to CIKs through `company_tickers.json`, then reads
/// `companyfacts` once per ticker and answers every requested concept and
/// period from that document.
pub struct SecEdgarAdapter {
    http_client: Arc<dyn HttpClient>,
    guard: SourceGuard,
    user_agent: String,
    data_base_url: String,
    www_base_url: String,
    cik_index: RwLock<Option<(UtcDateTime, Arc<CikIndex>)>>,
}

impl SecEdgarAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            guard: SourceGuard::new(ProviderPolicy::sec_edgar_default()),
            user_agent: String::from(DEFAULT_USER_AGENT),
            data_base_url: String::from(DATA_BASE_URL),
            www_base_url: String::from(WWW_BASE_URL),
            cik_index: RwLock::new(None),
        }
    }

    /// SEC fair-access rules require a descriptive agent with contact info.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_policy(mut self, policy: ProviderPolicy) -> Self {
        self.guard = SourceGuard::new(policy);
        self
    }

    pub fn with_base_urls(
        mut self,
        data_base_url: impl Into<String>,
        www_base_url: impl Into<String>,
    ) -> Self {
        self.data_base_url = data_base_url.into().trim_end_matches('/').to_owned();
        self.www_base_url = www_base_url.into().trim_end_matches('/').to_owned();
        self
    }

    async fn get_json(&self, url: String) -> Result<String, SourceError> {
        let request = HttpRequest::get(url)
            .with_header("user-agent", self.user_agent.as_str())
            .with_header("accept", "application/json")
            .with_timeout(self.guard.call_timeout());
        let body = execute_get(self.http_client.as_ref(), SourceId::SecEdgar, request).await?;
        ensure_json(SourceId::SecEdgar, body)
    }

    async fn cik_index(&self) -> Result<Arc<CikIndex>, SourceError> {
        let url = format!("{}/files/company_tickers.json", self.www_base_url);
        let ttl = self.guard.policy().search_cache_ttl;
        let cached = self
            .guard
            .load(CacheKey::new("*", "company_tickers", ""), Some(ttl), || {
                self.get_json(url.clone())
            })
            .await?;

        if let Some((retrieved_at, index)) = self.cik_index.read().await.as_ref() {
            if *retrieved_at == cached.retrieved_at {
                return Ok(Arc::clone(index));
            }
        }

        let index = Arc::new(CikIndex::parse(&cached.body)?);
        debug!(entries = index.entries.len(), "parsed sec ticker index");
        *self.cik_index.write().await = Some((cached.retrieved_at, Arc::clone(&index)));
        Ok(index)
    }

    async fn fetch_facts(&self, req: FetchRequest) -> Result<Vec<DataPoint>, SourceError> {
        if !req.concepts.iter().any(|concept| self.supports_concept(concept)) {
            return Ok(Vec::new());
        }

        let index = self.cik_index().await?;
        let entry = index.lookup(&req.ticker).ok_or_else(|| {
            SourceError::not_found(format!("no SEC CIK is registered for '{}'", req.ticker))
        })?;

        let url = format!(
            "{}/api/xbrl/companyfacts/CIK{:010}.json",
            self.data_base_url, entry.cik
        );
        let cached = self
            .guard
            .load(
                CacheKey::new(req.ticker.as_str(), "companyfacts", ""),
                None,
                || self.get_json(url.clone()),
            )
            .await?;
        let document: CompanyFacts = parse_json(SourceId::SecEdgar, &cached.body)?;

        let mut points = Vec::with_capacity(req.concepts.len());
        for concept in &req.concepts {
            let Some((mapping, fact)) = document.find(concept, req.period) else {
                debug!(
                    ticker = %req.ticker,
                    concept = %concept,
                    period = %req.period,
                    "no sec fact"
                );
                continue;
            };

            let period_type = if fact.start.is_some() {
                PeriodType::Duration
            } else {
                PeriodType::Instant
            };
            let citation = Citation::Filing {
                form: fact.form.clone(),
                accession_number: fact.accn.clone(),
                filed: fact.filed.clone(),
                url: format!(
                    "{}/Archives/edgar/data/{}/{}/",
                    self.www_base_url,
                    entry.cik,
                    fact.accn.replace('-', "")
                ),
            };

            let point = DataPoint::new(
                SourceId::SecEdgar,
                req.ticker.clone(),
                concept.clone(),
                fact.val,
                concept.unit().unwrap_or(mapping.unit),
                fact.period_label(),
                period_type,
                citation,
                cached.retrieved_at,
                CONFIDENCE,
            )
            .map_err(validation_to_error)?;
            points.push(point);
        }

        Ok(points)
    }

    async fn search_index(&self, query: &str) -> Result<Vec<CompanyRef>, SourceError> {
        let index = self.cik_index().await?;
        Ok(index.search(query, SEARCH_LIMIT))
    }
}

impl DataSource for SecEdgarAdapter {
    fn id(&self) -> SourceId {
        SourceId::SecEdgar
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPABILITIES
    }

    fn confidence_for(&self, capability: Capability) -> f64 {
        if CAPABILITIES.contains(capability) {
            CONFIDENCE
        } else {
            0.0
        }
    }

    fn supports_concept(&self, concept: &Concept) -> bool {
        FACT_TAGS
            .iter()
            .any(|mapping| mapping.concept == concept.as_str())
    }

    fn rate_limit(&self) -> RateLimit {
        self.guard.rate_limit()
    }

    fn fetch<'a>(
        &'a self,
        req: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FetchOutcome, SourceError>> + Send + 'a>> {
        Box::pin(async move { self.fetch_facts(req).await.map(FetchOutcome::complete) })
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<CompanyRef>> + Send + 'a>> {
        Box::pin(async move {
            if query.trim().is_empty() {
                return Vec::new();
            }
            match self.search_index(query).await {
                Ok(results) => results,
                Err(error) => {
                    warn!(code = error.code(), error = %error.message(), "sec search failed");
                    Vec::new()
                }
            }
        })
    }

    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move { self.guard.is_healthy() && !self.user_agent.trim().is_empty() })
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.guard.close().await;
            *self.cik_index.write().await = None;
        })
    }
}

#[derive(Debug, Clone)]
struct CikEntry {
    cik: u64,
    ticker: String,
    title: String,
}

#[derive(Debug)]
struct CikIndex {
    entries: Vec<CikEntry>,
    by_ticker: HashMap<String, usize>,
}

#[derive(Debug, Deserialize)]
struct RawTickerEntry {
    cik_str: u64,
    ticker: String,
    title: String,
}

impl CikIndex {
    fn parse(body: &str) -> Result<Self, SourceError> {
        let raw: HashMap<String, RawTickerEntry> = parse_json(SourceId::SecEdgar, body)?;

        let mut ordered = raw
            .into_iter()
            .map(|(position, entry)| (position.parse::<usize>().unwrap_or(usize::MAX), entry))
            .collect::<Vec<_>>();
        ordered.sort_by_key(|(position, _)| *position);

        let entries = ordered
            .into_iter()
            .map(|(_, entry)| CikEntry {
                cik: entry.cik_str,
                ticker: Ticker::parse(&entry.ticker)
                    .map(String::from)
                    .unwrap_or_else(|_| entry.ticker.to_ascii_uppercase()),
                title: entry.title,
            })
            .collect::<Vec<_>>();

        let mut by_ticker = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            by_ticker.entry(entry.ticker.clone()).or_insert(position);
        }

        Ok(Self { entries, by_ticker })
    }

    fn lookup(&self, ticker: &Ticker) -> Option<&CikEntry> {
        self.by_ticker
            .get(ticker.as_str())
            .and_then(|position| self.entries.get(*position))
    }

    /// Exact ticker first, then ticker prefixes, then title matches.
    fn search(&self, query: &str, limit: usize) -> Vec<CompanyRef> {
        let upper = Ticker::parse(query)
            .map(String::from)
            .unwrap_or_else(|_| query.trim().to_ascii_uppercase());
        let lower = query.trim().to_ascii_lowercase();

        let rank = |entry: &CikEntry| -> Option<u8> {
            if entry.ticker == upper {
                Some(0)
            } else if entry.ticker.starts_with(&upper) {
                Some(1)
            } else if entry.title.to_ascii_lowercase().contains(&lower) {
                Some(2)
            } else {
                None
            }
        };

        let mut ranked = self
            .entries
            .iter()
            .filter_map(|entry| rank(entry).map(|score| (score, entry)))
            .collect::<Vec<_>>();
        ranked.sort_by_key(|(score, _)| *score);

        ranked
            .into_iter()
            .filter_map(|(_, entry)| {
                Some(CompanyRef {
                    ticker: Ticker::parse(&entry.ticker).ok()?,
                    name: entry.title.clone(),
                    exchange: None,
                    source_id: SourceId::SecEdgar,
                })
            })
            .take(limit)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct CompanyFacts {
    #[serde(default)]
    facts: HashMap<String, HashMap<String, FactSeries>>,
}

#[derive(Debug, Deserialize)]
struct FactSeries {
    #[serde(default)]
    units: HashMap<String, Vec<FactValue>>,
}

#[derive(Debug, Clone, Deserialize)]
struct FactValue {
    start: Option<String>,
    end: String,
    val: f64,
    accn: String,
    fy: Option<i32>,
    fp: Option<String>,
    form: String,
    filed: Option<String>,
}

impl FactValue {
    fn period_label(&self) -> String {
        match (self.fy, self.fp.as_deref()) {
            (Some(fy), Some("FY")) => fy.to_string(),
            (Some(fy), Some(fp)) => format!("{fy}-{fp}"),
            _ => self.end.clone(),
        }
    }
}

impl CompanyFacts {
    /// Best fact for `concept` across all of its tags.
    ///
    /// Filers move between tags over the years (`Revenues` to
    /// `RevenueFromContractWithCustomerExcludingAssessedTax`), so each tag's
    /// candidate is compared and the newest end date wins. Equal end dates
    /// keep the earlier tag.
    fn find(&self, concept: &Concept, period: Period) -> Option<(&'static FactTag, &FactValue)> {
        FACT_TAGS
            .iter()
            .filter(|mapping| mapping.concept == concept.as_str())
            .filter_map(|mapping| {
                let values = self
                    .facts
                    .get(mapping.taxonomy)?
                    .get(mapping.tag)?
                    .units
                    .get(mapping.unit)?;
                select_fact(values, period).map(|fact| (mapping, fact))
            })
            .fold(None, |best, candidate| match best {
                Some((_, current)) if candidate.1.end <= current.end => best,
                _ => Some(candidate),
            })
    }
}

/// Picks the fact answering `period`.
///
/// `latest` takes the newest instant from any periodic filing, or the newest
/// full-year duration. `YYYY` and `YYYY-QN` match the filing's `fy`/`fp`; the
/// same filing carries prior-period comparatives, so the newest end date wins.
/// Among facts sharing an end date, quarters prefer the shortest span and
/// years the longest.
fn select_fact(values: &[FactValue], period: Period) -> Option<&FactValue> {
    let quarter_label = match period {
        Period::FiscalQuarter { quarter, .. } => Some(format!("Q{quarter}")),
        _ => None,
    };
    let quarterly = quarter_label.is_some();

    values
        .iter()
        .filter(|fact| PERIODIC_FORMS.contains(&fact.form.as_str()))
        .filter(|fact| match period {
            Period::Latest => fact.start.is_none() || fact.fp.as_deref() == Some("FY"),
            Period::FiscalYear(year) => fact.fy == Some(year) && fact.fp.as_deref() == Some("FY"),
            Period::FiscalQuarter { year, .. } => {
                fact.fy == Some(year) && fact.fp.as_deref() == quarter_label.as_deref()
            }
        })
        .max_by(|left, right| {
            left.end
                .cmp(&right.end)
                .then_with(|| {
                    if quarterly {
                        left.start.cmp(&right.start)
                    } else {
                        right.start.cmp(&left.start)
                    }
                })
                .then_with(|| left.filed.cmp(&right.filed))
        })
}
