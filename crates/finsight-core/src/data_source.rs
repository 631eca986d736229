//! Adapter contract and request/error types.
//!
//! Every provider implements [`DataSource`]. The federation engine only ever
//! talks to adapters through this trait, so plugin adapters and test doubles
//! are first-class.
//!
//! # Operations
//!
//! | Method | Network | Description |
//! |--------|---------|-------------|
//! | [`fetch`](DataSource::fetch) | yes | Resolve concepts for one ticker |
//! | [`search`](DataSource::search) | yes | Best-effort company lookup |
//! | [`health_check`](DataSource::health_check) | no | Last-known-good state |
//! | [`close`](DataSource::close) | no | Release resources at shutdown |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Capability, CapabilitySet, CompanyRef, Concept, DataPoint, Period, SourceId, Ticker};

/// Declared request budget of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimit {
    PerMinute(u32),
    Unlimited,
}

impl RateLimit {
    pub const fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

impl Display for RateLimit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerMinute(limit) => write!(f, "{limit}/min"),
            Self::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Unavailable,
    RateLimited,
    NotFound,
    Malformed,
    InvalidRequest,
}

/// Structured source error used by engine fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
    retry_after: Option<Duration>,
}

impl SourceError {
    fn new(kind: SourceErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            retry_after: None,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Unavailable, message, true)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message, true)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::NotFound, message, false)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Malformed, message, false)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InvalidRequest, message, false)
    }

    /// Marks the error as one a retry cannot fix, such as a rejected API key.
    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::Malformed => "source.malformed",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Request payload for [`DataSource::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub ticker: Ticker,
    pub concepts: Vec<Concept>,
    pub period: Period,
}

impl FetchRequest {
    pub fn new(
        ticker: Ticker,
        concepts: Vec<Concept>,
        period: Option<Period>,
    ) -> Result<Self, SourceError> {
        if concepts.is_empty() {
            return Err(SourceError::invalid_request(
                "fetch request must include at least one concept",
            ));
        }
        Ok(Self {
            ticker,
            concepts,
            period: period.unwrap_or_default(),
        })
    }

    pub fn wants(&self, concept: &str) -> bool {
        self.concepts.iter().any(|wanted| wanted.as_str() == concept)
    }
}

/// Result of one adapter call.
///
/// Multi-endpoint adapters can answer part of a request and fail the rest;
/// `failed` names the concepts whose endpoint errored so the engine can fall
/// back for them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    pub points: Vec<DataPoint>,
    pub failed: Vec<(Concept, SourceError)>,
}

impl FetchOutcome {
    pub fn complete(points: Vec<DataPoint>) -> Self {
        Self {
            points,
            failed: Vec::new(),
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Records `error` against every concept of a failed endpoint.
    pub fn fail_all<'c>(
        &mut self,
        concepts: impl IntoIterator<Item = &'c Concept>,
        error: &SourceError,
    ) {
        self.failed
            .extend(concepts.into_iter().map(|concept| (concept.clone(), error.clone())));
    }

    pub fn failure_for(&self, concept: &Concept) -> Option<&SourceError> {
        self.failed
            .iter()
            .find(|(failed, _)| failed == concept)
            .map(|(_, error)| error)
    }
}

impl From<Vec<DataPoint>> for FetchOutcome {
    fn from(points: Vec<DataPoint>) -> Self {
        Self::complete(points)
    }
}

/// Source adapter contract.
///
/// # Required Methods
///
/// | Method | Description |
/// |--------|-------------|
/// | [`id`](DataSource::id) | Unique adapter identifier |
/// | [`capabilities`](DataSource::capabilities) | Static capability set |
/// | [`confidence_for`](DataSource::confidence_for) | Authoritativeness per capability |
/// | [`supports_concept`](DataSource::supports_concept) | Static concept mapping check |
/// | [`rate_limit`](DataSource::rate_limit) | Declared request budget |
/// | [`fetch`](DataSource::fetch) | Resolve concepts |
/// | [`search`](DataSource::search) | Company search |
/// | [`health_check`](DataSource::health_check) | Health without network |
/// | [`close`](DataSource::close) | Shutdown hook |
///
/// Implementations must be `Send + Sync`; the registry shares them across
/// concurrent requests.
pub trait DataSource: Send + Sync {
    fn id(&self) -> SourceId;

    fn capabilities(&self) -> CapabilitySet;

    /// Static confidence in `[0, 1]` for values of the given capability.
    /// Returns 0.0 for undeclared capabilities.
    fn confidence_for(&self, capability: Capability) -> f64;

    /// Whether the adapter's field mapping knows the concept.
    fn supports_concept(&self, concept: &Concept) -> bool;

    fn rate_limit(&self) -> RateLimit;

    /// Resolves the requested concepts for one ticker.
    ///
    /// Concepts the provider cannot answer are omitted from the result.
    /// When some endpoints succeed and others fail, the call succeeds and the
    /// failed concepts are listed in [`FetchOutcome::failed`].
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] with kind `Unavailable`, `RateLimited`,
    /// `NotFound` or `Malformed` when nothing could be answered.
    fn fetch<'a>(
        &'a self,
        req: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FetchOutcome, SourceError>> + Send + 'a>>;

    /// Best-effort company search. Provider failures are logged and yield an
    /// empty list.
    fn search<'a>(
        &'a self,
        query: &'a str,
    ) -> Pin<Box<dyn Future<Output = Vec<CompanyRef>> + Send + 'a>>;

    /// Reports last-known-good state. Never performs a provider call.
    fn health_check<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Releases held resources. Later fetches fail with `Unavailable`.
    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(SourceError::rate_limited("slow down").code(), "source.rate_limited");
        assert_eq!(SourceError::not_found("no cik").code(), "source.not_found");
        assert_eq!(SourceError::malformed("bad json").code(), "source.malformed");
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(SourceError::unavailable("down").retryable());
        assert!(SourceError::rate_limited("429").retryable());
        assert!(!SourceError::not_found("unknown").retryable());
        assert!(!SourceError::malformed("garbage").retryable());

        let rejected = SourceError::unavailable("premium endpoint").non_retryable();
        assert_eq!(rejected.kind(), SourceErrorKind::Unavailable);
        assert!(!rejected.retryable());
    }

    #[test]
    fn fetch_request_requires_concepts() {
        let ticker = Ticker::parse("AAPL").expect("ticker");
        let err = FetchRequest::new(ticker, Vec::new(), None).expect_err("must fail");
        assert_eq!(err.kind(), SourceErrorKind::InvalidRequest);
    }

    #[test]
    fn partial_outcome_reports_failed_concepts() {
        let revenue = Concept::parse("revenue").expect("concept");
        let eps = Concept::parse("eps").expect("concept");
        let mut outcome = FetchOutcome::default();
        assert!(!outcome.is_partial());

        outcome.fail_all([&revenue, &eps], &SourceError::rate_limited("quota"));
        assert!(outcome.is_partial());
        assert_eq!(
            outcome.failure_for(&eps).map(SourceError::kind),
            Some(SourceErrorKind::RateLimited)
        );
        assert!(outcome
            .failure_for(&Concept::parse("price").expect("concept"))
            .is_none());
    }

    #[test]
    fn display_includes_code() {
        let err = SourceError::unavailable("timeout").with_retry_after(Duration::from_secs(3));
        assert_eq!(err.to_string(), "timeout (source.unavailable)");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }
}
