use serde::{Deserialize, Serialize};

use crate::{Concept, SourceId, Ticker, UtcDateTime, ValidationError};

/// Whether a value describes a point in time or a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Instant,
    Duration,
}

/// Typed provenance attached to every data point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Citation {
    /// Regulatory filing, e.g. a 10-K fact from SEC EDGAR.
    Filing {
        form: String,
        accession_number: String,
        filed: Option<String>,
        url: String,
    },
    /// Market quote snapshot; `delayed` is true for non-real-time feeds.
    /// `as_of` is the provider's own quote time when it sends one.
    Quote {
        delayed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        as_of: Option<UtcDateTime>,
        url: String,
    },
    /// Generic provider endpoint.
    Provider { endpoint: String, url: String },
}

impl Citation {
    pub fn url(&self) -> &str {
        match self {
            Self::Filing { url, .. } | Self::Quote { url, .. } | Self::Provider { url, .. } => url,
        }
    }
}

/// One provenance-carrying fact produced by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub source_id: SourceId,
    pub ticker: Ticker,
    pub concept: Concept,
    pub value: f64,
    pub unit: String,
    pub period: String,
    pub period_type: PeriodType,
    pub citation: Citation,
    pub retrieved_at: UtcDateTime,
    pub confidence: f64,
}

impl DataPoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_id: SourceId,
        ticker: Ticker,
        concept: Concept,
        value: f64,
        unit: impl Into<String>,
        period: impl Into<String>,
        period_type: PeriodType,
        citation: Citation,
        retrieved_at: UtcDateTime,
        confidence: f64,
    ) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "value" });
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationError::ConfidenceOutOfRange {
                value: confidence.to_string(),
            });
        }

        let unit = non_empty("unit", unit.into())?;
        let period = non_empty("period", period.into())?;

        Ok(Self {
            source_id,
            ticker,
            concept,
            value,
            unit,
            period,
            period_type,
            citation,
            retrieved_at,
            confidence,
        })
    }
}

/// Company search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRef {
    pub ticker: Ticker,
    pub name: String,
    pub exchange: Option<String>,
    pub source_id: SourceId,
}

fn non_empty(field: &'static str, value: String) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(trimmed.to_owned())
}
