use thiserror::Error;

/// Validation and contract errors exposed by `finsight-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("ticker cannot be empty")]
    EmptyTicker,
    #[error("ticker length {len} exceeds max {max}")]
    TickerTooLong { len: usize, max: usize },
    #[error("ticker must start with an ASCII letter: '{ch}'")]
    TickerInvalidStart { ch: char },
    #[error("ticker contains invalid character '{ch}' at index {index}")]
    TickerInvalidChar { ch: char, index: usize },

    #[error("concept cannot be empty")]
    EmptyConcept,
    #[error("concept '{value}' must be snake_case ASCII")]
    InvalidConcept { value: String },

    #[error("invalid source '{value}', expected one of sec_edgar, alphavantage, yahoo, finnhub")]
    InvalidSource { value: String },
    #[error("invalid capability '{value}'")]
    InvalidCapability { value: String },
    #[error("invalid tier '{value}', expected one of free, starter, professional, enterprise")]
    InvalidTier { value: String },

    #[error("invalid period '{value}', expected latest, YYYY or YYYY-QN")]
    InvalidPeriod { value: String },

    #[error("invalid timestamp '{value}', expected RFC3339 or epoch seconds")]
    InvalidTimestamp { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' cannot be empty")]
    EmptyField { field: &'static str },
    #[error("confidence {value} must be within [0, 1]")]
    ConfidenceOutOfRange { value: String },

    #[error("configuration '{field}' is invalid: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}
