//! Built-in provider adapters.
//!
//! | Adapter | Capabilities | Rate limit |
//! |---------|--------------|------------|
//! | [`SecEdgarAdapter`] | filings, fundamentals | 10 req/s |
//! | [`YahooAdapter`] | market_data, real_time, historical, fundamentals | unlimited |
//! | [`AlphaVantageAdapter`] | fundamentals, earnings, market_data | 5 req/min |
//! | [`FinnhubAdapter`] | news, fundamentals, market_data, insider_trading | 60 req/min |

mod alphavantage;
mod finnhub;
mod sec_edgar;
mod yahoo;

pub use alphavantage::AlphaVantageAdapter;
pub use finnhub::FinnhubAdapter;
pub use sec_edgar::SecEdgarAdapter;
pub use yahoo::YahooAdapter;

use serde::de::IgnoredAny;

use crate::{SourceError, SourceId, ValidationError};

/// Rejects bodies that are not JSON before they reach the cache.
pub(crate) fn ensure_json(source_id: SourceId, body: String) -> Result<String, SourceError> {
    serde_json::from_str::<IgnoredAny>(&body).map_err(|error| {
        SourceError::malformed(format!("{source_id} returned unparseable JSON: {error}"))
    })?;
    Ok(body)
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    source_id: SourceId,
    body: &str,
) -> Result<T, SourceError> {
    serde_json::from_str(body).map_err(|error| {
        SourceError::malformed(format!("failed to parse {source_id} response: {error}"))
    })
}

/// Parses provider numerics; placeholders such as `None` or `-` read as absent.
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || matches!(trimmed, "None" | "-" | "N/A" | "null") {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

pub(crate) fn validation_to_error(error: ValidationError) -> SourceError {
    SourceError::malformed(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_number_skips_placeholders() {
        assert_eq!(parse_number("383285000000"), Some(383_285_000_000.0));
        assert_eq!(parse_number(" 0.0044 "), Some(0.0044));
        assert_eq!(parse_number("None"), None);
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number("NaN"), None);
    }

    #[test]
    fn ensure_json_rejects_html() {
        let err = ensure_json(SourceId::Yahoo, String::from("<html>blocked</html>"))
            .expect_err("html is not json");
        assert_eq!(err.code(), "source.malformed");
        assert!(ensure_json(SourceId::Yahoo, String::from(r#"{"ok":true}"#)).is_ok());
    }
}
