use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_TICKER_LEN: usize = 15;

/// How a provider writes the share-class suffix of a ticker.
///
/// | Style | Example | Used by |
/// |-------|---------|---------|
/// | `Dot` | `BRK.B` | Alpha Vantage, Finnhub |
/// | `Dash` | `BRK-B` | Yahoo, SEC ticker index |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassSeparator {
    Dot,
    Dash,
}

impl ClassSeparator {
    const fn as_char(self) -> char {
        match self {
            Self::Dot => '.',
            Self::Dash => '-',
        }
    }
}

/// Exchange ticker in canonical form.
///
/// Uppercase, with a one-letter share class always written after a dot:
/// `brk/b`, `BRK-B` and `brk.b` all parse to `BRK.B`. Longer suffixes such as
/// exchange codes (`AAPL.SW`) or pairs (`BTC-USD`) are kept as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyTicker);
        }

        let mut normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len > MAX_TICKER_LEN {
            return Err(ValidationError::TickerTooLong {
                len,
                max: MAX_TICKER_LEN,
            });
        }

        if let Some(first) = normalized.chars().next() {
            if !first.is_ascii_alphabetic() {
                return Err(ValidationError::TickerInvalidStart { ch: first });
            }
        }

        let mut previous_separator = false;
        for (index, ch) in normalized.chars().enumerate() {
            let separator = is_separator(ch);
            let valid = ch.is_ascii_alphanumeric() || separator;
            let dangling = separator && (previous_separator || index + 1 == len);
            if !valid || dangling {
                return Err(ValidationError::TickerInvalidChar { ch, index });
            }
            previous_separator = separator;
        }

        if let Some(position) = class_position(&normalized) {
            normalized.replace_range(position..=position, ".");
        }
        if let Some(index) = normalized.find('/') {
            return Err(ValidationError::TickerInvalidChar { ch: '/', index });
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ticker without its share class: `BRK` for `BRK.B`.
    pub fn root(&self) -> &str {
        match class_position(&self.0) {
            Some(position) => &self.0[..position],
            None => &self.0,
        }
    }

    pub fn share_class(&self) -> Option<char> {
        class_position(&self.0).and_then(|position| self.0[position + 1..].chars().next())
    }

    /// Spelling for a provider that writes share classes with `separator`.
    pub fn provider_symbol(&self, separator: ClassSeparator) -> Cow<'_, str> {
        match (self.share_class(), separator) {
            (Some(class), ClassSeparator::Dash) => {
                Cow::Owned(format!("{}{}{class}", self.root(), separator.as_char()))
            }
            _ => Cow::Borrowed(&self.0),
        }
    }
}

const fn is_separator(ch: char) -> bool {
    matches!(ch, '.' | '-' | '/')
}

/// Byte offset of the separator before a one-letter share class.
fn class_position(ticker: &str) -> Option<usize> {
    let position = ticker.rfind(is_separator)?;
    let suffix = &ticker[position + 1..];
    let single_letter = suffix.len() == 1 && suffix.as_bytes()[0].is_ascii_alphabetic();
    single_letter.then_some(position)
}

impl Display for Ticker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ticker {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Ticker {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ticker> for String {
    fn from(value: Ticker) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_class_spellings_share_one_canonical_form() {
        for input in [" brk.b ", "BRK-B", "brk/b"] {
            let ticker = Ticker::parse(input).expect("ticker should parse");
            assert_eq!(ticker.as_str(), "BRK.B", "{input}");
            assert_eq!(ticker.root(), "BRK");
            assert_eq!(ticker.share_class(), Some('B'));
        }
    }

    #[test]
    fn longer_suffixes_are_not_share_classes() {
        let listing = Ticker::parse("aapl.sw").expect("ticker");
        assert_eq!(listing.as_str(), "AAPL.SW");
        assert_eq!(listing.share_class(), None);
        assert_eq!(listing.root(), "AAPL.SW");

        let pair = Ticker::parse("BTC-USD").expect("ticker");
        assert_eq!(pair.as_str(), "BTC-USD");
        assert_eq!(pair.provider_symbol(ClassSeparator::Dash), "BTC-USD");
    }

    #[test]
    fn provider_symbol_follows_class_separator() {
        let ticker = Ticker::parse("BF.B").expect("ticker");
        assert_eq!(ticker.provider_symbol(ClassSeparator::Dot), "BF.B");
        assert_eq!(ticker.provider_symbol(ClassSeparator::Dash), "BF-B");

        let plain = Ticker::parse("AAPL").expect("ticker");
        assert!(matches!(plain.provider_symbol(ClassSeparator::Dash), Cow::Borrowed("AAPL")));
    }

    #[test]
    fn rejects_invalid_start() {
        let err = Ticker::parse("1AAPL").expect_err("must fail");
        assert!(matches!(err, ValidationError::TickerInvalidStart { .. }));
    }

    #[test]
    fn rejects_invalid_chars() {
        let err = Ticker::parse("AAPL$").expect_err("must fail");
        assert!(matches!(err, ValidationError::TickerInvalidChar { .. }));
    }

    #[test]
    fn rejects_dangling_and_doubled_separators() {
        for (input, index) in [("BRK.", 3), ("BRK..B", 4), ("BRK-/B", 4)] {
            let err = Ticker::parse(input).expect_err("must fail");
            assert!(
                matches!(err, ValidationError::TickerInvalidChar { index: at, .. } if at == index),
                "{input}: {err:?}"
            );
        }
    }

    #[test]
    fn slash_is_only_a_class_separator() {
        let err = Ticker::parse("BTC/USD").expect_err("must fail");
        assert!(matches!(err, ValidationError::TickerInvalidChar { ch: '/', index: 3 }));
    }
}
