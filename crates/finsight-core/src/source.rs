use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ValidationError;

/// Adapter identity used in data points, failures and registry indexes.
///
/// `Custom` carries a static id for plugin adapters registered outside the
/// built-in set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceId {
    SecEdgar,
    AlphaVantage,
    Yahoo,
    Finnhub,
    Custom(&'static str),
}

impl SourceId {
    pub const BUILT_IN: [Self; 4] = [
        Self::SecEdgar,
        Self::AlphaVantage,
        Self::Yahoo,
        Self::Finnhub,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SecEdgar => "sec_edgar",
            Self::AlphaVantage => "alphavantage",
            Self::Yahoo => "yahoo",
            Self::Finnhub => "finnhub",
            Self::Custom(id) => id,
        }
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = ValidationError;

    /// Parses built-in ids only; custom ids are never created from input.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sec_edgar" | "sec" | "edgar" => Ok(Self::SecEdgar),
            "alphavantage" | "alpha_vantage" => Ok(Self::AlphaVantage),
            "yahoo" => Ok(Self::Yahoo),
            "finnhub" => Ok(Self::Finnhub),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}

impl Serialize for SourceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SourceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_built_in_ids_and_aliases() {
        assert_eq!("SEC".parse::<SourceId>(), Ok(SourceId::SecEdgar));
        assert_eq!("alpha_vantage".parse::<SourceId>(), Ok(SourceId::AlphaVantage));
        assert!("polygon".parse::<SourceId>().is_err());
    }

    #[test]
    fn custom_ids_serialize_as_their_name() {
        let json = serde_json::to_string(&SourceId::Custom("internal_feed")).expect("serialize");
        assert_eq!(json, r#""internal_feed""#);
    }
}
