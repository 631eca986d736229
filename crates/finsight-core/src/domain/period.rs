use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Reporting period selector for a fetch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Period {
    /// Most recent value the provider has.
    #[default]
    Latest,
    /// Full fiscal year, written `YYYY`.
    FiscalYear(i32),
    /// Fiscal quarter, written `YYYY-QN`.
    FiscalQuarter { year: i32, quarter: u8 },
}

impl Period {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_uppercase();
        let invalid = || ValidationError::InvalidPeriod {
            value: input.to_owned(),
        };

        if normalized == "LATEST" {
            return Ok(Self::Latest);
        }

        match normalized.split_once("-Q") {
            None => parse_year(&normalized).map(Self::FiscalYear).ok_or_else(invalid),
            Some((year, quarter)) => {
                let year = parse_year(year).ok_or_else(invalid)?;
                let quarter = quarter
                    .parse::<u8>()
                    .ok()
                    .filter(|quarter| (1..=4).contains(quarter))
                    .ok_or_else(invalid)?;
                Ok(Self::FiscalQuarter { year, quarter })
            }
        }
    }

    pub const fn is_latest(self) -> bool {
        matches!(self, Self::Latest)
    }

    pub fn label(self) -> String {
        match self {
            Self::Latest => String::from("latest"),
            Self::FiscalYear(year) => year.to_string(),
            Self::FiscalQuarter { year, quarter } => format!("{year}-Q{quarter}"),
        }
    }
}

fn parse_year(value: &str) -> Option<i32> {
    if value.len() != 4 || !value.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

impl Display for Period {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Period {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.label()
    }
}
