use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Capability, ValidationError};

const MAX_CONCEPT_LEN: usize = 64;

/// Vocabulary entry: the capability that serves a concept and its canonical unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConceptDefinition {
    pub name: &'static str,
    pub capability: Capability,
    pub unit: &'static str,
}

const fn def(name: &'static str, capability: Capability, unit: &'static str) -> ConceptDefinition {
    ConceptDefinition {
        name,
        capability,
        unit,
    }
}

/// Known concepts. Requests may name anything else; those resolve `unsupported`.
pub const VOCABULARY: &[ConceptDefinition] = &[
    def("revenue", Capability::Fundamentals, "USD"),
    def("net_income", Capability::Fundamentals, "USD"),
    def("gross_profit", Capability::Fundamentals, "USD"),
    def("operating_income", Capability::Fundamentals, "USD"),
    def("ebitda", Capability::Fundamentals, "USD"),
    def("eps", Capability::Fundamentals, "USD/share"),
    def("total_assets", Capability::Fundamentals, "USD"),
    def("total_liabilities", Capability::Fundamentals, "USD"),
    def("shareholders_equity", Capability::Fundamentals, "USD"),
    def("current_assets", Capability::Fundamentals, "USD"),
    def("current_liabilities", Capability::Fundamentals, "USD"),
    def("cash_and_equivalents", Capability::Fundamentals, "USD"),
    def("total_debt", Capability::Fundamentals, "USD"),
    def("operating_cash_flow", Capability::Fundamentals, "USD"),
    def("shares_outstanding", Capability::Fundamentals, "shares"),
    def("market_cap", Capability::Fundamentals, "USD"),
    def("pe_ratio", Capability::Fundamentals, "ratio"),
    def("pb_ratio", Capability::Fundamentals, "ratio"),
    def("dividend_yield", Capability::Fundamentals, "ratio"),
    def("book_value", Capability::Fundamentals, "USD/share"),
    def("beta", Capability::Fundamentals, "ratio"),
    def("profit_margin", Capability::Fundamentals, "ratio"),
    def("week_52_high", Capability::Fundamentals, "USD"),
    def("week_52_low", Capability::Fundamentals, "USD"),
    def("price", Capability::MarketData, "USD"),
    def("open", Capability::MarketData, "USD"),
    def("previous_close", Capability::MarketData, "USD"),
    def("day_high", Capability::MarketData, "USD"),
    def("day_low", Capability::MarketData, "USD"),
    def("volume", Capability::MarketData, "shares"),
    def("reported_eps", Capability::Earnings, "USD/share"),
    def("estimated_eps", Capability::Earnings, "USD/share"),
];

/// Normalized snake_case metric name such as `revenue` or `pe_ratio`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Concept(String);

impl Concept {
    /// Parses and lower-cases a concept name. Unknown names are valid.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(ValidationError::EmptyConcept);
        }

        let well_formed = normalized.len() <= MAX_CONCEPT_LEN
            && normalized.starts_with(|ch: char| ch.is_ascii_lowercase())
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');
        if !well_formed {
            return Err(ValidationError::InvalidConcept {
                value: input.to_owned(),
            });
        }

        Ok(Self(normalized))
    }

    /// Builds a concept from a vocabulary name known at compile time.
    pub(crate) fn known(name: &'static str) -> Self {
        debug_assert!(lookup(name).is_some(), "{name} is not in the vocabulary");
        Self(name.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn definition(&self) -> Option<&'static ConceptDefinition> {
        lookup(&self.0)
    }

    pub fn capability(&self) -> Option<Capability> {
        self.definition().map(|definition| definition.capability)
    }

    pub fn unit(&self) -> Option<&'static str> {
        self.definition().map(|definition| definition.unit)
    }

    pub fn is_known(&self) -> bool {
        self.definition().is_some()
    }
}

fn lookup(name: &str) -> Option<&'static ConceptDefinition> {
    VOCABULARY.iter().find(|definition| definition.name == name)
}

impl Display for Concept {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Concept {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Concept {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Concept {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Concept> for String {
    fn from(value: Concept) -> Self {
        value.0
    }
}
