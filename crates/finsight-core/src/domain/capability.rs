use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Category of data an adapter can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Fundamentals,
    MarketData,
    RealTime,
    Historical,
    Filings,
    News,
    InsiderTrading,
    Ownership,
    Earnings,
}

impl Capability {
    pub const ALL: [Capability; 9] = [
        Capability::Fundamentals,
        Capability::MarketData,
        Capability::RealTime,
        Capability::Historical,
        Capability::Filings,
        Capability::News,
        Capability::InsiderTrading,
        Capability::Ownership,
        Capability::Earnings,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fundamentals => "fundamentals",
            Self::MarketData => "market_data",
            Self::RealTime => "real_time",
            Self::Historical => "historical",
            Self::Filings => "filings",
            Self::News => "news",
            Self::InsiderTrading => "insider_trading",
            Self::Ownership => "ownership",
            Self::Earnings => "earnings",
        }
    }

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|capability| capability.as_str() == normalized)
            .ok_or_else(|| ValidationError::InvalidCapability {
                value: value.to_owned(),
            })
    }
}

/// Immutable set of capabilities, stored as a bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self::empty().with_all(&Capability::ALL)
    }

    pub const fn new(capabilities: &[Capability]) -> Self {
        Self::empty().with_all(capabilities)
    }

    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    const fn with_all(self, capabilities: &[Capability]) -> Self {
        let mut bits = self.0;
        let mut index = 0;
        while index < capabilities.len() {
            bits |= capabilities[index].bit();
            index += 1;
        }
        Self(bits)
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL
            .into_iter()
            .filter(move |capability| self.contains(*capability))
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Self::empty(), |set, capability| set.with(capability))
    }
}

impl Display for CapabilitySet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let names = self.iter().map(Capability::as_str).collect::<Vec<_>>();
        f.write_str(&names.join(","))
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for CapabilitySet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let capabilities = Vec::<Capability>::deserialize(deserializer)?;
        Ok(capabilities.into_iter().collect())
    }
}
