//! Caller tiers and the policy that gates capabilities, sources and
//! cross-validation per tier.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Capability, CapabilitySet, SourceId, ValidationError};

/// Subscription level of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Starter,
    Professional,
    Enterprise,
}

impl Tier {
    pub const ALL: [Tier; 4] = [
        Tier::Free,
        Tier::Starter,
        Tier::Professional,
        Tier::Enterprise,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == normalized)
            .ok_or_else(|| ValidationError::InvalidTier {
                value: value.to_owned(),
            })
    }
}

/// Entitlements consumed by the federation engine. Supplied by the billing
/// side of the host application.
pub trait TierPolicy: Send + Sync {
    fn allowed_capabilities(&self, tier: Tier) -> CapabilitySet;

    fn cross_validation_enabled(&self, tier: Tier) -> bool;

    /// Source-level gate on top of capabilities. Defaults to allowing all.
    fn allows_source(&self, _tier: Tier, _source: SourceId) -> bool {
        true
    }
}

const FREE: CapabilitySet = CapabilitySet::new(&[Capability::Fundamentals, Capability::Filings]);
const STARTER: CapabilitySet = FREE
    .with(Capability::MarketData)
    .with(Capability::Historical)
    .with(Capability::Earnings);
const PROFESSIONAL: CapabilitySet = STARTER
    .with(Capability::News)
    .with(Capability::Ownership)
    .with(Capability::InsiderTrading);

/// Built-in pricing tiers.
///
/// | Tier | Capabilities | Cross-validation |
/// |------|--------------|------------------|
/// | free | fundamentals, filings | no |
/// | starter | + market_data, historical, earnings | no |
/// | professional | + news, ownership, insider_trading | yes |
/// | enterprise | all | yes |
#[derive(Debug, Clone, Default)]
pub struct DefaultTierPolicy {
    source_allowlists: HashMap<Tier, Vec<SourceId>>,
}

impl DefaultTierPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits `tier` to the listed sources.
    pub fn restrict_sources(
        mut self,
        tier: Tier,
        sources: impl IntoIterator<Item = SourceId>,
    ) -> Self {
        self.source_allowlists.insert(tier, sources.into_iter().collect());
        self
    }
}

impl TierPolicy for DefaultTierPolicy {
    fn allowed_capabilities(&self, tier: Tier) -> CapabilitySet {
        match tier {
            Tier::Free => FREE,
            Tier::Starter => STARTER,
            Tier::Professional => PROFESSIONAL,
            Tier::Enterprise => CapabilitySet::all(),
        }
    }

    fn cross_validation_enabled(&self, tier: Tier) -> bool {
        matches!(tier, Tier::Professional | Tier::Enterprise)
    }

    fn allows_source(&self, tier: Tier, source: SourceId) -> bool {
        self.source_allowlists
            .get(&tier)
            .is_none_or(|allowed| allowed.contains(&source))
    }
}
