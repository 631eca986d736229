//! # Domain Models
//!
//! Canonical domain types shared by adapters, the registry and the
//! federation engine.
//!
//! ## Models
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Ticker`] | Validated, upper-cased exchange symbol with canonical share class |
//! | [`Capability`] | Category of data an adapter provides |
//! | [`CapabilitySet`] | Immutable set of capabilities |
//! | [`Concept`] | Normalized metric name, resolved through [`VOCABULARY`] |
//! | [`DataPoint`] | One fact with provenance and confidence |
//! | [`Citation`] | Filing, quote or provider-endpoint provenance |
//! | [`CompanyRef`] | Company search hit |
//! | [`Period`] | `latest`, `YYYY` or `YYYY-QN` selector |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! ## Validation
//!
//! Construction validates invariants and returns [`crate::ValidationError`]:
//!
//! ```rust,ignore
//! use finsight_core::{Concept, Ticker};
//!
//! let ticker = Ticker::parse("aapl")?;          // "AAPL"
//! let concept = Concept::parse("Market_Cap")?;  // "market_cap", fundamentals
//! assert!(Ticker::parse("1ABC").is_err());
//! ```

mod capability;
mod concept;
mod models;
mod period;
mod ticker;
mod timestamp;

pub use capability::{Capability, CapabilitySet};
pub use concept::{Concept, ConceptDefinition, VOCABULARY};
pub use models::{Citation, CompanyRef, DataPoint, PeriodType};
pub use period::Period;
pub use ticker::{ClassSeparator, Ticker};
pub use timestamp::UtcDateTime;
