//! CLI argument definitions for FinSight.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fetch` | Resolve concepts for a ticker across sources |
//! | `search` | Search companies across sources |
//! | `health` | Report per-source health |
//! | `sources` | List registered sources and capabilities |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | TOML configuration file |
//! | `--tier` | `free` | Caller tier used for entitlements |
//! | `--pretty` | `false` | Pretty-print JSON output |
//!
//! # Examples
//!
//! ```bash
//! finsight fetch AAPL revenue,net_income --period 2023
//! finsight --tier professional fetch MSFT market_cap pe_ratio --pretty
//! finsight search "international business"
//! finsight --config finsight.toml sources
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use finsight_core::Tier;

/// FinSight - multi-source financial data federation
#[derive(Debug, Parser)]
#[command(
    name = "finsight",
    author,
    version,
    about = "Multi-source financial data federation CLI",
    long_about = "FinSight resolves financial concepts (revenue, ratios, prices) across SEC EDGAR, \
Yahoo Finance, Alpha Vantage and Finnhub, cross-validates them on higher tiers and prints \
citation-carrying JSON.\n\
\n\
API keys are read from FINSIGHT_ALPHAVANTAGE_API_KEY, FINSIGHT_FINNHUB_API_KEY and \
FINSIGHT_SEC_USER_AGENT (or the unprefixed names) when not set in the config file."
)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Caller tier; gates capabilities and cross-validation.
    #[arg(long, global = true, value_enum, default_value_t = TierArg::Free)]
    pub tier: TierArg,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TierArg {
    Free,
    Starter,
    Professional,
    Enterprise,
}

impl From<TierArg> for Tier {
    fn from(value: TierArg) -> Self {
        match value {
            TierArg::Free => Tier::Free,
            TierArg::Starter => Tier::Starter,
            TierArg::Professional => Tier::Professional,
            TierArg::Enterprise => Tier::Enterprise,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve concepts for one ticker.
    ///
    ///   finsight fetch AAPL revenue net_income
    ///   finsight fetch AAPL revenue,eps --period 2024-Q1
    Fetch(FetchArgs),

    /// Search companies by ticker or name.
    Search(SearchArgs),

    /// Report health of every registered source.
    Health,

    /// List registered sources with capabilities and rate limits.
    Sources,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Ticker symbol, e.g. AAPL.
    pub ticker: String,

    /// Concepts to resolve (space or comma separated).
    #[arg(required = true, value_delimiter = ',', num_args = 1..)]
    pub concepts: Vec<String>,

    /// `latest`, `YYYY` or `YYYY-QN`.
    #[arg(long)]
    pub period: Option<String>,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    pub query: String,

    /// Maximum number of results.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}
