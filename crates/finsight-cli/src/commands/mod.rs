mod fetch;
mod health;
mod search;
mod sources;

use std::sync::Arc;

use finsight_core::{
    DefaultTierPolicy, FederationEngine, SourceFailure, Tier, UtcDateTime,
};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::cli::{Cli, Command};
use crate::config::AppConfig;
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub failures: Vec<SourceFailure>,
    pub latency_ms: u64,
    /// Some concept ended degraded; the binary exits with code 3.
    pub degraded: bool,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            failures: Vec::new(),
            latency_ms: 0,
            degraded: false,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_failures(mut self, failures: Vec<SourceFailure>) -> Self {
        self.failures.extend(failures);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }
}

/// JSON document printed on stdout.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub meta: Meta,
    pub data: Value,
    pub errors: Vec<SourceFailure>,
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub command: &'static str,
    pub tier: Tier,
    pub generated_at: UtcDateTime,
    pub latency_ms: u64,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub degraded: bool,
}

pub async fn run(cli: &Cli) -> Result<Envelope, CliError> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let registry = config.registry_builder()?.build()?;
    if registry.is_empty() {
        return Err(CliError::Command(String::from(
            "no data sources are enabled; check the config file and API keys",
        )));
    }
    info!(sources = registry.len(), "registry ready");

    let engine = FederationEngine::new(
        Arc::new(registry),
        Arc::new(DefaultTierPolicy::new()),
        config.federation_config(),
    )?;
    let tier = Tier::from(cli.tier);

    let outcome = match &cli.command {
        Command::Fetch(args) => fetch::run(args, tier, &engine).await,
        Command::Search(args) => search::run(args, &engine).await,
        Command::Health => health::run(&engine).await,
        Command::Sources => sources::run(&engine).await,
    };
    engine.close().await;

    let CommandResult {
        data,
        warnings,
        failures,
        latency_ms,
        degraded,
    } = outcome?;

    Ok(Envelope {
        meta: Meta {
            command: command_name(&cli.command),
            tier,
            generated_at: UtcDateTime::now(),
            latency_ms,
            warnings,
            degraded,
        },
        data,
        errors: failures,
    })
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Fetch(_) => "fetch",
        Command::Search(_) => "search",
        Command::Health => "health",
        Command::Sources => "sources",
    }
}

pub fn render(envelope: &Envelope, pretty: bool) -> Result<String, CliError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };
    Ok(rendered)
}
