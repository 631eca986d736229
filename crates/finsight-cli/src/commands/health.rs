use std::time::Instant;

use finsight_core::FederationEngine;
use serde_json::json;

use crate::error::CliError;

use super::CommandResult;

pub async fn run(engine: &FederationEngine) -> Result<CommandResult, CliError> {
    let started = Instant::now();
    let health = engine.health().await;

    let warnings = health
        .iter()
        .filter(|(_, healthy)| !**healthy)
        .map(|(source, _)| format!("{source} is unhealthy"))
        .collect::<Vec<_>>();
    let data = json!({
        "healthy": warnings.is_empty(),
        "sources": health,
    });

    Ok(CommandResult::ok(data)
        .with_warnings(warnings)
        .with_latency(started.elapsed().as_millis() as u64))
}
