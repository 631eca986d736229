use std::time::Instant;

use finsight_core::{FederationEngine, SourceSnapshot};
use serde::Serialize;

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct SourcesResponseData {
    sources: Vec<SourceSnapshot>,
}

pub async fn run(engine: &FederationEngine) -> Result<CommandResult, CliError> {
    let started = Instant::now();
    let sources = engine.sources().await;

    let data = serde_json::to_value(SourcesResponseData { sources })?;
    Ok(CommandResult::ok(data).with_latency(started.elapsed().as_millis() as u64))
}
