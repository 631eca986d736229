use std::time::Instant;

use finsight_core::{CompanyRef, FederationEngine};
use serde::Serialize;

use crate::cli::SearchArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct SearchResponseData {
    query: String,
    results: Vec<CompanyRef>,
}

pub async fn run(args: &SearchArgs, engine: &FederationEngine) -> Result<CommandResult, CliError> {
    if args.limit == 0 {
        return Err(CliError::Command(String::from(
            "--limit must be greater than zero",
        )));
    }

    let query = args.query.trim();
    if query.is_empty() {
        return Err(CliError::Command(String::from("query must not be empty")));
    }

    let started = Instant::now();
    let mut results = engine.search(query).await;
    results.truncate(args.limit);

    let mut command = CommandResult::ok(serde_json::to_value(SearchResponseData {
        query: query.to_owned(),
        results: results.clone(),
    })?);
    if results.is_empty() {
        command = command.with_warning(format!("no source returned matches for '{query}'"));
    }
    Ok(command.with_latency(started.elapsed().as_millis() as u64))
}
