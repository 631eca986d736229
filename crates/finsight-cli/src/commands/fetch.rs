use std::collections::BTreeMap;

use finsight_core::{
    Concept, ConceptStatus, DataPoint, FederationEngine, FederationRequest, Period, Ticker, Tier,
    ValidationReport,
};
use serde::Serialize;

use crate::cli::FetchArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct FetchResponseData {
    request_id: String,
    ticker: Ticker,
    period: Period,
    data: Vec<DataPoint>,
    concept_status: BTreeMap<Concept, ConceptStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<Vec<ValidationReport>>,
}

pub async fn run(
    args: &FetchArgs,
    tier: Tier,
    engine: &FederationEngine,
) -> Result<CommandResult, CliError> {
    let ticker = Ticker::parse(&args.ticker)?;
    let concepts = args
        .concepts
        .iter()
        .map(|concept| Concept::parse(concept))
        .collect::<Result<Vec<_>, _>>()?;

    let mut request = FederationRequest::new(ticker, concepts, tier);
    if let Some(period) = &args.period {
        request = request.with_period(Period::parse(period)?);
    }

    let result = engine.fetch(request).await?;
    let degraded = result
        .concept_status
        .values()
        .any(|status| status.is_degraded());

    let data = serde_json::to_value(FetchResponseData {
        request_id: result.request_id.to_string(),
        ticker: result.ticker,
        period: result.period,
        data: result.data,
        concept_status: result.concept_status,
        validation: result.validation,
    })?;

    Ok(CommandResult::ok(data)
        .with_warnings(result.warnings)
        .with_failures(result.failures)
        .with_latency(result.latency_ms)
        .with_degraded(degraded))
}
