//! Federation engine: capability resolution, tier gating, concurrent
//! fetch with fallback, and cross-source reconciliation.
//!
//! # Per-concept lifecycle
//!
//! ```text
//! Pending ─▶ Selected ─▶ Fetching ─┬─▶ Resolved
//!                            ▲     ├─▶ RetryNextSource ─┐
//!                            └─────┼────────────────────┘
//!                                  └─▶ Exhausted (no_data | all_sources_failed | timed_out)
//! ```
//!
//! Concepts that never enter the fetch set end `unsupported` or
//! `unavailable_for_tier`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::data_source::{DataSource, FetchOutcome, FetchRequest, SourceError, SourceErrorKind};
use crate::reconcile::{reconcile, ValidationReport};
use crate::registry::SourceRegistry;
use crate::tier::{Tier, TierPolicy};
use crate::{
    CapabilitySet, CompanyRef, Concept, DataPoint, Period, RateLimit, SourceId, Ticker,
    ValidationError,
};

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct FederationConfig {
    /// Sources queried per concept in cross-validation mode (K).
    pub cross_validation_sources: usize,
    /// Relative agreement band around the median.
    pub tolerance: f64,
    /// Simultaneous adapter calls per request.
    pub max_concurrency: usize,
    pub call_timeout: Duration,
    pub request_deadline: Duration,
    pub health_check_deadline: Duration,
    pub search_limit: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            cross_validation_sources: 3,
            tolerance: 0.02,
            max_concurrency: 4,
            call_timeout: Duration::from_secs(10),
            request_deadline: Duration::from_secs(30),
            health_check_deadline: Duration::from_secs(2),
            search_limit: 20,
        }
    }
}

impl FederationConfig {
    pub fn with_cross_validation_sources(mut self, sources: usize) -> Self {
        self.cross_validation_sources = sources;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_request_deadline(mut self, request_deadline: Duration) -> Self {
        self.request_deadline = request_deadline;
        self
    }

    pub fn with_search_limit(mut self, search_limit: usize) -> Self {
        self.search_limit = search_limit;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(ValidationError::InvalidConfig {
                field: "tolerance",
                reason: format!("{} is outside (0, 1)", self.tolerance),
            });
        }
        let counts = [
            ("cross_validation_sources", self.cross_validation_sources),
            ("max_concurrency", self.max_concurrency),
            ("search_limit", self.search_limit),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ValidationError::InvalidConfig {
                    field,
                    reason: String::from("must be at least 1"),
                });
            }
        }
        let durations = [
            ("call_timeout", self.call_timeout),
            ("request_deadline", self.request_deadline),
            ("health_check_deadline", self.health_check_deadline),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ValidationError::InvalidConfig {
                    field,
                    reason: String::from("must be greater than zero"),
                });
            }
        }
        Ok(())
    }

    /// K is never below two once cross-validation is on.
    fn target_sources(&self, cross_validation: bool) -> usize {
        if cross_validation {
            self.cross_validation_sources.max(2)
        } else {
            1
        }
    }
}

/// Caller input for [`FederationEngine::fetch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationRequest {
    pub ticker: Ticker,
    pub concepts: Vec<Concept>,
    pub tier: Tier,
    #[serde(default)]
    pub period: Option<Period>,
}

impl FederationRequest {
    /// Duplicate concepts are dropped; first occurrence keeps its position.
    pub fn new(ticker: Ticker, concepts: impl IntoIterator<Item = Concept>, tier: Tier) -> Self {
        let mut seen = HashSet::new();
        let concepts = concepts
            .into_iter()
            .filter(|concept| seen.insert(concept.clone()))
            .collect();
        Self {
            ticker,
            concepts,
            tier,
            period: None,
        }
    }

    pub fn with_period(mut self, period: Period) -> Self {
        self.period = Some(period);
        self
    }
}

/// Terminal status of one requested concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptStatus {
    Resolved,
    /// Capable sources exist but the tier excludes all of them.
    UnavailableForTier,
    /// Unknown concept or no registered source maps it.
    Unsupported,
    /// Every attempted source answered without the concept.
    NoData,
    /// At least one attempt failed upstream and none succeeded.
    AllSourcesFailed,
    /// The request deadline expired before any source answered.
    TimedOut,
}

impl ConceptStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::UnavailableForTier => "unavailable_for_tier",
            Self::Unsupported => "unsupported",
            Self::NoData => "no_data",
            Self::AllSourcesFailed => "all_sources_failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Degraded states are worth retrying later.
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::AllSourcesFailed | Self::TimedOut)
    }
}

/// One failed adapter call, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source_id: SourceId,
    pub concepts: Vec<Concept>,
    pub kind: SourceErrorKind,
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl SourceFailure {
    fn new(source_id: SourceId, concepts: Vec<Concept>, error: &SourceError) -> Self {
        Self {
            source_id,
            concepts,
            kind: error.kind(),
            code: error.code(),
            message: error.message().to_owned(),
            retryable: error.retryable(),
        }
    }
}

/// Outcome of one federated request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FederationResult {
    pub request_id: Uuid,
    pub ticker: Ticker,
    pub tier: Tier,
    pub period: Period,
    /// One chosen point per resolved concept, in request order.
    pub data: Vec<DataPoint>,
    pub concept_status: BTreeMap<Concept, ConceptStatus>,
    /// Present only when cross-validation ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<Vec<ValidationReport>>,
    pub failures: Vec<SourceFailure>,
    pub warnings: Vec<String>,
    pub latency_ms: u64,
}

impl FederationResult {
    pub fn value(&self, concept: &str) -> Option<&DataPoint> {
        self.data
            .iter()
            .find(|point| point.concept.as_str() == concept)
    }

    pub fn status(&self, concept: &str) -> Option<ConceptStatus> {
        self.concept_status
            .iter()
            .find(|(requested, _)| requested.as_str() == concept)
            .map(|(_, status)| *status)
    }

    pub fn report(&self, concept: &str) -> Option<&ValidationReport> {
        self.validation
            .as_ref()?
            .iter()
            .find(|report| report.concept.as_str() == concept)
    }

    /// Some concepts resolved and others did not.
    pub fn is_partial(&self) -> bool {
        let resolved = self
            .concept_status
            .values()
            .filter(|status| **status == ConceptStatus::Resolved)
            .count();
        resolved > 0 && resolved < self.concept_status.len()
    }
}

#[derive(Debug, Error)]
pub enum FederationError {
    #[error("invalid federation request: {0}")]
    InvalidRequest(String),

    #[error("all eligible sources failed for every requested concept")]
    AllSourcesFailed { failures: Vec<SourceFailure> },
}

impl FederationError {
    pub fn failures(&self) -> &[SourceFailure] {
        match self {
            Self::InvalidRequest(_) => &[],
            Self::AllSourcesFailed { failures } => failures,
        }
    }
}

/// Source snapshot used by the `sources` CLI command.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSnapshot {
    pub id: SourceId,
    pub capabilities: CapabilitySet,
    pub rate_limit: String,
    pub unlimited: bool,
    pub healthy: bool,
}

/// Fetch bookkeeping for one concept.
struct ConceptPlan {
    concept: Concept,
    candidates: Vec<Arc<dyn DataSource>>,
    next: usize,
    /// Answers tagged with the candidate's priority rank.
    points: Vec<(usize, DataPoint)>,
    upstream_failed: bool,
    status: Option<ConceptStatus>,
}

impl ConceptPlan {
    fn rank_of(&self, source_id: SourceId) -> usize {
        self.candidates
            .iter()
            .position(|candidate| candidate.id() == source_id)
            .unwrap_or(usize::MAX)
    }

    fn is_open(&self) -> bool {
        self.status.is_none()
    }

    /// Settles the concept once it has enough answers or no candidates left.
    fn settle(&mut self, target: usize) {
        if !self.is_open() {
            return;
        }
        if self.points.len() >= target {
            self.status = Some(ConceptStatus::Resolved);
        } else if self.next >= self.candidates.len() {
            self.status = Some(if !self.points.is_empty() {
                ConceptStatus::Resolved
            } else if self.upstream_failed {
                ConceptStatus::AllSourcesFailed
            } else {
                ConceptStatus::NoData
            });
        }
    }

    fn ordered_points(&self) -> Vec<DataPoint> {
        let mut ranked = self.points.clone();
        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().map(|(_, point)| point).collect()
    }
}

/// One adapter call within a round.
struct Assignment {
    adapter: Arc<dyn DataSource>,
    plans: Vec<usize>,
}

/// Multi-source federation over a shared [`SourceRegistry`].
pub struct FederationEngine {
    registry: Arc<SourceRegistry>,
    tier_policy: Arc<dyn TierPolicy>,
    config: FederationConfig,
}

impl FederationEngine {
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidConfig`] for an invalid config.
    pub fn new(
        registry: Arc<SourceRegistry>,
        tier_policy: Arc<dyn TierPolicy>,
        config: FederationConfig,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            registry,
            tier_policy,
            config,
        })
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Resolves the requested concepts for one ticker.
    ///
    /// Adapter errors become per-concept statuses and `failures` entries.
    ///
    /// # Errors
    ///
    /// - [`FederationError::InvalidRequest`] when no concepts are requested.
    /// - [`FederationError::AllSourcesFailed`] when at least one concept was
    ///   attempted and every attempted concept ended `all_sources_failed`.
    pub async fn fetch(
        &self,
        request: FederationRequest,
    ) -> Result<FederationResult, FederationError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        if request.concepts.is_empty() {
            return Err(FederationError::InvalidRequest(String::from(
                "at least one concept is required",
            )));
        }

        let period = request.period.unwrap_or_default();
        let cross_validation = self.tier_policy.cross_validation_enabled(request.tier);
        let target = self.config.target_sources(cross_validation);
        let mut warnings = Vec::new();
        let mut failures = Vec::new();

        let mut plans = request
            .concepts
            .iter()
            .map(|concept| self.plan(concept, request.tier, &mut warnings))
            .collect::<Vec<_>>();

        debug!(
            request_id = %request_id,
            ticker = %request.ticker,
            tier = %request.tier,
            cross_validation,
            target,
            "planned federation request"
        );

        let deadline = tokio::time::Instant::now() + self.config.request_deadline;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut round = 0_u32;

        loop {
            let assignments = next_round(&mut plans, target);
            if assignments.is_empty() {
                break;
            }
            round += 1;
            debug!(
                request_id = %request_id,
                round,
                calls = assignments.len(),
                "starting fetch round"
            );

            let mut in_flight = assignments
                .iter()
                .enumerate()
                .map(|(index, assignment)| {
                    let adapter = Arc::clone(&assignment.adapter);
                    let concepts = assignment
                        .plans
                        .iter()
                        .map(|plan| plans[*plan].concept.clone())
                        .collect::<Vec<_>>();
                    let ticker = request.ticker.clone();
                    let semaphore = Arc::clone(&semaphore);
                    let call_timeout = self.config.call_timeout;
                    async move {
                        let outcome: Result<FetchOutcome, SourceError> = async {
                            let fetch = FetchRequest::new(ticker, concepts, Some(period))?;
                            let _permit = semaphore.acquire().await.map_err(|_| {
                                SourceError::unavailable("request concurrency limiter closed")
                            })?;
                            tokio::time::timeout(call_timeout, adapter.fetch(fetch))
                                .await
                                .map_err(|_| {
                                    SourceError::unavailable(format!(
                                        "{} call exceeded {}ms",
                                        adapter.id(),
                                        call_timeout.as_millis()
                                    ))
                                })?
                        }
                        .await;
                        (index, outcome)
                    }
                })
                .collect::<FuturesUnordered<_>>();

            let mut completed = vec![false; assignments.len()];
            let mut deadline_hit = false;
            loop {
                match tokio::time::timeout_at(deadline, in_flight.next()).await {
                    Ok(Some((index, outcome))) => {
                        completed[index] = true;
                        apply_outcome(
                            &assignments[index],
                            outcome,
                            &mut plans,
                            &mut failures,
                            &request.ticker,
                        );
                    }
                    Ok(None) => break,
                    Err(_) => {
                        deadline_hit = true;
                        break;
                    }
                }
            }
            drop(in_flight);

            if deadline_hit {
                for (assignment, _) in assignments
                    .iter()
                    .zip(&completed)
                    .filter(|(_, done)| !**done)
                {
                    warn!(
                        request_id = %request_id,
                        source = %assignment.adapter.id(),
                        "adapter call cancelled at request deadline"
                    );
                }
                expire(&mut plans);
                warnings.push(format!(
                    "request deadline of {}ms expired; pending source calls were cancelled",
                    self.config.request_deadline.as_millis()
                ));
                break;
            }

            for plan in &mut plans {
                plan.settle(target);
            }
        }

        let mut data = Vec::new();
        let mut reports = Vec::new();
        let mut concept_status = BTreeMap::new();
        for plan in &plans {
            let status = plan.status.unwrap_or(ConceptStatus::TimedOut);
            concept_status.insert(plan.concept.clone(), status);
            if status != ConceptStatus::Resolved {
                continue;
            }

            let ordered = plan.ordered_points();
            if cross_validation {
                if let Some(report) = reconcile(&ordered, self.config.tolerance) {
                    if report.conflict {
                        let warning = report.conflict_warning();
                        warn!(
                            request_id = %request_id,
                            ticker = %request.ticker,
                            concept = %plan.concept,
                            consistency = report.consistency_score,
                            "cross-source conflict"
                        );
                        warnings.push(warning);
                    }
                    reports.push(report);
                }
            }
            if let Some(chosen) = ordered.into_iter().next() {
                data.push(chosen);
            }
        }

        let attempted = plans
            .iter()
            .filter(|plan| !plan.candidates.is_empty())
            .filter_map(|plan| plan.status)
            .collect::<Vec<_>>();
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if !attempted.is_empty()
            && attempted
                .iter()
                .all(|status| *status == ConceptStatus::AllSourcesFailed)
        {
            warn!(
                request_id = %request_id,
                ticker = %request.ticker,
                failures = failures.len(),
                latency_ms,
                "all sources failed"
            );
            return Err(FederationError::AllSourcesFailed { failures });
        }

        info!(
            request_id = %request_id,
            ticker = %request.ticker,
            tier = %request.tier,
            requested = plans.len(),
            resolved = data.len(),
            failures = failures.len(),
            rounds = round,
            latency_ms,
            "federation request finished"
        );

        Ok(FederationResult {
            request_id,
            ticker: request.ticker,
            tier: request.tier,
            period,
            data,
            concept_status,
            validation: cross_validation.then_some(reports),
            failures,
            warnings,
            latency_ms,
        })
    }

    /// Capability resolution and tier gating for one concept.
    fn plan(&self, concept: &Concept, tier: Tier, warnings: &mut Vec<String>) -> ConceptPlan {
        let mut plan = ConceptPlan {
            concept: concept.clone(),
            candidates: Vec::new(),
            next: 0,
            points: Vec::new(),
            upstream_failed: false,
            status: None,
        };

        let capable = concept
            .capability()
            .map(|capability| {
                self.registry
                    .get_by_capability(capability)
                    .into_iter()
                    .filter(|adapter| adapter.supports_concept(concept))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let Some(capability) = concept.capability().filter(|_| !capable.is_empty()) else {
            warnings.push(format!("concept '{concept}' is not supported by any source"));
            plan.status = Some(ConceptStatus::Unsupported);
            return plan;
        };

        let entitled = self
            .tier_policy
            .allowed_capabilities(tier)
            .contains(capability);
        plan.candidates = capable
            .into_iter()
            .filter(|adapter| entitled && self.tier_policy.allows_source(tier, adapter.id()))
            .collect();

        if plan.candidates.is_empty() {
            warnings.push(format!(
                "concept '{concept}' ({capability}) is not available at tier {tier}"
            ));
            plan.status = Some(ConceptStatus::UnavailableForTier);
        }
        plan
    }

    /// Queries every adapter concurrently and merges hits by ticker in
    /// registration order.
    pub async fn search(&self, query: &str) -> Vec<CompanyRef> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        let call_timeout = self.config.call_timeout;
        let searches = self.registry.sources().iter().map(|adapter| async move {
            match tokio::time::timeout(call_timeout, adapter.search(query)).await {
                Ok(results) => results,
                Err(_) => {
                    warn!(source = %adapter.id(), "search timed out");
                    Vec::new()
                }
            }
        });

        let mut seen = HashSet::new();
        join_all(searches)
            .await
            .into_iter()
            .flatten()
            .filter(|hit| seen.insert(hit.ticker.clone()))
            .take(self.config.search_limit)
            .collect()
    }

    pub async fn health(&self) -> BTreeMap<SourceId, bool> {
        self.registry
            .health_check_all(self.config.health_check_deadline)
            .await
    }

    pub async fn sources(&self) -> Vec<SourceSnapshot> {
        let health = self.health().await;
        self.registry
            .sources()
            .iter()
            .map(|adapter| {
                let rate_limit = adapter.rate_limit();
                SourceSnapshot {
                    id: adapter.id(),
                    capabilities: adapter.capabilities(),
                    rate_limit: rate_limit.to_string(),
                    unlimited: matches!(rate_limit, RateLimit::Unlimited),
                    healthy: health.get(&adapter.id()).copied().unwrap_or(false),
                }
            })
            .collect()
    }

    pub async fn close(&self) {
        self.registry.close_all().await;
    }
}

/// Hands each open concept its next untried candidates, one call per adapter.
fn next_round(plans: &mut [ConceptPlan], target: usize) -> Vec<Assignment> {
    let mut assignments: Vec<Assignment> = Vec::new();
    for (index, plan) in plans.iter_mut().enumerate() {
        if !plan.is_open() {
            continue;
        }
        let wanted = target.saturating_sub(plan.points.len());
        for _ in 0..wanted {
            let Some(adapter) = plan.candidates.get(plan.next) else {
                break;
            };
            plan.next += 1;
            match assignments
                .iter_mut()
                .find(|assignment| assignment.adapter.id() == adapter.id())
            {
                Some(assignment) => assignment.plans.push(index),
                None => assignments.push(Assignment {
                    adapter: Arc::clone(adapter),
                    plans: vec![index],
                }),
            }
        }
    }
    assignments
}

fn apply_outcome(
    assignment: &Assignment,
    outcome: Result<FetchOutcome, SourceError>,
    plans: &mut [ConceptPlan],
    failures: &mut Vec<SourceFailure>,
    ticker: &Ticker,
) {
    let source_id = assignment.adapter.id();
    match outcome {
        Ok(outcome) => {
            for index in &assignment.plans {
                let plan = &mut plans[*index];
                if let Some(error) = outcome.failure_for(&plan.concept) {
                    warn!(
                        source = %source_id,
                        ticker = %ticker,
                        concept = %plan.concept,
                        code = error.code(),
                        error = %error.message(),
                        "source failed for concept; falling back"
                    );
                    if error.kind() != SourceErrorKind::NotFound {
                        plan.upstream_failed = true;
                    }
                    let concepts = vec![plan.concept.clone()];
                    failures.push(SourceFailure::new(source_id, concepts, error));
                    continue;
                }
                let answer = outcome.points.iter().find(|point| {
                    point.concept == plan.concept
                        && point.ticker == *ticker
                        && point.source_id == source_id
                });
                match answer {
                    Some(point) => {
                        let rank = plan.rank_of(source_id);
                        plan.points.push((rank, point.clone()));
                    }
                    None => debug!(
                        source = %source_id,
                        concept = %plan.concept,
                        "source answered without the concept"
                    ),
                }
            }
        }
        Err(error) => {
            let concepts = assignment
                .plans
                .iter()
                .map(|index| plans[*index].concept.clone())
                .collect::<Vec<_>>();
            warn!(
                source = %source_id,
                ticker = %ticker,
                code = error.code(),
                error = %error.message(),
                "source call failed; falling back"
            );
            if error.kind() != SourceErrorKind::NotFound {
                for index in &assignment.plans {
                    plans[*index].upstream_failed = true;
                }
            }
            failures.push(SourceFailure::new(source_id, concepts, &error));
        }
    }
}

/// Deadline reached: concepts with any answer resolve, the rest time out.
fn expire(plans: &mut [ConceptPlan]) {
    for plan in plans.iter_mut().filter(|plan| plan.is_open()) {
        plan.status = Some(if plan.points.is_empty() {
            ConceptStatus::TimedOut
        } else {
            ConceptStatus::Resolved
        });
    }
}
