//! Cross-source reconciliation.
//!
//! Values are never averaged. The chosen point is always the one reported by
//! the highest-priority source that answered; the other observations only
//! feed the consistency score and the conflict flag.

use serde::Serialize;

use crate::{Concept, DataPoint, SourceId, Ticker, UtcDateTime};

/// One source's answer for a concept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub source_id: SourceId,
    pub value: f64,
    pub unit: String,
    pub retrieved_at: UtcDateTime,
}

impl From<&DataPoint> for Observation {
    fn from(point: &DataPoint) -> Self {
        Self {
            source_id: point.source_id,
            value: point.value,
            unit: point.unit.clone(),
            retrieved_at: point.retrieved_at,
        }
    }
}

/// Agreement summary for one (ticker, concept) across sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub ticker: Ticker,
    pub concept: Concept,
    /// In source priority order.
    pub observations: Vec<Observation>,
    pub median: f64,
    pub tolerance: f64,
    pub consistency_score: f64,
    pub chosen: DataPoint,
    pub conflict: bool,
}

impl ValidationReport {
    /// Human-readable listing of every observed value, used when the sources
    /// disagree.
    pub fn conflict_warning(&self) -> String {
        let observed = self
            .observations
            .iter()
            .map(|observation| {
                format!(
                    "{}={} {}",
                    observation.source_id, observation.value, observation.unit
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "sources disagree on {} for {} (consistency {:.2}, tolerance {:.1}%): {}; reporting {} from {}",
            self.concept,
            self.ticker,
            self.consistency_score,
            self.tolerance * 100.0,
            observed,
            self.chosen.value,
            self.chosen.source_id
        )
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[middle - 1] + sorted[middle]) / 2.0)
    } else {
        Some(sorted[middle])
    }
}

/// Relative band around `center`; a zero center only admits exact zeros.
pub fn within_tolerance(value: f64, center: f64, tolerance: f64) -> bool {
    if center == 0.0 {
        return value == 0.0;
    }
    (value - center).abs() <= tolerance * center.abs()
}

/// Fraction of `values` inside the tolerance band around their median.
pub fn consistency_score(values: &[f64], tolerance: f64) -> f64 {
    let Some(center) = median(values) else {
        return 0.0;
    };
    let agreeing = values
        .iter()
        .filter(|value| within_tolerance(**value, center, tolerance))
        .count();
    agreeing as f64 / values.len() as f64
}

/// Builds the report for `points`, which must be ordered by source priority.
/// Returns `None` when there is nothing to reconcile.
pub fn reconcile(points: &[DataPoint], tolerance: f64) -> Option<ValidationReport> {
    let chosen = points.first()?.clone();
    let values = points.iter().map(|point| point.value).collect::<Vec<_>>();
    let center = median(&values)?;
    let score = consistency_score(&values, tolerance);
    let conflict = !within_tolerance(chosen.value, center, tolerance) || score <= 0.5;

    Some(ValidationReport {
        ticker: chosen.ticker.clone(),
        concept: chosen.concept.clone(),
        observations: points.iter().map(Observation::from).collect(),
        median: center,
        tolerance,
        consistency_score: score,
        chosen,
        conflict,
    })
}
