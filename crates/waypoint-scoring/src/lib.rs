//! # Waypoint Scoring
//!
//! Pure scoring functions over store rows.
//!
//! A key result scores in `[0, 1]` according to its measurement variant; an
//! objective's score is the weighted mean of its key results; the overall
//! score for a (year, level) scope is the weighted mean of its objectives.

use waypoint_store::{KeyResult, MeasurementType, Objective};

/// Score a single key result from its stored state.
///
/// - slider: the stored score is authoritative.
/// - checkboxes: completed / total, 0 when the list is empty.
/// - custom query: the stored score is the cached last-observed value; live
///   evaluation replaces it elsewhere.
#[must_use]
pub fn kr_score(kr: &KeyResult) -> f64 {
    match kr.measurement {
        MeasurementType::Slider | MeasurementType::CustomQuery => kr.score.clamp(0.0, 1.0),
        MeasurementType::Checkboxes => {
            let items = kr.checkbox_items();
            if items.is_empty() {
                return 0.0;
            }
            let completed = items.iter().filter(|item| item.completed).count();
            completed as f64 / items.len() as f64
        }
    }
}

/// Weighted mean of key result scores; 0 when total weight is 0.
#[must_use]
pub fn objective_score(krs: &[KeyResult]) -> f64 {
    weighted_mean(krs.iter().map(|kr| (kr_score(kr), kr.weight)))
}

/// Weighted mean of objective scores for a scope; 0 when total weight is 0.
///
/// Callers pass each objective paired with its (already scored) key results.
#[must_use]
pub fn overall_score(objectives: &[(Objective, Vec<KeyResult>)]) -> f64 {
    weighted_mean(
        objectives
            .iter()
            .map(|(objective, krs)| (objective_score(krs), objective.weight)),
    )
}

fn weighted_mean(pairs: impl Iterator<Item = (f64, f64)>) -> f64 {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for (score, weight) in pairs {
        weighted_sum += score * weight;
        total_weight += weight;
    }
    if total_weight <= 0.0 {
        return 0.0;
    }
    weighted_sum / total_weight
}
