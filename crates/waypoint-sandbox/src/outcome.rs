//! Run outcomes and failure kinds.

use serde::Serialize;
use waypoint_core::SandboxErrorKind;

use crate::render::RenderOp;

/// A failed run. Never fatal to the host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxFailure {
    #[error("script did not finish within the time budget")]
    Timeout,
    #[error("script exceeded the memory budget")]
    OutOfMemory,
    #[error("compile error: {0}")]
    Compile(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("render output exceeded the per-run cap")]
    OutputTooLarge,
}

impl SandboxFailure {
    /// The taxonomy kind for API surfaces.
    #[must_use]
    pub const fn kind(&self) -> SandboxErrorKind {
        match self {
            Self::Timeout => SandboxErrorKind::Timeout,
            Self::OutOfMemory => SandboxErrorKind::OutOfMemory,
            Self::Compile(_) => SandboxErrorKind::CompileError,
            Self::Runtime(_) => SandboxErrorKind::RuntimeError,
            Self::OutputTooLarge => SandboxErrorKind::OutputTooLarge,
        }
    }
}

/// Progress reported via `progress.set`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub numerator: f64,
    pub denominator: f64,
    /// `clamp(numerator / denominator, 0, 1)`
    pub score: f64,
    /// `"num / denom"` as the user sees it
    pub label: String,
}

impl ProgressReport {
    /// Build a report; returns `None` for a non-positive denominator (the
    /// call is specified as a no-op then).
    #[must_use]
    pub fn new(numerator: f64, denominator: f64) -> Option<Self> {
        if denominator <= 0.0 || !denominator.is_finite() || !numerator.is_finite() {
            return None;
        }
        Some(Self {
            numerator,
            denominator,
            score: (numerator / denominator).clamp(0.0, 1.0),
            label: format!(
                "{} / {}",
                crate::value::format_number(numerator),
                crate::value::format_number(denominator)
            ),
        })
    }
}

/// The result of one sandbox run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    /// The script's final expression value, if it produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<serde_json::Value>,
    /// Ordered render operations
    pub renders: Vec<RenderOp>,
    /// Last `progress.set` call, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressReport>,
    /// Scrubbed failure message, if the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The failure kind matching `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<SandboxErrorKind>,
    /// Wall-clock duration of the run
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_clamps_overachievement() {
        let report = ProgressReport::new(150.0, 100.0).expect("valid progress");
        assert!((report.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(report.label, "150 / 100");
    }

    #[test]
    fn test_progress_zero_denominator_is_none() {
        assert!(ProgressReport::new(5.0, 0.0).is_none());
        assert!(ProgressReport::new(5.0, -1.0).is_none());
    }

    #[test]
    fn test_progress_label_formatting() {
        let report = ProgressReport::new(3.0, 4.0).expect("valid progress");
        assert_eq!(report.label, "3 / 4");
        assert!((report.score - 0.75).abs() < f64::EPSILON);
    }
}
