//! Resource caps enforced on every run.

use std::time::Duration;

/// Hard caps for one script evaluation.
///
/// The defaults are the production contract; tests shrink them to exercise
/// the enforcement paths quickly.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Wall-clock budget for the whole run
    pub max_duration: Duration,
    /// Approximate allocation watermark in bytes
    pub max_memory_bytes: usize,
    /// Accepted script size in bytes
    pub max_code_bytes: usize,
    /// Render operations per run
    pub max_render_ops: usize,
    /// Rows returned by a single `q.*` fetch
    pub max_fetch_rows: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(5),
            max_memory_bytes: 128 * 1024 * 1024,
            max_code_bytes: 100 * 1024,
            max_render_ops: 1024,
            max_fetch_rows: 10_000,
        }
    }
}
