//! The sandbox entry point.
//!
//! [`Sandbox::run`] compiles and evaluates one script against a capability
//! bundle, enforcing every cap in [`Limits`] and scrubbing any surfaced
//! error. It never panics on script input and never returns an `Err`: all
//! failures are carried inside the [`Outcome`].

use std::time::Instant;

use tracing::debug;

use crate::caps::DataApi;
use crate::interp::Interp;
use crate::limits::Limits;
use crate::outcome::{Outcome, SandboxFailure};
use crate::parser::parse;
use crate::value::Value;

/// Cap applied to surfaced error messages (2 KB).
const MAX_ERROR_BYTES: usize = 2 * 1024;

/// Reusable runner holding the resource caps.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    limits: Limits,
}

impl Sandbox {
    /// Sandbox with production limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sandbox with custom limits (tests shrink them).
    #[must_use]
    pub const fn with_limits(limits: Limits) -> Self {
        Self { limits }
    }

    /// The active limits.
    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Compile and evaluate `code` with the given capability bundle.
    ///
    /// `params` is exposed read-only as the `params` global.
    pub async fn run(
        &self,
        code: &str,
        data: &dyn DataApi,
        params: serde_json::Value,
    ) -> Outcome {
        let started = Instant::now();

        if code.len() > self.limits.max_code_bytes {
            return failure_outcome(
                SandboxFailure::Compile(format!(
                    "script exceeds {} bytes",
                    self.limits.max_code_bytes
                )),
                Vec::new(),
                None,
                started,
            );
        }

        let script = match parse(code) {
            Ok(script) => script,
            Err(failure) => return failure_outcome(failure, Vec::new(), None, started),
        };

        let deadline = started + self.limits.max_duration;
        let mut interp = Interp::new(data, params, &self.limits, deadline);

        // The deadline is checked cooperatively at safepoints; the outer
        // timeout is a backstop around capability calls that stall.
        let run = interp.run(&script);
        let result = match tokio::time::timeout(self.limits.max_duration * 2, run).await {
            Ok(result) => result,
            Err(_) => Err(SandboxFailure::Timeout),
        };

        let renders = std::mem::take(&mut interp.renders);
        let progress = interp.progress.take();

        match result {
            Ok(value) => {
                let return_value = match value {
                    Value::Null => None,
                    other => Some(other.to_json()),
                };
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    renders = renders.len(),
                    "Script run finished"
                );
                Outcome {
                    return_value,
                    renders,
                    progress,
                    error: None,
                    error_kind: None,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            }
            Err(failure) => failure_outcome(failure, renders, progress, started),
        }
    }
}

fn failure_outcome(
    failure: SandboxFailure,
    renders: Vec<crate::render::RenderOp>,
    progress: Option<crate::outcome::ProgressReport>,
    started: Instant,
) -> Outcome {
    Outcome {
        return_value: None,
        renders,
        progress,
        error: Some(scrub(&failure.to_string())),
        error_kind: Some(failure.kind()),
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

/// Scrub a surfaced message: truncate and keep it single-line.
///
/// Messages are host-generated so they carry no stack frames, but capability
/// errors could in principle embed anything; the cap is cheap to keep.
fn scrub(message: &str) -> String {
    let single_line = message.replace('\n', " ");
    if single_line.len() <= MAX_ERROR_BYTES {
        return single_line;
    }
    let mut end = MAX_ERROR_BYTES;
    while end > 0 && !single_line.is_char_boundary(end) {
        end -= 1;
    }
    single_line[..end].to_string()
}
