//! # Waypoint Sandbox
//!
//! Executes user-authored scripts deterministically, safely, and within
//! hard resource caps. The language is a curated subset (JavaScript-shaped
//! expressions and statements, no user-defined functions, no unbounded
//! loops); the only reachable state is the capability bundle the host
//! injects as the globals `q`, `render`, `progress`, and `params`.
//!
//! Pipeline: [`lexer`] -> [`parser`] -> [`ast`] -> [`interp`], wrapped by
//! [`runtime::Sandbox::run`] which enforces the wall-clock deadline and
//! scrubs errors.

pub mod ast;
pub mod caps;
pub mod interp;
pub mod lexer;
pub mod limits;
pub mod outcome;
pub mod parser;
pub mod render;
pub mod runtime;
pub mod value;

pub use caps::{
    DailyFilter, DailyRecord, DataApi, KeyResultRecord, ObjectiveFilter, ObjectiveRecord,
    TaskQueryFilter, TaskRecord,
};
pub use limits::Limits;
pub use outcome::{Outcome, ProgressReport, SandboxFailure};
pub use render::{PlotKind, RenderOp, TableSpec};
pub use runtime::Sandbox;
pub use value::Value;
