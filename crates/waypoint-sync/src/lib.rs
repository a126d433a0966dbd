//! # Waypoint Sync
//!
//! Pulls external metric values from connected plugins into the flexible
//! metrics store. Two entry points: an hourly background tick over every
//! enabled (user, plugin) connection, and on-demand [`SyncScheduler::sync_now`].
//!
//! Each (user, plugin) pair is guarded by its own async lock so at most one
//! sync for the pair is in flight; distinct pairs run independently.
//! Upserts make re-runs idempotent.

pub mod scheduler;

pub use scheduler::{SyncError, SyncReport, SyncScheduler, SyncSchedulerConfig};
