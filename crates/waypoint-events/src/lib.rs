//! # Waypoint Events
//!
//! In-process change notification hub. Mutating paths publish short
//! [`ChangeTag`]s per user; connected clients subscribe to their own topic
//! and translate tags into data-refresh dependencies.
//!
//! Delivery is best-effort, at-most-once. Publishers never block: a slow
//! subscriber whose bounded queue fills up is dropped.

pub mod broadcaster;
pub mod tags;

pub use broadcaster::{ChangeBroadcaster, Subscription};
pub use tags::ChangeTag;
