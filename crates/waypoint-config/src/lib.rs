//! # Waypoint Config
//!
//! Configuration for the Waypoint server:
//! - [`Settings`] — process-level settings loaded from the environment
//! - [`Encryptor`] — AES-256-GCM encryption for credentials and secret
//!   config values at rest
//! - [`ConfigResolver`] — the two-tier key/value store (database rows with
//!   environment fallback) that plugins and admin surfaces read through

pub mod encryption;
pub mod resolver;
pub mod settings;

pub use encryption::Encryptor;
pub use resolver::{ConfigEntry, ConfigResolver};
pub use settings::Settings;
