//! # Waypoint Plugins
//!
//! External-source plugins are compile-time registered implementations of
//! [`SourcePlugin`]: a fixed capability set covering admin configuration,
//! OAuth wiring, field declarations, token refresh, and data fetches. No
//! dynamic loading.
//!
//! The [`oauth`] module owns the PKCE authorization-code flow: state and
//! verifier minting, the process-local pending-auth store, code exchange,
//! and token refresh.

pub mod fitbit;
pub mod oauth;
pub mod pkce;
pub mod plugin;
pub mod registry;

pub use oauth::{OAuthBroker, OAuthError, PendingAuth, TokenResponse};
pub use plugin::{
    sanitize_records, AdminConfigField, AdminFieldType, CleanRecord, FetchRecord, FieldDescriptor,
    FieldType, OAuthProviderConfig, PluginError, SetupInfoEntry, SourcePlugin,
};
pub use registry::PluginRegistry;
