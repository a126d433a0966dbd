//! The compile-time plugin registry.

use std::sync::Arc;

use waypoint_config::ConfigResolver;

use crate::fitbit::FitbitPlugin;
use crate::oauth::OAuthBroker;
use crate::plugin::SourcePlugin;

/// Holds every registered plugin for the process lifetime.
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn SourcePlugin>>,
}

impl PluginRegistry {
    /// The production set of plugins.
    #[must_use]
    pub fn new(config: Arc<ConfigResolver>, broker: Arc<OAuthBroker>) -> Self {
        Self {
            plugins: vec![Arc::new(FitbitPlugin::new(config, broker))],
        }
    }

    /// A registry over an explicit plugin set (tests).
    #[must_use]
    pub fn with_plugins(plugins: Vec<Arc<dyn SourcePlugin>>) -> Self {
        Self { plugins }
    }

    /// Look up one plugin by id.
    #[must_use]
    pub fn get(&self, plugin_id: &str) -> Option<Arc<dyn SourcePlugin>> {
        self.plugins
            .iter()
            .find(|plugin| plugin.id() == plugin_id)
            .cloned()
    }

    /// Every registered plugin.
    #[must_use]
    pub fn all(&self) -> &[Arc<dyn SourcePlugin>] {
        &self.plugins
    }

    /// Whether a metric source string (`pluginId.fieldId`) refers to a
    /// registered plugin and one of its declared fields.
    #[must_use]
    pub fn is_known_source(&self, source: &str) -> bool {
        let Some((plugin_id, field_id)) = source.split_once('.') else {
            return false;
        };
        self.get(plugin_id).is_some_and(|plugin| {
            plugin
                .available_fields()
                .iter()
                .any(|field| field.id == field_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::test_support::MockPlugin;

    fn registry() -> PluginRegistry {
        PluginRegistry::with_plugins(vec![Arc::new(MockPlugin::new())])
    }

    #[test]
    fn test_lookup_by_id() {
        let registry = registry();
        assert!(registry.get("fitbit").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn test_known_source_check() {
        let registry = registry();
        assert!(registry.is_known_source("fitbit.steps"));
        assert!(!registry.is_known_source("fitbit.heartbeats"));
        assert!(!registry.is_known_source("garmin.steps"));
        assert!(!registry.is_known_source("no-dot"));
    }
}
