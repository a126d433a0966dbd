//! Change tags published to subscribers.

use serde::{Deserialize, Serialize};

/// A short label identifying a data dependency a client should refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeTag {
    /// Tasks in any period changed
    Tasks,
    /// Daily periods or daily metric values changed
    Daily,
    /// Weekly periods changed
    Weekly,
    /// Objectives or key results changed
    Objectives,
    /// Flexible metric values or templates changed
    Metrics,
    /// Dashboard widgets changed
    Widgets,
    /// Saved queries changed
    Queries,
}

impl ChangeTag {
    /// Wire form of the tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Objectives => "objectives",
            Self::Metrics => "metrics",
            Self::Widgets => "widgets",
            Self::Queries => "queries",
        }
    }
}

impl std::fmt::Display for ChangeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_wire_form() {
        assert_eq!(ChangeTag::Tasks.as_str(), "tasks");
        assert_eq!(ChangeTag::Metrics.to_string(), "metrics");

        let json = serde_json::to_string(&ChangeTag::Objectives).expect("serialize");
        assert_eq!(json, "\"objectives\"");
    }
}
