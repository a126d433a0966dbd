//! Strongly-typed ID wrappers for type safety.
//!
//! Using newtype pattern to prevent mixing up different ID types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create an id from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

entity_id! {
    /// User identifier.
    UserId
}

entity_id! {
    /// Time period identifier.
    PeriodId
}

entity_id! {
    /// Task identifier.
    TaskId
}

entity_id! {
    /// Tag identifier.
    TagId
}

entity_id! {
    /// Objective identifier.
    ObjectiveId
}

entity_id! {
    /// Key result identifier.
    KeyResultId
}

entity_id! {
    /// Saved query identifier.
    QueryId
}

entity_id! {
    /// Dashboard widget identifier.
    WidgetId
}

entity_id! {
    /// Metrics template identifier.
    TemplateId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_serialization() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).expect("Failed to serialize");
        let deserialized: UserId = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(id, deserialized);
    }

    #[test]
    fn test_ids_are_distinct_types() {
        let user = UserId::new();
        let task = TaskId::new();
        // Different newtypes never compare equal even over the same UUID
        assert_ne!(user.0, task.0);
    }

    #[test]
    fn test_id_display_is_uuid() {
        let uuid = Uuid::new_v4();
        let id = TaskId::from_uuid(uuid);
        assert_eq!(id.to_string(), uuid.to_string());
    }
}
