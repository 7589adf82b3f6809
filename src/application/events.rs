use crate::domain::attribute::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Base trait for all domain events
pub trait DomainEvent: Send + Sync {
    fn event_id(&self) -> &str;
    fn occurred_at(&self) -> DateTime<Utc>;
    fn event_type(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyReloadedEvent {
    pub event_id: String,
    pub occurred_at: DateTime<Utc>,
    pub policy_version: u64,
    pub rule_count: usize,
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAttributesChangedEvent {
    pub event_id: String,
    pub occurred_at: DateTime<Utc>,
    pub kind: EntityKind,
    pub entity_id: String,
    pub removed: bool,
    pub store_version: u64,
}

impl DomainEvent for PolicyReloadedEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
    fn event_type(&self) -> &str {
        "PolicyReloaded"
    }
}

impl DomainEvent for EntityAttributesChangedEvent {
    fn event_id(&self) -> &str {
        &self.event_id
    }
    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
    fn event_type(&self) -> &str {
        if self.removed {
            "EntityRemoved"
        } else {
            "EntityAttributesReplaced"
        }
    }
}

/// Event factory for creating domain events
pub struct EventFactory;

impl EventFactory {
    pub fn policy_reloaded(
        policy_version: u64,
        rule_count: usize,
        requested_by: Option<String>,
    ) -> PolicyReloadedEvent {
        PolicyReloadedEvent {
            event_id: Uuid::new_v4().to_string(),
            occurred_at: Utc::now(),
            policy_version,
            rule_count,
            requested_by,
        }
    }

    pub fn entity_changed(
        kind: EntityKind,
        entity_id: String,
        removed: bool,
        store_version: u64,
    ) -> EntityAttributesChangedEvent {
        EntityAttributesChangedEvent {
            event_id: Uuid::new_v4().to_string(),
            occurred_at: Utc::now(),
            kind,
            entity_id,
            removed,
            store_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        let event = EventFactory::policy_reloaded(2, 5, Some("ops".to_string()));
        assert_eq!(event.event_type(), "PolicyReloaded");
        assert_eq!(event.policy_version, 2);

        let event = EventFactory::entity_changed(EntityKind::Subject, "u1".into(), true, 4);
        assert_eq!(event.event_type(), "EntityRemoved");
        assert!(!event.event_id().is_empty());
    }
}
