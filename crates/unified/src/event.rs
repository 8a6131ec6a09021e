use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::api::{Entity, EntityState};
use crate::health::{AdapterHealth, AdapterMetrics, AdapterStatus};
use crate::source::SourceKind;
use crate::sync::SyncStatus;

/// One broadcastable state-change/lifecycle event, tagged by `type`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    StateChange {
        entity_id: String,
        old_state: EntityState,
        new_state: EntityState,
        source: SourceKind,
        /// True when the change originated outside the unified API (a
        /// physical switch, an upstream push), false for API-driven changes.
        #[serde(default)]
        external: bool,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        metadata: BTreeMap<String, Value>,
    },
    EntityAdded {
        entity: Box<Entity>,
    },
    EntityRemoved {
        entity_id: String,
        source: SourceKind,
    },
    SyncStatus {
        source: SourceKind,
        status: SyncStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    AdapterStatus {
        adapter_id: String,
        name: String,
        source: SourceKind,
        status: AdapterStatus,
        health: AdapterHealth,
        metrics: AdapterMetrics,
    },
}

/// Envelope around a [`HubEvent`], stamped at creation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EventBlock {
    pub creation_time: DateTime<Utc>,
    pub id: Uuid,
    #[serde(flatten)]
    pub event: HubEvent,
}

impl EventBlock {
    #[must_use]
    pub fn new(event: HubEvent) -> Self {
        Self {
            creation_time: Utc::now(),
            id: Uuid::new_v4(),
            event,
        }
    }

    #[must_use]
    pub fn state_change(
        entity_id: impl Into<String>,
        old_state: EntityState,
        new_state: EntityState,
        source: SourceKind,
    ) -> Self {
        Self::new(HubEvent::StateChange {
            entity_id: entity_id.into(),
            old_state,
            new_state,
            source,
            external: false,
            metadata: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn external_state_change(
        entity_id: impl Into<String>,
        old_state: EntityState,
        new_state: EntityState,
        source: SourceKind,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self::new(HubEvent::StateChange {
            entity_id: entity_id.into(),
            old_state,
            new_state,
            source,
            external: true,
            metadata,
        })
    }

    #[must_use]
    pub fn entity_added(entity: Entity) -> Self {
        Self::new(HubEvent::EntityAdded {
            entity: Box::new(entity),
        })
    }

    #[must_use]
    pub fn entity_removed(entity_id: impl Into<String>, source: SourceKind) -> Self {
        Self::new(HubEvent::EntityRemoved {
            entity_id: entity_id.into(),
            source,
        })
    }

    #[must_use]
    pub fn sync_status(source: SourceKind, status: SyncStatus, detail: Option<String>) -> Self {
        Self::new(HubEvent::SyncStatus {
            source,
            status,
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::EventBlock;
    use crate::api::EntityState;
    use crate::source::SourceKind;

    #[test]
    fn event_type_tag() {
        let evt = EventBlock::state_change(
            "light.kitchen",
            EntityState::Off,
            EntityState::On,
            SourceKind::HomeAutomation,
        );
        let value = serde_json::to_value(&evt).unwrap();
        assert_eq!(value["type"], json!("state_change"));
        assert_eq!(value["entity_id"], json!("light.kitchen"));

        let back: EventBlock = serde_json::from_value(value).unwrap();
        assert_eq!(back, evt);
    }
}
