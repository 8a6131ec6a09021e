use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A physical room. Rooms hold member entity ids, never entity references,
/// so the object graph stays acyclic (entities point back via `room_id`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_id: Option<String>,
    #[serde(default)]
    pub entity_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            icon: None,
            area_id: None,
            entity_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_entity(&mut self, entity_id: impl Into<String>) {
        let entity_id = entity_id.into();
        if !self.entity_ids.contains(&entity_id) {
            self.entity_ids.push(entity_id);
            self.updated_at = Utc::now();
        }
    }

    pub fn remove_entity(&mut self, entity_id: &str) {
        let before = self.entity_ids.len();
        self.entity_ids.retain(|id| id != entity_id);
        if self.entity_ids.len() != before {
            self.updated_at = Utc::now();
        }
    }
}

/// An area groups rooms (e.g. "upstairs"). Same id-only linkage as rooms.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Area {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub room_ids: Vec<String>,
}
