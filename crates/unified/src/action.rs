use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::EntityState;
use crate::error::{UnifiedError, UnifiedResult};

/// A request to change an entity, expressed in unified action names.
/// Adapters translate these to source-specific operations.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ControlAction {
    pub action: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<BTreeMap<String, Value>>,
}

impl ControlAction {
    #[must_use]
    pub fn new(action: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            entity_id: entity_id.into(),
            parameters: BTreeMap::new(),
            context: None,
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> UnifiedResult<()> {
        if self.entity_id.is_empty() {
            return Err(UnifiedError::EmptyActionField("entity_id"));
        }
        if self.action.is_empty() {
            return Err(UnifiedError::EmptyActionField("action"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlError {
    pub code: String,
    pub message: String,
}

impl ControlError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a control action. Always returned, never thrown: failure is a
/// populated `error`, not a transport-level surprise.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ControlResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<EntityState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ControlError>,
    pub duration_ms: u64,
    pub processed_at: DateTime<Utc>,
}

impl ControlResult {
    #[must_use]
    pub fn ok(new_state: Option<EntityState>, started: DateTime<Utc>) -> Self {
        Self {
            success: true,
            new_state,
            attributes: BTreeMap::new(),
            error: None,
            duration_ms: elapsed_ms(started),
            processed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn fail(error: ControlError, started: DateTime<Utc>) -> Self {
        Self {
            success: false,
            new_state: None,
            attributes: BTreeMap::new(),
            error: Some(error),
            duration_ms: elapsed_ms(started),
            processed_at: Utc::now(),
        }
    }
}

fn elapsed_ms(started: DateTime<Utc>) -> u64 {
    (Utc::now() - started).num_milliseconds().max(0) as u64
}
