//! Small type-refined payloads that don't warrant their own module.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwitchDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_on: Option<bool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<bool>,
}

/// Position is a percentage: 0 fully closed, 100 fully open.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CoverDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FanDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_percent: Option<f64>,
    #[serde(default)]
    pub oscillating: bool,
}

/// Bare devices from inventory-style sources (routers, clients, PDUs).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenericDetail {}
