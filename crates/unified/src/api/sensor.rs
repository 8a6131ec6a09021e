use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Numeric or textual measurement sensors (temperature, power, counters).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SensorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
}

/// Two-state sensors (motion, contact, presence).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BinarySensorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
}
